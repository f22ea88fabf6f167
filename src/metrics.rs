//! Process-wide Prometheus metrics, registered lazily the same way the
//! webhook command registers its own registry.

use std::sync::LazyLock;

use prometheus::{Encoder, Histogram, IntCounterVec, IntGaugeVec, Registry, TextEncoder};

pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

pub static EVENTS_INGESTED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    let c = IntCounterVec::new(
        prometheus::Opts::new("rbac_loom_events_ingested_total", "Total audit events ingested"),
        &["source", "source_type"],
    )
    .expect("metric definition is valid");
    REGISTRY.register(Box::new(c.clone())).expect("metric not yet registered");
    c
});

pub static EVENTS_FILTERED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    let c = IntCounterVec::new(
        prometheus::Opts::new("rbac_loom_events_filtered_total", "Total audit events dropped by the filter chain"),
        &["source"],
    )
    .expect("metric definition is valid");
    REGISTRY.register(Box::new(c.clone())).expect("metric not yet registered");
    c
});

pub static EVENTS_DROPPED_VERB: LazyLock<IntCounterVec> = LazyLock::new(|| {
    let c = IntCounterVec::new(
        prometheus::Opts::new(
            "rbac_loom_events_dropped_unrecognized_verb_total",
            "Total audit events dropped for an unrecognized verb",
        ),
        &["source"],
    )
    .expect("metric definition is valid");
    REGISTRY.register(Box::new(c.clone())).expect("metric not yet registered");
    c
});

pub static OBSERVED_RULES: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    let g = IntGaugeVec::new(
        prometheus::Opts::new("rbac_loom_observed_rules", "Current aggregated rule count per subject"),
        &["subject"],
    )
    .expect("metric definition is valid");
    REGISTRY.register(Box::new(g.clone())).expect("metric not yet registered");
    g
});

pub static REPORT_FLUSH_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    let h = Histogram::with_opts(prometheus::HistogramOpts::new(
        "rbac_loom_report_flush_duration_seconds",
        "Duration of a resolve+diff+synthesize+write-back cycle",
    ))
    .expect("metric definition is valid");
    REGISTRY.register(Box::new(h.clone())).expect("metric not yet registered");
    h
});

pub static STATUS_WRITE_CONFLICTS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    let c = IntCounterVec::new(
        prometheus::Opts::new("rbac_loom_status_write_conflicts_total", "Total optimistic-concurrency conflicts on status write"),
        &["source"],
    )
    .expect("metric definition is valid");
    REGISTRY.register(Box::new(c.clone())).expect("metric not yet registered");
    c
});

/// Render the current registry in Prometheus text exposition format, for
/// the `/metrics` route the host mounts alongside the webhook endpoint.
pub fn render() -> String {
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .expect("encoding the metric family set should not fail");
    String::from_utf8(buffer).expect("prometheus text encoding is valid utf8")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_includes_registered_metric_names() {
        EVENTS_INGESTED.with_label_values(&["s1", "file"]).inc();
        let text = render();
        assert!(text.contains("rbac_loom_events_ingested_total"));
    }
}
