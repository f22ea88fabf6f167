//! Wires one source's ingestor through filter → normalize → aggregate,
//! flushing on a periodic tick or at shutdown into resolver + diff +
//! synthesizer, then status/report write-back.

use std::collections::HashMap;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::aggregate::Aggregator;
use crate::diff::diff;
use crate::error::{ConfigError, PipelineError};
use crate::filter::{Action, FilterChain};
use crate::host::StatusWriter;
use crate::ingest::Ingestor;
use crate::metrics::{EVENTS_DROPPED_VERB, EVENTS_FILTERED, EVENTS_INGESTED, OBSERVED_RULES, REPORT_FLUSH_DURATION};
use crate::model::config::{AuditSourceSpec, PolicyStrategyConfig};
use crate::model::event::{AuditEvent, Subject};
use crate::model::report::{PolicyReportStatus, SuggestedPolicy};
use crate::normalize::{canonicalize, extract_subject, normalize_verb};
use crate::resolver::{resolve_effective_rules, RbacInventory};
use crate::synth::synthesize;

/// Static, validated shape of a source's filtering/synthesis configuration,
/// separated from the raw CRD spec so pipeline construction fails fast on
/// bad regexes or an unset source type rather than partway through a run.
pub struct PipelineConfig {
    pub source_id: String,
    /// Namespace of the `AuditSource` object this pipeline serves. Used as
    /// the report's namespace for User/Group subjects, which have no
    /// namespace of their own (ServiceAccount subjects always report under
    /// their own namespace regardless of this field).
    pub source_namespace: Option<String>,
    pub ignore_system_users: bool,
    pub filter_chain: FilterChain,
    pub policy_strategy: PolicyStrategyConfig,
    pub checkpoint_interval: std::time::Duration,
    pub retention: chrono::Duration,
    pub max_rules_per_report: usize,
}

impl PipelineConfig {
    pub fn from_spec(
        source_id: impl Into<String>,
        source_namespace: Option<String>,
        spec: &AuditSourceSpec,
    ) -> Result<Self, ConfigError> {
        let filter_chain = FilterChain::compile(&spec.filters)?;
        Ok(Self {
            source_id: source_id.into(),
            source_namespace,
            ignore_system_users: spec.ignore_system_users(),
            filter_chain,
            policy_strategy: spec.policy_strategy.clone(),
            checkpoint_interval: spec.checkpoint.interval(),
            retention: spec.limits.retention(),
            max_rules_per_report: spec.limits.max_rules_per_report(),
        })
    }
}

/// Per-subject state the pipeline accumulates between flushes.
#[derive(Default)]
struct SubjectState {
    aggregator: Aggregator,
    events_processed: u64,
}

/// Run one source's pipeline to completion: drains the ingestor's channel
/// until cancellation, flushing aggregated state on the configured
/// interval and once more on the way out.
pub async fn run(
    config: PipelineConfig,
    mut ingestor: Box<dyn Ingestor>,
    cancel: CancellationToken,
    inventory: &dyn RbacInventory,
    status_writer: &dyn StatusWriter<PolicyReportStatus>,
) -> Result<(), PipelineError> {
    let mut rx = ingestor.start(cancel.clone()).await?;
    let mut subjects: HashMap<String, (Subject, SubjectState)> = HashMap::new();
    let mut ticker = tokio::time::interval(config.checkpoint_interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!(source = %config.source_id, "pipeline cancelled, flushing before exit");
                flush_all(&config, &mut subjects, inventory, status_writer).await;
                return Ok(());
            }
            _ = ticker.tick() => {
                flush_all(&config, &mut subjects, inventory, status_writer).await;
            }
            event = rx.recv() => {
                match event {
                    Some(event) => process_event(&config, &mut subjects, event),
                    None => {
                        info!(source = %config.source_id, "ingestor channel closed, flushing and exiting");
                        flush_all(&config, &mut subjects, inventory, status_writer).await;
                        return Ok(());
                    }
                }
            }
        }
    }
}

fn process_event(config: &PipelineConfig, subjects: &mut HashMap<String, (Subject, SubjectState)>, event: AuditEvent) {
    EVENTS_INGESTED
        .with_label_values(&[&config.source_id, source_type_label(&event)])
        .inc();

    let Some(subject) = extract_subject(&event.username, config.ignore_system_users) else {
        return;
    };

    match config.filter_chain.evaluate(&event.username, &event.namespace) {
        Action::Deny => {
            EVENTS_FILTERED.with_label_values(&[&config.source_id]).inc();
            return;
        }
        Action::Allow => {}
    }

    let Some(verb) = normalize_verb(&event.verb) else {
        EVENTS_DROPPED_VERB.with_label_values(&[&config.source_id]).inc();
        return;
    };

    let rule = canonicalize(&event, &verb);
    let key = subject.key();
    let entry = subjects.entry(key).or_insert_with(|| (subject, SubjectState::default()));
    entry.1.aggregator.add(rule, event.received_at);
    entry.1.events_processed += 1;

    OBSERVED_RULES
        .with_label_values(&[&entry.0.key()])
        .set(entry.1.aggregator.len() as i64);
}

fn source_type_label(event: &AuditEvent) -> &'static str {
    match event.provenance.source_type {
        crate::model::event::SourceType::File => "file",
        crate::model::event::SourceType::Webhook => "webhook",
        crate::model::event::SourceType::Cloud => "cloud",
    }
}

async fn flush_all(
    config: &PipelineConfig,
    subjects: &mut HashMap<String, (Subject, SubjectState)>,
    inventory: &dyn RbacInventory,
    status_writer: &dyn StatusWriter<PolicyReportStatus>,
) {
    let now = chrono::Utc::now();
    for (subject, state) in subjects.values_mut() {
        state.aggregator.compact(now, config.retention, config.max_rules_per_report);
        if let Err(e) = flush_subject(config, subject, state, inventory, status_writer).await {
            warn!(source = %config.source_id, subject = %subject.key(), error = %e, "flush failed for subject");
        }
    }
}

async fn flush_subject(
    config: &PipelineConfig,
    subject: &Subject,
    state: &mut SubjectState,
    inventory: &dyn RbacInventory,
    status_writer: &dyn StatusWriter<PolicyReportStatus>,
) -> Result<(), PipelineError> {
    let timer = REPORT_FLUSH_DURATION.start_timer();
    let observed = state.aggregator.rules();

    let manifests = synthesize(subject, &config.policy_strategy, &observed);

    let compliance = match resolve_effective_rules(inventory, subject).await {
        Ok(effective) => diff(&observed, &effective).map(|r| r.report),
        Err(e) => {
            // Resolver error: compliance omitted, observed rules and
            // synthesized policy still emitted, per the error-handling
            // table's "resolver error" row.
            warn!(source = %config.source_id, subject = %subject.key(), error = %e, "resolver error, omitting compliance this cycle");
            None
        }
    };

    let namespace = subject
        .own_namespace()
        .map(str::to_string)
        .or_else(|| config.source_namespace.clone());
    let report_name = subject.key().to_lowercase().replace(['/', ':'], "-");

    let events_processed = state.events_processed;
    let mutator: Box<dyn Fn(PolicyReportStatus) -> PolicyReportStatus + Send + Sync> =
        Box::new(move |mut status: PolicyReportStatus| {
            status.observed_rules = observed.clone();
            status.suggested_policy = SuggestedPolicy {
                manifests: manifests.clone(),
            };
            status.compliance = compliance.clone();
            status.events_processed = events_processed;
            status.last_processed_time = Some(chrono::Utc::now());
            status
        });

    status_writer
        .try_update(&report_name, namespace.as_deref(), mutator)
        .await?;

    timer.observe_duration();
    Ok(())
}
