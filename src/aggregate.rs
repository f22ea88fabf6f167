//! Per-subject deduplicated rule aggregation.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::model::rule::{CanonicalRule, ObservedRule};

/// Per-subject in-memory map from canonical rule to observed-rule metadata.
/// Not shared across subjects — the supervisor owns one of these per
/// subject key.
#[derive(Default)]
pub struct Aggregator {
    rules: HashMap<CanonicalRule, ObservedRule>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent under re-delivery: re-adding the same rule at the same
    /// time only increments `count`.
    pub fn add(&mut self, rule: CanonicalRule, event_time: DateTime<Utc>) {
        self.rules
            .entry(rule.clone())
            .and_modify(|observed| {
                observed.count += 1;
                observed.last_seen = observed.last_seen.max(event_time);
                observed.first_seen = observed.first_seen.min(event_time);
            })
            .or_insert_with(|| ObservedRule {
                api_groups: vec![rule.api_group.clone()],
                resources: vec![rule.resource.clone()],
                verbs: vec![rule.verb.clone()],
                non_resource_urls: if rule.non_resource_url.is_empty() {
                    vec![]
                } else {
                    vec![rule.non_resource_url.clone()]
                },
                namespace: rule.namespace.clone(),
                first_seen: event_time,
                last_seen: event_time,
                count: 1,
            });
    }

    /// A snapshot list of the current observed rules.
    pub fn rules(&self) -> Vec<ObservedRule> {
        self.rules.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Drop rules older than `retention`, then cap to `max_rules`, keeping
    /// the most-recently-seen. Applied at flush time, not on every add.
    pub fn compact(&mut self, now: DateTime<Utc>, retention: chrono::Duration, max_rules: usize) {
        let cutoff = now - retention;
        self.rules.retain(|_, observed| observed.last_seen >= cutoff);

        if self.rules.len() > max_rules {
            let mut entries: Vec<(CanonicalRule, ObservedRule)> =
                self.rules.drain().collect();
            entries.sort_by(|a, b| b.1.last_seen.cmp(&a.1.last_seen));
            entries.truncate(max_rules);
            self.rules = entries.into_iter().collect();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn rule(resource: &str, verb: &str) -> CanonicalRule {
        CanonicalRule {
            api_group: String::new(),
            resource: resource.to_string(),
            verb: verb.to_string(),
            non_resource_url: String::new(),
            namespace: "dev".to_string(),
        }
    }

    #[test]
    fn add_first_occurrence_sets_metadata() {
        let mut agg = Aggregator::new();
        let t = Utc::now();
        agg.add(rule("pods", "get"), t);
        let rules = agg.rules();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].count, 1);
        assert_eq!(rules[0].first_seen, t);
        assert_eq!(rules[0].last_seen, t);
    }

    #[test]
    fn no_two_rules_share_the_same_key() {
        let mut agg = Aggregator::new();
        let t = Utc::now();
        agg.add(rule("pods", "get"), t);
        agg.add(rule("pods", "get"), t);
        agg.add(rule("pods", "list"), t);
        assert_eq!(agg.len(), 2);
    }

    #[test]
    fn idempotent_redelivery_increments_count_only() {
        let mut agg = Aggregator::new();
        let t1 = Utc::now();
        let t2 = t1 + Duration::seconds(5);
        agg.add(rule("pods", "get"), t1);
        agg.add(rule("pods", "get"), t1);
        let rules = agg.rules();
        assert_eq!(rules[0].count, 2);
        assert!(rules[0].first_seen <= rules[0].last_seen);

        agg.add(rule("pods", "get"), t2);
        let rules = agg.rules();
        assert_eq!(rules[0].count, 3);
        assert_eq!(rules[0].last_seen, t2);
        assert_eq!(rules[0].first_seen, t1);
    }

    #[test]
    fn first_seen_tracks_minimum_last_seen_tracks_maximum() {
        let mut agg = Aggregator::new();
        let t1 = Utc::now();
        let earlier = t1 - Duration::seconds(30);
        let later = t1 + Duration::seconds(30);
        agg.add(rule("pods", "get"), t1);
        agg.add(rule("pods", "get"), earlier);
        agg.add(rule("pods", "get"), later);
        let rules = agg.rules();
        assert_eq!(rules[0].first_seen, earlier);
        assert_eq!(rules[0].last_seen, later);
        assert_eq!(rules[0].count, 3);
    }

    #[test]
    fn compaction_drops_stale_rules() {
        let mut agg = Aggregator::new();
        let now = Utc::now();
        let stale = now - Duration::days(40);
        agg.add(rule("pods", "get"), stale);
        agg.add(rule("configmaps", "get"), now);
        agg.compact(now, Duration::days(30), 200);
        let rules = agg.rules();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].resources[0], "configmaps");
    }

    #[test]
    fn compaction_caps_to_max_rules_keeping_most_recent() {
        let mut agg = Aggregator::new();
        let now = Utc::now();
        for i in 0..5u32 {
            agg.add(
                rule(&format!("res{i}"), "get"),
                now - Duration::seconds((5 - i) as i64),
            );
        }
        agg.compact(now, Duration::days(30), 2);
        let rules = agg.rules();
        assert_eq!(rules.len(), 2);
        let resources: Vec<String> = rules.iter().map(|r| r.resources[0].clone()).collect();
        assert!(resources.contains(&"res4".to_string()));
        assert!(resources.contains(&"res3".to_string()));
    }
}
