//! Compliance diff engine: compares observed usage against currently
//! effective permissions and scores the gap.
//!
//! Scoring follows §4.8 exactly: `score = floor(100 * used / total)` where
//! `total` is the number of effective rules and `used` is how many of them
//! are exercised by at least one observed rule. This is a grant-coverage
//! score, not a usage-coverage score — it answers "how much of what's
//! granted is actually used", not "how much of what's used is granted".

use std::collections::HashSet;

use chrono::Utc;

use crate::model::report::{ComplianceReport, Severity};
use crate::model::rule::{EffectiveRule, ObservedRule};

/// Resources whose unused grant meaningfully increases blast radius. See
/// §4.8's canonical sensitive set. The resource wildcard is handled
/// separately (reported as `* (all resources)`).
pub const SENSITIVE_RESOURCES: &[&str] = &[
    "secrets",
    "nodes",
    "clusterroles",
    "clusterrolebindings",
    "roles",
    "rolebindings",
    "mutatingwebhookconfigurations",
    "validatingwebhookconfigurations",
    "certificatesigningrequests",
    "tokenreviews",
    "subjectaccessreviews",
    "selfsubjectaccessreviews",
    "selfsubjectrulesreviews",
    "persistentvolumes",
    "storageclasses",
    "customresourcedefinitions",
    "serviceaccounts/token",
];

/// True iff `effective` covers `observed` per §4.8's coverage semantics.
/// A `resourceNames`-restricted effective rule never covers general usage,
/// regardless of group/resource/verb/namespace match.
fn covers(effective: &EffectiveRule, observed: &ObservedRule) -> bool {
    if !effective.resource_names.is_empty() {
        return false;
    }

    let namespace_ok = match &effective.namespace {
        None => true,
        Some(ns) => ns == &observed.namespace,
    };
    if !namespace_ok {
        return false;
    }

    if !effective.non_resource_urls.is_empty() || !observed.non_resource_urls.is_empty() {
        let url_ok = observed
            .non_resource_urls
            .iter()
            .all(|u| effective.non_resource_urls.iter().any(|eu| eu == u));
        let verb_ok = EffectiveRule::has_wildcard(&effective.verbs)
            || observed.verbs.iter().all(|v| effective.verbs.iter().any(|ev| ev == v));
        return url_ok && verb_ok;
    }

    let group_ok = EffectiveRule::has_wildcard(&effective.api_groups)
        || observed
            .api_groups
            .iter()
            .all(|g| effective.api_groups.iter().any(|eg| eg == g));
    let resource_ok = EffectiveRule::has_wildcard(&effective.resources)
        || observed
            .resources
            .iter()
            .all(|r| effective.resources.iter().any(|er| er == r));
    let verb_ok = EffectiveRule::has_wildcard(&effective.verbs)
        || observed.verbs.iter().all(|v| effective.verbs.iter().any(|ev| ev == v));

    group_ok && resource_ok && verb_ok
}

/// An excess grant: an effective rule not exercised by any observed usage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExcessGrant {
    pub resources: Vec<String>,
    pub non_resource_urls: Vec<String>,
    pub namespace: Option<String>,
}

/// An uncovered usage: something observed in use that no effective rule
/// currently grants (stale or already-revoked access, or a usage predating
/// the current RBAC state). Tracked for `uncoveredCount`; not part of the
/// score formula.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UncoveredUsage {
    pub resource: String,
    pub namespace: String,
}

/// Full diff result: used/excess/uncovered sets plus the scored report.
pub struct DiffResult {
    pub used: Vec<EffectiveRule>,
    pub excess: Vec<ExcessGrant>,
    pub uncovered: Vec<UncoveredUsage>,
    pub report: ComplianceReport,
}

fn sensitive_names(grant: &ExcessGrant) -> Vec<String> {
    let mut names = Vec::new();
    for resource in &grant.resources {
        if resource == "*" {
            names.push("* (all resources)".to_string());
        } else if SENSITIVE_RESOURCES.contains(&resource.to_lowercase().as_str()) {
            names.push(resource.to_lowercase());
        }
    }
    names
}

/// Compare observed rules against currently effective rules for one
/// subject, producing the coverage classification and a scored report.
///
/// Returns `None` when effective is empty but observed is non-empty: per
/// §4.8, compliance is undefined with no grants to evaluate usage against,
/// and no sub-report should be produced for this cycle.
pub fn diff(observed: &[ObservedRule], effective: &[EffectiveRule]) -> Option<DiffResult> {
    if effective.is_empty() {
        if observed.is_empty() {
            return Some(DiffResult {
                used: Vec::new(),
                excess: Vec::new(),
                uncovered: Vec::new(),
                report: ComplianceReport {
                    score: 100,
                    severity: Severity::Green,
                    used_count: 0,
                    excess_count: 0,
                    uncovered_count: 0,
                    sensitive_excess: Vec::new(),
                    evaluated_at: Utc::now(),
                },
            });
        }
        return None;
    }

    let mut used = Vec::new();
    let mut excess = Vec::new();
    for effective_rule in effective {
        if observed.iter().any(|o| covers(effective_rule, o)) {
            used.push(effective_rule.clone());
        } else {
            excess.push(ExcessGrant {
                resources: effective_rule.resources.clone(),
                non_resource_urls: effective_rule.non_resource_urls.clone(),
                namespace: effective_rule.namespace.clone(),
            });
        }
    }

    let uncovered: Vec<UncoveredUsage> = observed
        .iter()
        .filter(|o| !effective.iter().any(|e| covers(e, o)))
        .map(|o| UncoveredUsage {
            resource: o
                .resources
                .first()
                .cloned()
                .unwrap_or_else(|| o.non_resource_urls.first().cloned().unwrap_or_default()),
            namespace: o.namespace.clone(),
        })
        .collect();

    let total = effective.len();
    let score_value = ((100 * used.len()) / total) as u32;

    let mut sensitive_excess: Vec<String> = excess.iter().flat_map(sensitive_names).collect();
    let mut seen = HashSet::new();
    sensitive_excess.retain(|name| seen.insert(name.clone()));
    sensitive_excess.sort();

    let report = ComplianceReport {
        score: score_value,
        severity: Severity::from_score(score_value),
        used_count: used.len() as u32,
        excess_count: excess.len() as u32,
        uncovered_count: uncovered.len() as u32,
        sensitive_excess,
        evaluated_at: Utc::now(),
    };

    Some(DiffResult {
        used,
        excess,
        uncovered,
        report,
    })
}
