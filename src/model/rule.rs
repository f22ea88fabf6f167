//! Canonical rule (aggregation key) and observed rule (aggregated metadata).

use serde::{Deserialize, Serialize};

/// The 5-tuple deduplication key for aggregation. `resourceName` is
/// deliberately excluded — audit events do not reliably convey which named
/// object was targeted in a way that supports stable aggregation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CanonicalRule {
    pub api_group: String,
    /// Includes any subresource, e.g. `pods/exec`. Empty for non-resource
    /// URL requests.
    pub resource: String,
    pub verb: String,
    /// Set (and `resource` left empty) for non-resource URL requests.
    pub non_resource_url: String,
    pub namespace: String,
}

/// An aggregated canonical rule plus bookkeeping metadata. Invariant: each
/// of `api_groups`/`resources`/`verbs` holds exactly one element at storage
/// time — merging into multi-element lists is a synthesizer concern, not
/// an aggregator one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservedRule {
    pub api_groups: Vec<String>,
    pub resources: Vec<String>,
    pub verbs: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub non_resource_urls: Vec<String>,
    pub namespace: String,
    pub first_seen: chrono::DateTime<chrono::Utc>,
    pub last_seen: chrono::DateTime<chrono::Utc>,
    pub count: u64,
}

impl ObservedRule {
    /// Reconstruct the aggregation key this rule was stored under. Only
    /// valid while the single-element invariant holds (pre-synthesis).
    pub fn canonical_key(&self) -> CanonicalRule {
        CanonicalRule {
            api_group: self.api_groups.first().cloned().unwrap_or_default(),
            resource: self.resources.first().cloned().unwrap_or_default(),
            verb: self.verbs.first().cloned().unwrap_or_default(),
            non_resource_url: self.non_resource_urls.first().cloned().unwrap_or_default(),
            namespace: self.namespace.clone(),
        }
    }
}

/// The 8 verbs recognized by the normalizer; anything else is dropped.
pub const RECOGNIZED_VERBS: &[&str] = &[
    "get",
    "list",
    "watch",
    "create",
    "update",
    "patch",
    "delete",
    "deletecollection",
];

/// A rule drawn from a Role/ClusterRole that applies to a subject through a
/// binding, tagged with the binding's namespace (`None` ⇒ cluster-wide).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveRule {
    pub api_groups: Vec<String>,
    pub resources: Vec<String>,
    pub verbs: Vec<String>,
    pub non_resource_urls: Vec<String>,
    pub resource_names: Vec<String>,
    pub namespace: Option<String>,
}

impl EffectiveRule {
    pub fn has_wildcard(list: &[String]) -> bool {
        list.iter().any(|v| v == "*")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn canonical_key_roundtrips_through_observed_rule() {
        let key = CanonicalRule {
            api_group: "apps".into(),
            resource: "deployments".into(),
            verb: "get".into(),
            non_resource_url: String::new(),
            namespace: "dev".into(),
        };
        let now = Utc::now();
        let observed = ObservedRule {
            api_groups: vec![key.api_group.clone()],
            resources: vec![key.resource.clone()],
            verbs: vec![key.verb.clone()],
            non_resource_urls: vec![],
            namespace: key.namespace.clone(),
            first_seen: now,
            last_seen: now,
            count: 1,
        };
        assert_eq!(observed.canonical_key(), key);
    }
}
