//! Strategy synthesizer: observed rules → concrete Role/ClusterRole and
//! RoleBinding/ClusterRoleBinding documents.

use std::collections::BTreeMap;

use k8s_openapi::api::rbac::v1::{
    ClusterRole, ClusterRoleBinding, PolicyRule, Role, RoleBinding, RoleRef, Subject as RbacSubject,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::model::config::{PolicyStrategyConfig, ScopeMode, VerbMerge, Wildcards};
use crate::model::event::Subject;
use crate::model::rule::{ObservedRule, RECOGNIZED_VERBS};

/// Sanitize a subject name into a valid Kubernetes object name: lowercase,
/// non-alphanumeric folded to `-`, trimmed to 63 chars, trailing hyphens
/// removed.
pub fn sanitize_name(raw: &str) -> String {
    let mut out: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    out.truncate(63);
    while out.ends_with('-') {
        out.pop();
    }
    out
}

fn merge_verbs(strategy: &PolicyStrategyConfig, verbs: Vec<String>) -> Vec<String> {
    let mut verbs = verbs;
    verbs.sort();
    verbs.dedup();

    if strategy.wildcards == Wildcards::Safe {
        let all_present = RECOGNIZED_VERBS
            .iter()
            .all(|v| verbs.iter().any(|o| o == v));
        if all_present {
            return vec!["*".to_string()];
        }
    }
    verbs
}

/// A grouping key for Smart verb-merge: rules sharing (apiGroup, resource,
/// namespace) collapse into one rule whose verbs are the sorted union.
#[derive(PartialEq, Eq, Hash, PartialOrd, Ord, Clone)]
struct MergeKey {
    api_group: String,
    resource: String,
    namespace: String,
}

/// A rule ready for manifest emission: one resource-rule group with its
/// merged verb list, or a non-resource-URL rule.
struct PreparedRule {
    api_group: String,
    resource: String,
    non_resource_url: String,
    namespace: String,
    verbs: Vec<String>,
}

fn prepare_rules(strategy: &PolicyStrategyConfig, observed: &[ObservedRule]) -> Vec<PreparedRule> {
    match strategy.verb_merge {
        VerbMerge::Exact => observed
            .iter()
            .map(|r| PreparedRule {
                api_group: r.api_groups.first().cloned().unwrap_or_default(),
                resource: r.resources.first().cloned().unwrap_or_default(),
                non_resource_url: r.non_resource_urls.first().cloned().unwrap_or_default(),
                namespace: r.namespace.clone(),
                verbs: merge_verbs(
                    strategy,
                    r.verbs.first().cloned().into_iter().collect(),
                ),
            })
            .collect(),
        VerbMerge::Smart => {
            let mut resource_groups: BTreeMap<MergeKey, Vec<String>> = BTreeMap::new();
            let mut non_resource_groups: BTreeMap<(String, String), Vec<String>> = BTreeMap::new();

            for r in observed {
                let verb = r.verbs.first().cloned().unwrap_or_default();
                if let Some(url) = r.non_resource_urls.first() {
                    non_resource_groups
                        .entry((url.clone(), r.namespace.clone()))
                        .or_default()
                        .push(verb);
                } else {
                    let key = MergeKey {
                        api_group: r.api_groups.first().cloned().unwrap_or_default(),
                        resource: r.resources.first().cloned().unwrap_or_default(),
                        namespace: r.namespace.clone(),
                    };
                    resource_groups.entry(key).or_default().push(verb);
                }
            }

            let mut prepared = Vec::new();
            for (key, verbs) in resource_groups {
                prepared.push(PreparedRule {
                    api_group: key.api_group,
                    resource: key.resource,
                    non_resource_url: String::new(),
                    namespace: key.namespace,
                    verbs: merge_verbs(strategy, verbs),
                });
            }
            for ((url, namespace), verbs) in non_resource_groups {
                prepared.push(PreparedRule {
                    api_group: String::new(),
                    resource: String::new(),
                    non_resource_url: url,
                    namespace,
                    verbs: merge_verbs(strategy, verbs),
                });
            }
            prepared
        }
    }
}

fn is_cluster_scoped(rule: &PreparedRule) -> bool {
    rule.namespace.is_empty()
}

fn to_policy_rule(rule: &PreparedRule) -> PolicyRule {
    if !rule.non_resource_url.is_empty() {
        PolicyRule {
            api_groups: Some(vec![String::new()]),
            non_resource_urls: Some(vec![rule.non_resource_url.clone()]),
            verbs: rule.verbs.clone(),
            ..Default::default()
        }
    } else {
        PolicyRule {
            api_groups: Some(vec![rule.api_group.clone()]),
            resources: Some(vec![rule.resource.clone()]),
            verbs: rule.verbs.clone(),
            ..Default::default()
        }
    }
}

fn binding_subject(subject: &Subject) -> RbacSubject {
    match subject {
        Subject::ServiceAccount { namespace, name } => RbacSubject {
            kind: "ServiceAccount".to_string(),
            name: name.clone(),
            namespace: Some(namespace.clone()),
            api_group: None,
        },
        Subject::User { name } => RbacSubject {
            kind: "User".to_string(),
            name: name.clone(),
            namespace: None,
            api_group: Some("rbac.authorization.k8s.io".to_string()),
        },
        Subject::Group { name } => RbacSubject {
            kind: "Group".to_string(),
            name: name.clone(),
            namespace: None,
            api_group: Some("rbac.authorization.k8s.io".to_string()),
        },
    }
}

fn role_name(subject: &Subject) -> String {
    let base = match subject {
        Subject::ServiceAccount { name, .. } => name.clone(),
        Subject::User { name } => name.clone(),
        Subject::Group { name } => name.clone(),
    };
    sanitize_name(&base)
}

fn to_yaml<T: serde::Serialize>(value: &T) -> String {
    serde_yaml::to_string(value).unwrap_or_default()
}

/// Render a Role + RoleBinding pair for a single namespace's rules.
fn render_namespaced(subject: &Subject, namespace: &str, rules: Vec<PolicyRule>) -> Vec<String> {
    let name = role_name(subject);
    let role = Role {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        rules: Some(rules),
    };
    let binding = RoleBinding {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "Role".to_string(),
            name,
        },
        subjects: Some(vec![binding_subject(subject)]),
    };
    vec![to_yaml(&role), to_yaml(&binding)]
}

/// Render a ClusterRole + ClusterRoleBinding pair.
fn render_cluster(subject: &Subject, rules: Vec<PolicyRule>) -> Vec<String> {
    let name = role_name(subject);
    let role = ClusterRole {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            ..Default::default()
        },
        rules: Some(rules),
        ..Default::default()
    };
    let binding = ClusterRoleBinding {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            ..Default::default()
        },
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "ClusterRole".to_string(),
            name,
        },
        subjects: Some(vec![binding_subject(subject)]),
    };
    vec![to_yaml(&role), to_yaml(&binding)]
}

/// Synthesize RBAC manifests for a subject's observed rules, governed by
/// the three policy-strategy knobs (scopeMode, verbMerge, wildcards).
/// Returns an ordered list of YAML documents as text; applying them is the
/// consumer's responsibility.
pub fn synthesize(
    subject: &Subject,
    strategy: &PolicyStrategyConfig,
    observed: &[ObservedRule],
) -> Vec<String> {
    let prepared = prepare_rules(strategy, observed);

    match strategy.scope_mode {
        ScopeMode::ClusterScopeAllowed => {
            let rules: Vec<PolicyRule> = prepared.iter().map(to_policy_rule).collect();
            if rules.is_empty() {
                return vec![];
            }
            render_cluster(subject, rules)
        }
        ScopeMode::NamespaceStrict => {
            let all_cluster_scoped = prepared.iter().all(is_cluster_scoped);

            if all_cluster_scoped && !prepared.is_empty() {
                let rules: Vec<PolicyRule> = prepared.iter().map(to_policy_rule).collect();
                return render_cluster(subject, rules);
            }

            let mut by_namespace: BTreeMap<String, Vec<PolicyRule>> = BTreeMap::new();
            for rule in &prepared {
                if is_cluster_scoped(rule) {
                    // Mixed namespaced + cluster-scoped usage: cluster-scoped
                    // rules without a namespace have nowhere to live under
                    // NamespaceStrict unless everything is cluster-scoped, so
                    // they are dropped from the namespaced emission (the
                    // ClusterScopeAllowed strategy exists for that case).
                    continue;
                }
                by_namespace
                    .entry(rule.namespace.clone())
                    .or_default()
                    .push(to_policy_rule(rule));
            }

            let mut manifests = Vec::new();
            for (namespace, rules) in by_namespace {
                manifests.extend(render_namespaced(subject, &namespace, rules));
            }
            manifests
        }
    }
}
