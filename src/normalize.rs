//! Pure normalization: subject extraction from `user.username`, and event
//! canonicalization into a `CanonicalRule`. Stateless — identical inputs
//! always yield identical outputs.

use crate::model::event::{AuditEvent, Subject};
use crate::model::rule::{CanonicalRule, RECOGNIZED_VERBS};

/// Legacy API group migrated to its successor. This is the only group
/// migration the normalizer performs.
const LEGACY_GROUP: &str = "extensions";
const MIGRATED_GROUP: &str = "apps";

/// Extract the canonical subject from a raw username, honoring
/// `ignore_system_users` for non-serviceaccount `system:` identities.
///
/// Returns `None` when the username should be dropped entirely (a
/// `system:*` user, not a service account, while `ignore_system_users` is
/// set).
pub fn extract_subject(username: &str, ignore_system_users: bool) -> Option<Subject> {
    if let Some(rest) = username.strip_prefix("system:serviceaccount:") {
        let mut parts = rest.splitn(2, ':');
        let namespace = parts.next().unwrap_or_default().to_string();
        let name = parts.next().unwrap_or_default().to_string();
        return Some(Subject::ServiceAccount { namespace, name });
    }

    if username.starts_with("system:") {
        return if ignore_system_users {
            None
        } else {
            Some(Subject::User {
                name: username.to_string(),
            })
        };
    }

    Some(Subject::User {
        name: username.to_string(),
    })
}

/// Normalize a verb to lowercase, returning `None` for verbs outside the
/// recognized set.
pub fn normalize_verb(verb: &str) -> Option<String> {
    let lower = verb.to_lowercase();
    if RECOGNIZED_VERBS.contains(&lower.as_str()) {
        Some(lower)
    } else {
        None
    }
}

/// Migrate a legacy API group to its current name. The only migration
/// performed today is `extensions` → `apps`.
pub fn migrate_api_group(api_group: &str) -> String {
    if api_group == LEGACY_GROUP {
        MIGRATED_GROUP.to_string()
    } else {
        api_group.to_string()
    }
}

/// Build the canonical rule for an event whose verb has already been
/// recognized (callers are expected to call `normalize_verb` first and
/// drop events whose verb doesn't survive it).
pub fn canonicalize(event: &AuditEvent, verb: &str) -> CanonicalRule {
    if event.resource.is_empty() {
        // Non-resource URL request: use the request URI as-is, no api group.
        return CanonicalRule {
            api_group: String::new(),
            resource: String::new(),
            verb: verb.to_string(),
            non_resource_url: event.request_uri.clone(),
            namespace: String::new(),
        };
    }

    let resource = if event.subresource.is_empty() {
        event.resource.clone()
    } else {
        format!("{}/{}", event.resource, event.subresource)
    };

    CanonicalRule {
        api_group: migrate_api_group(&event.api_group),
        resource,
        verb: verb.to_string(),
        non_resource_url: String::new(),
        namespace: event.namespace.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::event::{Provenance, SourceType};
    use chrono::Utc;

    fn event(resource: &str, subresource: &str, api_group: &str, namespace: &str) -> AuditEvent {
        AuditEvent {
            id: "1".into(),
            received_at: Utc::now(),
            username: "alice".into(),
            verb: "get".into(),
            resource: resource.into(),
            subresource: subresource.into(),
            api_group: api_group.into(),
            namespace: namespace.into(),
            request_uri: "/api/v1/namespaces/dev/pods".into(),
            response_status: 200,
            provenance: Provenance {
                source_type: SourceType::File,
                partition: None,
            },
        }
    }

    #[test]
    fn service_account_subject_parses_namespace_and_name() {
        let s = extract_subject("system:serviceaccount:team-a:backend", true).unwrap();
        assert_eq!(
            s,
            Subject::ServiceAccount {
                namespace: "team-a".into(),
                name: "backend".into()
            }
        );
    }

    #[test]
    fn system_user_dropped_by_default() {
        assert_eq!(extract_subject("system:kube-scheduler", true), None);
    }

    #[test]
    fn system_user_kept_when_not_ignored() {
        let s = extract_subject("system:kube-scheduler", false).unwrap();
        assert_eq!(
            s,
            Subject::User {
                name: "system:kube-scheduler".into()
            }
        );
    }

    #[test]
    fn plain_user_always_kept() {
        let s = extract_subject("alice", true).unwrap();
        assert_eq!(
            s,
            Subject::User {
                name: "alice".into()
            }
        );
    }

    #[test]
    fn verb_lowercased() {
        assert_eq!(normalize_verb("GET"), Some("get".to_string()));
    }

    #[test]
    fn unknown_verb_dropped() {
        assert_eq!(normalize_verb("connect"), None);
    }

    #[test]
    fn legacy_group_migrated_to_apps() {
        assert_eq!(migrate_api_group("extensions"), "apps");
        assert_eq!(migrate_api_group("batch"), "batch");
    }

    #[test]
    fn canonicalize_migrates_legacy_group() {
        let e = event("deployments", "", "extensions", "dev");
        let rule = canonicalize(&e, "get");
        assert_eq!(rule.api_group, "apps");
        assert_eq!(rule.resource, "deployments");
    }

    #[test]
    fn canonicalize_concatenates_subresource() {
        let e = event("pods", "exec", "", "dev");
        let rule = canonicalize(&e, "create");
        assert_eq!(rule.resource, "pods/exec");
    }

    #[test]
    fn canonicalize_non_resource_url() {
        let mut e = event("", "", "", "");
        e.request_uri = "/healthz".into();
        let rule = canonicalize(&e, "get");
        assert_eq!(rule.resource, "");
        assert_eq!(rule.non_resource_url, "/healthz");
    }

    #[test]
    fn normalizer_is_deterministic() {
        let e = event("pods", "exec", "extensions", "dev");
        let a = canonicalize(&e, "get");
        let b = canonicalize(&e, "get");
        assert_eq!(a, b);
    }
}
