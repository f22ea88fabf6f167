//! `PolicyReport` — the per-subject output: observed rules, synthesized
//! policy documents, and a compliance sub-report.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::model::checkpoint::Condition;
use crate::model::rule::ObservedRule;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum Severity {
    Green,
    Yellow,
    Red,
}

impl Severity {
    pub fn from_score(score: u32) -> Self {
        if score >= 80 {
            Severity::Green
        } else if score >= 50 {
            Severity::Yellow
        } else {
            Severity::Red
        }
    }
}

/// {score∈[0,100], severity, usedCount, excessCount, uncoveredCount,
/// sensitiveExcess[], evaluatedAt}.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceReport {
    pub score: u32,
    pub severity: Severity,
    pub used_count: u32,
    pub excess_count: u32,
    pub uncovered_count: u32,
    #[serde(default)]
    pub sensitive_excess: Vec<String>,
    pub evaluated_at: chrono::DateTime<chrono::Utc>,
}

/// Serializable identity used as the report's spec key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum SubjectRef {
    ServiceAccount { namespace: String, name: String },
    User { name: String },
}

impl From<&crate::model::event::Subject> for Option<SubjectRef> {
    fn from(s: &crate::model::event::Subject) -> Self {
        match s {
            crate::model::event::Subject::ServiceAccount { namespace, name } => {
                Some(SubjectRef::ServiceAccount {
                    namespace: namespace.clone(),
                    name: name.clone(),
                })
            }
            crate::model::event::Subject::User { name } => Some(SubjectRef::User {
                name: name.clone(),
            }),
            // Group is never a policy subject.
            crate::model::event::Subject::Group { .. } => None,
        }
    }
}

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "rbacloom.io",
    version = "v1",
    kind = "PolicyReport",
    plural = "policyreports",
    status = "PolicyReportStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct PolicyReportSpec {
    pub subject: SubjectRef,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SuggestedPolicy {
    /// Ordered list of complete RBAC documents as text (YAML), one per
    /// generated Role/RoleBinding/ClusterRole/ClusterRoleBinding.
    #[serde(default)]
    pub manifests: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PolicyReportStatus {
    #[serde(default)]
    pub observed_rules: Vec<ObservedRule>,
    #[serde(default)]
    pub suggested_policy: SuggestedPolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compliance: Option<ComplianceReport>,
    #[serde(default)]
    pub events_processed: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_processed_time: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::CustomResourceExt;

    #[test]
    fn crd_generates_valid_yaml() {
        let crd = PolicyReport::crd();
        let yaml = serde_yaml::to_string(&crd).expect("should serialize");
        assert!(yaml.contains("rbacloom.io"));
        assert!(yaml.contains("PolicyReport"));
    }

    #[test]
    fn severity_bands() {
        assert_eq!(Severity::from_score(100), Severity::Green);
        assert_eq!(Severity::from_score(80), Severity::Green);
        assert_eq!(Severity::from_score(79), Severity::Yellow);
        assert_eq!(Severity::from_score(50), Severity::Yellow);
        assert_eq!(Severity::from_score(49), Severity::Red);
        assert_eq!(Severity::from_score(0), Severity::Red);
    }

    #[test]
    fn group_subject_has_no_report_ref() {
        let g = crate::model::event::Subject::Group {
            name: "devs".into(),
        };
        let r: Option<SubjectRef> = (&g).into();
        assert!(r.is_none());
    }
}
