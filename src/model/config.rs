//! `SourceConfig` — the configuration object consumed per source, modeled
//! as a `kube::CustomResource`: the host stores and watches it, we only
//! define its shape and the pure validation that turns it into a runnable
//! pipeline.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::model::checkpoint::{CloudCheckpointStatus, Condition};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum SourceKind {
    File,
    Webhook,
    Cloud,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LocationConfig {
    /// File mode: path to the JSON-lines audit log.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WebhookConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_secret_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ca_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_per_second: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_request_body_bytes: Option<u64>,
    /// How many recent event ids the in-memory LRU dedup cache retains.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dedup_capacity: Option<usize>,
}

impl WebhookConfig {
    pub fn rate_limit_per_second(&self) -> u32 {
        self.rate_limit_per_second.unwrap_or(100)
    }

    pub fn max_request_body_bytes(&self) -> u64 {
        self.max_request_body_bytes.unwrap_or(1024 * 1024)
    }

    pub fn dedup_capacity(&self) -> usize {
        self.dedup_capacity.unwrap_or(4096)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum CloudProvider {
    EventHub,
    PubSub,
    LogStream,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CloudConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<CloudProvider>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials_ref: Option<String>,
    /// Required identity stamp for multi-cluster buses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_identity: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum FilterAction {
    Allow,
    Deny,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FilterRuleConfig {
    pub action: Option<FilterAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_pattern: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum ScopeMode {
    #[default]
    NamespaceStrict,
    ClusterScopeAllowed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum VerbMerge {
    #[default]
    Smart,
    Exact,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum Wildcards {
    #[default]
    Forbidden,
    Safe,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PolicyStrategyConfig {
    #[serde(default)]
    pub scope_mode: ScopeMode,
    #[serde(default)]
    pub verb_merge: VerbMerge,
    #[serde(default)]
    pub wildcards: Wildcards,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<u32>,
}

impl CheckpointConfig {
    pub fn interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.interval_seconds.unwrap_or(30))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LimitsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_rules_per_report: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention_days: Option<u32>,
}

impl LimitsConfig {
    pub fn max_rules_per_report(&self) -> usize {
        self.max_rules_per_report.unwrap_or(200) as usize
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(self.retention_days.unwrap_or(30) as i64)
    }
}

/// A configured input — file path, webhook endpoint, or cloud message bus —
/// to which one pipeline is attached.
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "rbacloom.io",
    version = "v1",
    kind = "AuditSource",
    plural = "auditsources",
    status = "AuditSourceStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct AuditSourceSpec {
    pub source_type: Option<SourceKind>,

    #[serde(default)]
    pub location: LocationConfig,

    #[serde(default)]
    pub webhook: WebhookConfig,

    #[serde(default)]
    pub cloud: CloudConfig,

    /// Drop `system:*` non-SA users before filter evaluation. Default true.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore_system_users: Option<bool>,

    #[serde(default)]
    pub filters: Vec<FilterRuleConfig>,

    #[serde(default)]
    pub policy_strategy: PolicyStrategyConfig,

    #[serde(default)]
    pub checkpoint: CheckpointConfig,

    #[serde(default)]
    pub limits: LimitsConfig,

    /// Monotonically increasing version; the supervisor only restarts a
    /// running pipeline when this changes.
    #[serde(default)]
    pub config_version: u64,
}

impl AuditSourceSpec {
    pub fn ignore_system_users(&self) -> bool {
        self.ignore_system_users.unwrap_or(true)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuditSourceStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_offset: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inode: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_checkpoint: Option<CloudCheckpointStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_timestamp: Option<String>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}
