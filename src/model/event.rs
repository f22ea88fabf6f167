//! Canonical audit event — the common currency every ingestor produces.

use serde::{Deserialize, Serialize};

/// Where an event came from, for provenance and dedup-window bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SourceType {
    File,
    Webhook,
    Cloud,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Provenance {
    pub source_type: SourceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition: Option<String>,
}

/// An object reference as it appears in `objectRef` of the Kubernetes audit
/// event schema (v1). All fields are optional because non-resource-URL
/// requests carry none of them.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectRef {
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub resource: Option<String>,
    #[serde(default)]
    pub subresource: Option<String>,
    #[serde(rename = "apiGroup", default)]
    pub api_group: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserInfo {
    pub username: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseStatus {
    #[serde(default)]
    pub code: u32,
}

/// The wire shape of a single Kubernetes audit event (schema v1). Only the
/// fields this system needs are modeled; unknown fields are ignored by
/// `serde_json` by default.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAuditEvent {
    #[serde(rename = "auditID")]
    pub audit_id: String,
    #[serde(rename = "requestReceivedTimestamp")]
    pub request_received_timestamp: chrono::DateTime<chrono::Utc>,
    pub user: UserInfo,
    #[serde(default)]
    pub verb: String,
    #[serde(rename = "objectRef", default)]
    pub object_ref: Option<ObjectRef>,
    #[serde(rename = "requestURI", default)]
    pub request_uri: String,
    #[serde(rename = "responseStatus", default)]
    pub response_status: ResponseStatus,
}

/// The batched envelope the webhook ingestor additionally accepts.
#[derive(Debug, Clone, Deserialize)]
pub struct EventList {
    pub items: Vec<RawAuditEvent>,
}

/// The canonical, immutable event every ingestor emits on its channel,
/// regardless of source. `id` is used for webhook-side deduplication and
/// is otherwise inert (it is not part of the aggregation key).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub id: String,
    pub received_at: chrono::DateTime<chrono::Utc>,
    pub username: String,
    pub verb: String,
    pub resource: String,
    pub subresource: String,
    pub api_group: String,
    pub namespace: String,
    pub request_uri: String,
    pub response_status: u32,
    pub provenance: Provenance,
}

impl AuditEvent {
    /// Build a canonical event from the raw wire schema, stamping provenance.
    pub fn from_raw(raw: RawAuditEvent, provenance: Provenance) -> Self {
        let object_ref = raw.object_ref.unwrap_or_default();
        AuditEvent {
            id: raw.audit_id,
            received_at: raw.request_received_timestamp,
            username: raw.user.username,
            verb: raw.verb,
            resource: object_ref.resource.unwrap_or_default(),
            subresource: object_ref.subresource.unwrap_or_default(),
            api_group: object_ref.api_group.unwrap_or_default(),
            namespace: object_ref.namespace.unwrap_or_default(),
            request_uri: raw.request_uri,
            response_status: raw.response_status.code,
            provenance,
        }
    }
}

/// The canonical identity extracted from an event's username.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Subject {
    ServiceAccount { namespace: String, name: String },
    User { name: String },
    Group { name: String },
}

impl Subject {
    /// The namespace a `PolicyReport` for this subject should live in when
    /// no source namespace override applies: `Some` for ServiceAccount,
    /// `None` for User/Group (invariant 3 of the data model).
    pub fn own_namespace(&self) -> Option<&str> {
        match self {
            Subject::ServiceAccount { namespace, .. } => Some(namespace.as_str()),
            Subject::User { .. } | Subject::Group { .. } => None,
        }
    }

    /// Stable key used to key per-subject aggregators: `Kind/Namespace?/Name`.
    pub fn key(&self) -> String {
        match self {
            Subject::ServiceAccount { namespace, name } => {
                format!("ServiceAccount/{namespace}/{name}")
            }
            Subject::User { name } => format!("User/{name}"),
            Subject::Group { name } => format!("Group/{name}"),
        }
    }
}
