//! Per-source checkpoint state, mirrored into the source's observable status.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Opaque per-source resume state. The shape differs by ingestor; the
/// supervisor switches on the variant rather than downcasting a trait
/// object (see the "polymorphic ingestors" design note).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Checkpoint {
    File {
        file_offset: u64,
        inode: u64,
        #[serde(default)]
        last_timestamp: Option<chrono::DateTime<chrono::Utc>>,
    },
    Cloud {
        partition_offsets: BTreeMap<String, u64>,
        #[serde(default)]
        last_timestamp: Option<chrono::DateTime<chrono::Utc>>,
    },
    /// The webhook source is stateless; resumption is the apiserver's concern.
    Webhook,
}

impl Checkpoint {
    pub fn last_timestamp(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        match self {
            Checkpoint::File { last_timestamp, .. } => *last_timestamp,
            Checkpoint::Cloud { last_timestamp, .. } => *last_timestamp,
            Checkpoint::Webhook => None,
        }
    }
}

/// The status shape mirrored onto the source object, matching the layout
/// in the external-interfaces section of the design doc.
#[derive(Debug, Clone, Default, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CloudCheckpointStatus {
    #[serde(default)]
    pub partition_offsets: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: String,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn file_checkpoint_roundtrips() {
        let cp = Checkpoint::File {
            file_offset: 128,
            inode: 42,
            last_timestamp: Some(Utc::now()),
        };
        let json = serde_json::to_string(&cp).unwrap();
        let back: Checkpoint = serde_json::from_str(&json).unwrap();
        assert_eq!(cp, back);
    }

    #[test]
    fn webhook_checkpoint_has_no_timestamp() {
        assert_eq!(Checkpoint::Webhook.last_timestamp(), None);
    }
}
