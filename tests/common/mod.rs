use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use rbac_loom::error::StatusWriteError;
use rbac_loom::host::StatusWriter;
use rbac_loom::model::report::PolicyReportStatus;

/// One JSON-lines audit record in schema v1 shape, for writing into a
/// temp file the `FileIngestor` tails.
pub fn audit_line(id: &str, username: &str, verb: &str, namespace: &str, resource: &str) -> String {
    format!(
        r#"{{"auditID":"{id}","requestReceivedTimestamp":"2024-01-01T00:00:00Z","user":{{"username":"{username}"}},"verb":"{verb}","objectRef":{{"namespace":"{namespace}","resource":"{resource}"}},"requestURI":"/api/v1/namespaces/{namespace}/{resource}","responseStatus":{{"code":200}}}}"#
    )
}

pub fn audit_line_subresource(
    id: &str,
    username: &str,
    verb: &str,
    namespace: &str,
    resource: &str,
    subresource: &str,
) -> String {
    format!(
        r#"{{"auditID":"{id}","requestReceivedTimestamp":"2024-01-01T00:00:00Z","user":{{"username":"{username}"}},"verb":"{verb}","objectRef":{{"namespace":"{namespace}","resource":"{resource}","subresource":"{subresource}"}},"requestURI":"/api/v1/namespaces/{namespace}/{resource}/x/{subresource}","responseStatus":{{"code":200}}}}"#
    )
}

pub fn audit_line_api_group(
    id: &str,
    username: &str,
    verb: &str,
    namespace: &str,
    resource: &str,
    api_group: &str,
) -> String {
    format!(
        r#"{{"auditID":"{id}","requestReceivedTimestamp":"2024-01-01T00:00:00Z","user":{{"username":"{username}"}},"verb":"{verb}","objectRef":{{"namespace":"{namespace}","resource":"{resource}","apiGroup":"{api_group}"}},"requestURI":"/apis/{api_group}/v1/namespaces/{namespace}/{resource}","responseStatus":{{"code":200}}}}"#
    )
}

/// Captures the last status written per `namespace/name` key so integration
/// tests can assert on the final `PolicyReportStatus` without a cluster.
#[derive(Default)]
pub struct RecordingStatusWriter {
    pub written: Mutex<HashMap<String, PolicyReportStatus>>,
}

impl RecordingStatusWriter {
    pub fn get(&self, namespace: Option<&str>, name: &str) -> Option<PolicyReportStatus> {
        let key = format!("{}/{name}", namespace.unwrap_or("-"));
        self.written.lock().unwrap().get(&key).cloned()
    }
}

#[async_trait]
impl StatusWriter<PolicyReportStatus> for RecordingStatusWriter {
    async fn try_update(
        &self,
        name: &str,
        namespace: Option<&str>,
        mutate: Box<dyn Fn(PolicyReportStatus) -> PolicyReportStatus + Send + Sync>,
    ) -> Result<(), StatusWriteError> {
        let key = format!("{}/{name}", namespace.unwrap_or("-"));
        let mut written = self.written.lock().unwrap();
        let current = written.get(&key).cloned().unwrap_or_default();
        written.insert(key, mutate(current));
        Ok(())
    }
}
