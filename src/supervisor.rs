//! Per-source pipeline registry, driven by a host reconciliation callback.
//! Owns no watch loop of its own — the host's `kube::runtime::Controller`
//! (or any other reconciliation driver) calls `reconcile` per tick.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{ConfigError, PipelineError};
use crate::host::StatusWriter;
use crate::ingest::Ingestor;
use crate::model::config::{AuditSourceSpec, SourceKind};
use crate::model::report::PolicyReportStatus;
use crate::pipeline::{self, PipelineConfig};
use crate::resolver::RbacInventory;

/// Identifies a configured source; typically `namespace/name` of the
/// backing `AuditSource` object.
pub type SourceId = String;

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("unknown source type for {0}")]
    UnknownSourceType(SourceId),
}

/// What `reconcile` did, surfaced mainly for logging/testing — the
/// function itself already performed the effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileAction {
    Started,
    Restarted,
    Unchanged,
    Stopped,
    NotReady,
}

struct PipelineHandle {
    cancel: CancellationToken,
    config_version: u64,
    join: JoinHandle<()>,
}

/// Builds the concrete `Ingestor` for a source's configured type. Kept as
/// a trait so tests can substitute a fixed ingestor without touching the
/// filesystem or network.
pub trait IngestorFactory: Send + Sync {
    fn build(&self, spec: &AuditSourceSpec) -> Result<Box<dyn Ingestor>, SupervisorError>;
}

/// Registry of running per-source pipelines, guarded by a single lock per
/// the concurrency contract: no two reconciles for different sources
/// contend on anything but this map.
pub struct Supervisor {
    pipelines: Mutex<HashMap<SourceId, PipelineHandle>>,
    ingestor_factory: Arc<dyn IngestorFactory>,
    inventory: Arc<dyn RbacInventory>,
    status_writer: Arc<dyn StatusWriter<PolicyReportStatus>>,
}

impl Supervisor {
    pub fn new(
        ingestor_factory: Arc<dyn IngestorFactory>,
        inventory: Arc<dyn RbacInventory>,
        status_writer: Arc<dyn StatusWriter<PolicyReportStatus>>,
    ) -> Self {
        Self {
            pipelines: Mutex::new(HashMap::new()),
            ingestor_factory,
            inventory,
            status_writer,
        }
    }

    /// Reconcile one source against its (possibly absent) desired spec.
    /// `spec = None` means the source object is gone. `namespace` is the
    /// backing `AuditSource` object's own namespace, used as the report
    /// namespace for subjects (User/Group) that have none of their own.
    pub async fn reconcile(
        &self,
        source_id: &SourceId,
        namespace: &str,
        spec: Option<&AuditSourceSpec>,
    ) -> Result<ReconcileAction, SupervisorError> {
        let mut pipelines = self.pipelines.lock().await;

        let Some(spec) = spec else {
            if let Some(handle) = pipelines.remove(source_id) {
                handle.cancel.cancel();
                info!(source = %source_id, "source removed, pipeline cancelled");
                return Ok(ReconcileAction::Stopped);
            }
            return Ok(ReconcileAction::Unchanged);
        };

        if validate_source_kind(spec).is_err() {
            return Ok(ReconcileAction::NotReady);
        }

        if let Some(existing) = pipelines.get(source_id) {
            if existing.config_version == spec.config_version {
                return Ok(ReconcileAction::Unchanged);
            }
            existing.cancel.cancel();
            info!(source = %source_id, "configuration changed, restarting pipeline");
        }
        let restarted = pipelines.contains_key(source_id);

        let config = match PipelineConfig::from_spec(source_id.clone(), Some(namespace.to_string()), spec) {
            Ok(config) => config,
            Err(e) => {
                warn!(source = %source_id, error = %e, "pipeline configuration invalid, not starting");
                return Err(e.into());
            }
        };

        let ingestor = self.ingestor_factory.build(spec)?;
        let cancel = CancellationToken::new();
        let inventory = self.inventory.clone();
        let status_writer = self.status_writer.clone();
        let child_cancel = cancel.clone();
        let task_source_id = source_id.clone();

        let join = tokio::spawn(async move {
            if let Err(e) = run_detached(config, ingestor, child_cancel, inventory, status_writer).await {
                warn!(source = %task_source_id, error = %e, "pipeline exited with error");
            }
        });

        pipelines.insert(
            source_id.clone(),
            PipelineHandle {
                cancel,
                config_version: spec.config_version,
                join,
            },
        );

        Ok(if restarted {
            ReconcileAction::Restarted
        } else {
            ReconcileAction::Started
        })
    }

    pub async fn shutdown(&self) {
        let mut pipelines = self.pipelines.lock().await;
        for (_, handle) in pipelines.drain() {
            handle.cancel.cancel();
            let _ = handle.join.await;
        }
    }

    pub async fn running_sources(&self) -> Vec<SourceId> {
        self.pipelines.lock().await.keys().cloned().collect()
    }
}

async fn run_detached(
    config: PipelineConfig,
    ingestor: Box<dyn Ingestor>,
    cancel: CancellationToken,
    inventory: Arc<dyn RbacInventory>,
    status_writer: Arc<dyn StatusWriter<PolicyReportStatus>>,
) -> Result<(), PipelineError> {
    pipeline::run(config, ingestor, cancel, inventory.as_ref(), status_writer.as_ref()).await
}

pub fn validate_source_kind(spec: &AuditSourceSpec) -> Result<SourceKind, ConfigError> {
    spec.source_type
        .ok_or(ConfigError::MissingField { field: "sourceType" })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::NullStatusWriter;
    use crate::ingest::file::FileIngestor;
    use crate::resolver::InMemoryRbacInventory;

    struct FileFactory;

    impl IngestorFactory for FileFactory {
        fn build(&self, spec: &AuditSourceSpec) -> Result<Box<dyn Ingestor>, SupervisorError> {
            let path = spec
                .location
                .path
                .clone()
                .ok_or(ConfigError::MissingField { field: "location.path" })?;
            Ok(Box::new(FileIngestor::new(path, None)))
        }
    }

    fn supervisor() -> Supervisor {
        Supervisor::new(
            Arc::new(FileFactory),
            Arc::new(InMemoryRbacInventory::default()),
            Arc::new(NullStatusWriter),
        )
    }

    #[tokio::test]
    async fn reconcile_with_missing_spec_is_a_noop_when_nothing_running() {
        let sup = supervisor();
        let action = sup.reconcile(&"src-1".to_string(), "ns1", None).await.unwrap();
        assert_eq!(action, ReconcileAction::Unchanged);
    }

    #[tokio::test]
    async fn reconcile_without_source_type_is_not_ready() {
        let sup = supervisor();
        let spec = AuditSourceSpec::default();
        let action = sup.reconcile(&"src-1".to_string(), "ns1", Some(&spec)).await.unwrap();
        assert_eq!(action, ReconcileAction::NotReady);
    }

    #[tokio::test]
    async fn reconcile_starts_then_is_a_noop_at_same_version() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let sup = supervisor();
        let spec = AuditSourceSpec {
            source_type: Some(SourceKind::File),
            location: crate::model::config::LocationConfig {
                path: Some(file.path().to_string_lossy().to_string()),
            },
            checkpoint: crate::model::config::CheckpointConfig {
                interval_seconds: Some(3600),
                ..Default::default()
            },
            config_version: 1,
            ..Default::default()
        };
        let id = "src-1".to_string();
        let first = sup.reconcile(&id, "ns1", Some(&spec)).await.unwrap();
        assert_eq!(first, ReconcileAction::Started);
        let second = sup.reconcile(&id, "ns1", Some(&spec)).await.unwrap();
        assert_eq!(second, ReconcileAction::Unchanged);
        sup.shutdown().await;
    }

    #[tokio::test]
    async fn reconcile_restarts_on_config_version_change() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let sup = supervisor();
        let mut spec = AuditSourceSpec {
            source_type: Some(SourceKind::File),
            location: crate::model::config::LocationConfig {
                path: Some(file.path().to_string_lossy().to_string()),
            },
            checkpoint: crate::model::config::CheckpointConfig {
                interval_seconds: Some(3600),
                ..Default::default()
            },
            config_version: 1,
            ..Default::default()
        };
        let id = "src-1".to_string();
        sup.reconcile(&id, "ns1", Some(&spec)).await.unwrap();
        spec.config_version = 2;
        let action = sup.reconcile(&id, "ns1", Some(&spec)).await.unwrap();
        assert_eq!(action, ReconcileAction::Restarted);
        sup.shutdown().await;
    }

    #[tokio::test]
    async fn reconcile_stops_pipeline_when_source_removed() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let sup = supervisor();
        let spec = AuditSourceSpec {
            source_type: Some(SourceKind::File),
            location: crate::model::config::LocationConfig {
                path: Some(file.path().to_string_lossy().to_string()),
            },
            checkpoint: crate::model::config::CheckpointConfig {
                interval_seconds: Some(3600),
                ..Default::default()
            },
            config_version: 1,
            ..Default::default()
        };
        let id = "src-1".to_string();
        sup.reconcile(&id, "ns1", Some(&spec)).await.unwrap();
        let action = sup.reconcile(&id, "ns1", None).await.unwrap();
        assert_eq!(action, ReconcileAction::Stopped);
    }

    #[tokio::test]
    async fn invalid_filter_config_fails_reconcile() {
        let sup = supervisor();
        let spec = AuditSourceSpec {
            source_type: Some(SourceKind::File),
            location: crate::model::config::LocationConfig {
                path: Some("/does/not/matter".to_string()),
            },
            filters: vec![crate::model::config::FilterRuleConfig {
                action: None,
                user_pattern: None,
                namespace_pattern: None,
            }],
            config_version: 1,
            ..Default::default()
        };
        let err = sup.reconcile(&"src-1".to_string(), "ns1", Some(&spec)).await.unwrap_err();
        assert!(matches!(err, SupervisorError::Config(ConfigError::EmptyFilterRule { .. })));
    }
}
