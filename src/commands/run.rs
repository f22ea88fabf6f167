//! Drive a single source's pipeline to completion from a local `AuditSource`
//! YAML document. A developer convenience and the path integration tests
//! exercise directly; a real host instead drives many sources concurrently
//! through `supervisor::Supervisor::reconcile`.

use anyhow::{bail, Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::info;

use rbac_loom::host::{KubeStatusWriter, NullStatusWriter, StatusWriter};
use rbac_loom::ingest::file::FileIngestor;
use rbac_loom::ingest::webhook::{TlsIdentity, WebhookIngestor};
use rbac_loom::ingest::Ingestor;
use rbac_loom::model::config::{AuditSource, AuditSourceSpec, SourceKind};
use rbac_loom::model::report::{PolicyReport, PolicyReportStatus};
use rbac_loom::pipeline::{self, PipelineConfig};
use rbac_loom::resolver::{KubeRbacInventory, RbacInventory};

pub async fn run(source_path: &str, namespace: Option<String>) -> Result<()> {
    let raw = std::fs::read_to_string(source_path)
        .with_context(|| format!("reading source document {source_path}"))?;
    let spec: AuditSourceSpec =
        serde_yaml::from_str(&raw).context("parsing AuditSource spec")?;

    let ingestor = build_ingestor(&spec)?;
    let config = PipelineConfig::from_spec("cli-run", namespace, &spec)?;

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("received interrupt, shutting down pipeline");
        shutdown.cancel();
    });

    match kube::Client::try_default().await {
        Ok(client) => {
            let inventory = KubeRbacInventory::new(client.clone());
            let status_writer: KubeStatusWriter<PolicyReport> = KubeStatusWriter::new(client);
            run_with(config, ingestor, cancel, &inventory, &status_writer).await
        }
        Err(e) => {
            info!(error = %e, "no cluster reachable, resolving against an empty in-memory inventory and printing reports instead of writing status");
            let inventory = rbac_loom::resolver::InMemoryRbacInventory::default();
            let status_writer = NullStatusWriter;
            run_with(config, ingestor, cancel, &inventory, &status_writer).await
        }
    }
}

async fn run_with(
    config: PipelineConfig,
    ingestor: Box<dyn Ingestor>,
    cancel: CancellationToken,
    inventory: &dyn RbacInventory,
    status_writer: &dyn StatusWriter<PolicyReportStatus>,
) -> Result<()> {
    pipeline::run(config, ingestor, cancel, inventory, status_writer)
        .await
        .map_err(Into::into)
}

fn build_ingestor(spec: &AuditSourceSpec) -> Result<Box<dyn Ingestor>> {
    match spec.source_type {
        Some(SourceKind::File) => {
            let path = spec
                .location
                .path
                .clone()
                .context("file source requires location.path")?;
            Ok(Box::new(FileIngestor::new(path, None)))
        }
        Some(SourceKind::Webhook) => {
            let cert_pem = std::fs::read("tls.crt").context("reading tls.crt")?;
            let key_pem = std::fs::read("tls.key").context("reading tls.key")?;
            let addr = format!("0.0.0.0:{}", spec.webhook.port.unwrap_or(8443)).parse()?;
            Ok(Box::new(WebhookIngestor::new(
                addr,
                TlsIdentity {
                    cert_pem,
                    key_pem,
                    client_ca_pem: None,
                },
                spec.webhook.rate_limit_per_second(),
                spec.webhook.max_request_body_bytes(),
                spec.webhook.dedup_capacity(),
            )))
        }
        Some(SourceKind::Cloud) => {
            bail!("cloud sources are not wired into the standalone `run` command; embed the pipeline with a concrete MessageSource instead")
        }
        None => bail!("source document is missing sourceType"),
    }
}
