use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "rbac-loom")]
#[command(about = "RBAC usage mining and least-privilege policy synthesis")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check cluster connectivity and RBAC read permissions
    Check,

    /// Manage the AuditSource and PolicyReport CRDs
    Crd {
        #[command(subcommand)]
        action: CrdAction,
    },

    /// Run a single source's ingest → aggregate → synthesize pipeline
    /// against a local `AuditSource` YAML document (developer convenience;
    /// a host normally drives this via `supervisor::Supervisor::reconcile`)
    Run {
        /// Path to an `AuditSource` YAML document
        #[arg(long)]
        source: String,
        /// Namespace the `AuditSource` object lives in, used as the report
        /// namespace for User/Group subjects
        #[arg(long)]
        namespace: Option<String>,
    },

    /// Resolve effective permissions, diff against observed usage, and
    /// print a compliance report for one subject, against the connected
    /// cluster
    Report {
        /// Subject kind: user, group, or serviceaccount
        #[arg(long)]
        kind: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        namespace: Option<String>,
        /// Path to a `PolicyReport` status document holding observed rules
        /// (normally produced by `run`); without it, only effective
        /// permissions are printed.
        #[arg(long)]
        observed: Option<String>,
    },

    /// Manage the webhook ingestor
    Webhook {
        #[command(subcommand)]
        action: WebhookAction,
    },

    /// Print current process metrics in Prometheus text format
    Metrics,
}

#[derive(Subcommand)]
pub enum CrdAction {
    /// Print both CRDs' YAML to stdout
    Generate,
    /// Apply both CRDs to the connected cluster
    Install,
}

#[derive(Subcommand)]
pub enum WebhookAction {
    /// Start the webhook ingestor HTTPS server standalone, printing
    /// received events rather than running the full pipeline
    Serve {
        #[arg(long, default_value = "0.0.0.0:8443")]
        addr: String,
        #[arg(long, default_value = "tls.crt")]
        tls_cert: String,
        #[arg(long, default_value = "tls.key")]
        tls_key: String,
        #[arg(long)]
        client_ca: Option<String>,
    },
    /// Generate self-signed TLS certificates for local development only —
    /// this crate never requests or rotates certificates in production
    CertDev {
        #[arg(long, default_value = "rbac-loom-webhook")]
        service_name: String,
        #[arg(long, default_value = "default")]
        namespace: String,
        #[arg(long, default_value = ".")]
        output_dir: String,
        #[arg(long = "ip-san")]
        ip_sans: Vec<String>,
    },
}
