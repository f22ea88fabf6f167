mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, CrdAction, Commands, WebhookAction};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Check => commands::check::run().await?,
        Commands::Crd { action } => match action {
            CrdAction::Generate => commands::crd::generate()?,
            CrdAction::Install => commands::crd::install().await?,
        },
        Commands::Run { source, namespace } => commands::run::run(&source, namespace).await?,
        Commands::Report {
            kind,
            name,
            namespace,
            observed,
        } => {
            commands::report::run(&kind, &name, namespace.as_deref(), observed.as_deref()).await?;
        }
        Commands::Webhook { action } => match action {
            WebhookAction::Serve {
                addr,
                tls_cert,
                tls_key,
                client_ca,
            } => commands::webhook::serve(&addr, &tls_cert, &tls_key, client_ca.as_deref()).await?,
            WebhookAction::CertDev {
                service_name,
                namespace,
                output_dir,
                ip_sans,
            } => commands::webhook::cert_dev(&service_name, &namespace, &output_dir, &ip_sans)?,
        },
        Commands::Metrics => println!("{}", rbac_loom::metrics::render()),
    }

    Ok(())
}
