//! Standalone webhook ingestor commands: `serve` runs the ingestor alone
//! (printing received events, for local testing of a sender), and
//! `cert-dev` generates a throwaway self-signed CA + server cert — a
//! developer convenience only. This crate otherwise consumes already
//! issued TLS material; it never requests or rotates certificates.

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::info;

use rbac_loom::ingest::webhook::{TlsIdentity, WebhookIngestor};
use rbac_loom::ingest::Ingestor;

pub async fn serve(addr: &str, tls_cert: &str, tls_key: &str, client_ca: Option<&str>) -> Result<()> {
    let cert_pem = std::fs::read(tls_cert).with_context(|| format!("reading {tls_cert}"))?;
    let key_pem = std::fs::read(tls_key).with_context(|| format!("reading {tls_key}"))?;
    let client_ca_pem = client_ca
        .map(std::fs::read)
        .transpose()
        .context("reading client CA bundle")?;

    let mut ingestor = WebhookIngestor::new(
        addr.parse().context("parsing --addr")?,
        TlsIdentity {
            cert_pem,
            key_pem,
            client_ca_pem,
        },
        100,
        1024 * 1024,
        4096,
    );

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        shutdown.cancel();
    });

    let mut rx = ingestor.start(cancel).await?;
    info!(%addr, "webhook ingestor serving standalone, printing received events");
    while let Some(event) = rx.recv().await {
        println!("{}", serde_json::to_string(&event)?);
    }

    Ok(())
}

/// Generate a throwaway self-signed CA + server certificate for local
/// testing of the webhook ingestor. Not suitable for any real deployment.
pub fn cert_dev(service_name: &str, namespace: &str, output_dir: &str, ip_sans: &[String]) -> Result<()> {
    println!("Generating self-signed TLS certificates for local development...\n");

    let (ca_pem, cert_pem, key_pem) = generate_self_signed_certs(service_name, namespace, ip_sans)?;

    let output_path = std::path::Path::new(output_dir);
    if !output_path.exists() {
        std::fs::create_dir_all(output_path).context("creating output directory")?;
    }

    let ca_path = output_path.join("ca.crt");
    let cert_path = output_path.join("tls.crt");
    let key_path = output_path.join("tls.key");

    std::fs::write(&ca_path, &ca_pem).context("writing ca.crt")?;
    std::fs::write(&cert_path, &cert_pem).context("writing tls.crt")?;
    std::fs::write(&key_path, &key_pem).context("writing tls.key")?;

    println!("  CA certificate ....... {}", ca_path.display());
    println!("  Server certificate ... {}", cert_path.display());
    println!("  Server key ........... {}", key_path.display());
    println!();
    println!("  SANs:");
    println!("    - {service_name}.{namespace}.svc");
    println!("    - {service_name}.{namespace}.svc.cluster.local");
    for ip in ip_sans {
        println!("    - {ip} (IP)");
    }

    Ok(())
}

fn generate_self_signed_certs(
    service_name: &str,
    namespace: &str,
    ip_sans: &[String],
) -> Result<(String, String, String)> {
    use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair, SanType};
    use std::net::IpAddr;

    let mut ca_params = CertificateParams::default();
    ca_params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
    let mut ca_dn = DistinguishedName::new();
    ca_dn.push(DnType::CommonName, "rbac-loom-webhook-ca");
    ca_params.distinguished_name = ca_dn;

    let ca_key = KeyPair::generate().context("generating CA key pair")?;
    let ca_cert = ca_params
        .self_signed(&ca_key)
        .context("self-signing CA certificate")?;

    let mut server_params = CertificateParams::default();
    let mut server_dn = DistinguishedName::new();
    server_dn.push(DnType::CommonName, format!("{service_name}.{namespace}.svc"));
    server_params.distinguished_name = server_dn;

    let mut sans = vec![
        SanType::DnsName(
            format!("{service_name}.{namespace}.svc")
                .try_into()
                .context("invalid DNS SAN")?,
        ),
        SanType::DnsName(
            format!("{service_name}.{namespace}.svc.cluster.local")
                .try_into()
                .context("invalid DNS SAN")?,
        ),
    ];
    for ip_str in ip_sans {
        let ip: IpAddr = ip_str.parse().with_context(|| format!("invalid IP SAN: {ip_str}"))?;
        sans.push(SanType::IpAddress(ip));
    }
    server_params.subject_alt_names = sans;

    let server_key = KeyPair::generate().context("generating server key pair")?;
    let server_cert = server_params
        .signed_by(&server_key, &ca_cert, &ca_key)
        .context("signing server certificate")?;

    Ok((ca_cert.pem(), server_cert.pem(), server_key.serialize_pem()))
}
