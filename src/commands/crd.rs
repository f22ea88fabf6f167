//! Generate and install the `AuditSource` and `PolicyReport` CRDs.

use anyhow::Result;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::{Api, Client, CustomResourceExt};

use rbac_loom::model::config::AuditSource;
use rbac_loom::model::report::PolicyReport;

/// Print both CRDs' YAML to stdout for `kubectl apply -f`.
pub fn generate() -> Result<()> {
    let source_crd = AuditSource::crd();
    let report_crd = PolicyReport::crd();
    println!("{}", serde_yaml::to_string(&source_crd)?);
    println!("---");
    println!("{}", serde_yaml::to_string(&report_crd)?);
    Ok(())
}

/// Apply both CRDs directly to the connected cluster.
pub async fn install() -> Result<()> {
    let client = Client::try_default().await?;
    let crds: Api<CustomResourceDefinition> = Api::all(client);

    for crd in [AuditSource::crd(), PolicyReport::crd()] {
        let name = crd.metadata.name.clone().unwrap_or_default();
        match crds.create(&Default::default(), &crd).await {
            Ok(_) => println!("CRD '{name}' installed successfully"),
            Err(kube::Error::Api(err)) if err.code == 409 => {
                println!("CRD '{name}' already exists, skipping");
            }
            Err(e) => return Err(e.into()),
        }
    }

    Ok(())
}
