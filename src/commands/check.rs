//! Connectivity and RBAC read-permission sanity check, run before wiring up
//! a real `run` or letting a host start reconciling sources.

use k8s_openapi::api::rbac::v1::{ClusterRole, Role};
use kube::api::ListParams;
use kube::{Api, Client};

pub async fn run() -> anyhow::Result<()> {
    println!("Running cluster connectivity checks...\n");

    print!("  Kubeconfig .................. ");
    let client = match Client::try_default().await {
        Ok(c) => {
            println!("OK");
            c
        }
        Err(e) => {
            println!("FAIL");
            anyhow::bail!("cannot load kubeconfig: {e}");
        }
    };

    print!("  Cluster connection .......... ");
    let version = match client.apiserver_version().await {
        Ok(v) => {
            println!("OK (v{}.{})", v.major, v.minor);
            Some(v)
        }
        Err(e) => {
            println!("FAIL");
            println!("\n  Error: {e}");
            println!("  Hint:  is the cluster running? check with: kubectl cluster-info\n");
            return Ok(());
        }
    };

    print!("  List roles permission ........ ");
    let roles: Api<Role> = Api::all(client.clone());
    match roles.list(&ListParams::default().limit(1)).await {
        Ok(_) => println!("OK"),
        Err(e) => println!("FAIL ({e})"),
    }

    print!("  List cluster roles permission  ");
    let cluster_roles: Api<ClusterRole> = Api::all(client.clone());
    match cluster_roles.list(&ListParams::default().limit(1)).await {
        Ok(_) => println!("OK"),
        Err(e) => println!("FAIL ({e})"),
    }

    if let Some(v) = version {
        println!("\n  Kubernetes version: {}.{}", v.major, v.minor);
    }

    println!("\nAll checks completed.");
    Ok(())
}
