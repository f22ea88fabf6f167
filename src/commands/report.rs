//! Offline resolve + diff for one subject: print effective permissions and,
//! if an observed-rules document is given, a compliance report against
//! them, without starting any ingestor.

use anyhow::{Context, Result};

use rbac_loom::diff::diff;
use rbac_loom::model::event::Subject;
use rbac_loom::model::rule::ObservedRule;
use rbac_loom::resolver::{resolve_effective_rules, KubeRbacInventory, RbacInventory};

pub async fn run(kind: &str, name: &str, namespace: Option<&str>, observed_path: Option<&str>) -> Result<()> {
    let subject = parse_subject(kind, name, namespace)?;

    let client = kube::Client::try_default()
        .await
        .context("connecting to cluster (kubeconfig required for `report`)")?;
    let inventory = KubeRbacInventory::new(client);

    let effective = resolve_effective_rules(&inventory, &subject).await?;
    println!("Effective rules for {}:", subject.key());
    for rule in &effective {
        println!(
            "  - apiGroups={:?} resources={:?} verbs={:?} namespace={:?}",
            rule.api_groups, rule.resources, rule.verbs, rule.namespace
        );
    }

    if let Some(path) = observed_path {
        let raw = std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
        let observed: Vec<ObservedRule> = serde_yaml::from_str(&raw).context("parsing observed rules")?;
        match diff(&observed, &effective) {
            Some(result) => {
                println!("\nCompliance report:");
                println!("  score:     {}", result.report.score);
                println!("  severity:  {:?}", result.report.severity);
                println!("  used:      {}", result.report.used_count);
                println!("  excess:    {}", result.report.excess_count);
                println!("  uncovered: {}", result.report.uncovered_count);
                if !result.report.sensitive_excess.is_empty() {
                    println!("  sensitive excess grants:");
                    for resource in &result.report.sensitive_excess {
                        println!("    - {resource}");
                    }
                }
            }
            None => {
                println!("\nCompliance report: undefined (no effective rules to evaluate observed usage against)");
            }
        }
    }

    Ok(())
}

fn parse_subject(kind: &str, name: &str, namespace: Option<&str>) -> Result<Subject> {
    match kind.to_lowercase().as_str() {
        "user" => Ok(Subject::User { name: name.to_string() }),
        "group" => Ok(Subject::Group { name: name.to_string() }),
        "serviceaccount" | "sa" => {
            let namespace = namespace
                .context("--namespace is required for a serviceaccount subject")?
                .to_string();
            Ok(Subject::ServiceAccount {
                namespace,
                name: name.to_string(),
            })
        }
        other => anyhow::bail!("unknown subject kind '{other}', expected user, group, or serviceaccount"),
    }
}
