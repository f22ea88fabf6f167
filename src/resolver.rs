//! Effective-permission resolution: walk RoleBindings/ClusterRoleBindings
//! that name a subject, then the Role/ClusterRole each references, and
//! produce the flattened set of rules currently granted.

use async_trait::async_trait;
use k8s_openapi::api::rbac::v1::{
    ClusterRole, ClusterRoleBinding, PolicyRule, Role, RoleBinding,
};
use kube::api::{Api, ListParams};
use kube::Client;

use crate::error::ResolverError;
use crate::model::event::Subject;
use crate::model::rule::EffectiveRule;

fn subject_matches(binding_subject: &k8s_openapi::api::rbac::v1::Subject, subject: &Subject) -> bool {
    match subject {
        Subject::ServiceAccount { namespace, name } => {
            binding_subject.kind == "ServiceAccount"
                && binding_subject.name == *name
                && binding_subject.namespace.as_deref() == Some(namespace.as_str())
        }
        Subject::User { name } => binding_subject.kind == "User" && binding_subject.name == *name,
        Subject::Group { name } => binding_subject.kind == "Group" && binding_subject.name == *name,
    }
}

fn rule_to_effective(rule: &PolicyRule, namespace: Option<String>) -> EffectiveRule {
    EffectiveRule {
        api_groups: rule.api_groups.clone().unwrap_or_default(),
        resources: rule.resources.clone().unwrap_or_default(),
        verbs: rule.verbs.clone(),
        non_resource_urls: rule.non_resource_urls.clone().unwrap_or_default(),
        resource_names: rule.resource_names.clone().unwrap_or_default(),
        namespace,
    }
}

/// Source of RBAC objects the resolver walks. Abstracted so the pipeline
/// can run against a live cluster or, in tests, a fixed fixture set — this
/// crate does not own a controller watch cache for Role/RoleBinding, those
/// are the host's concern per the external-interfaces boundary.
#[async_trait]
pub trait RbacInventory: Send + Sync {
    async fn role_bindings(&self, namespace: &str) -> Result<Vec<RoleBinding>, ResolverError>;
    async fn cluster_role_bindings(&self) -> Result<Vec<ClusterRoleBinding>, ResolverError>;
    async fn role(&self, namespace: &str, name: &str) -> Result<Option<Role>, ResolverError>;
    async fn cluster_role(&self, name: &str) -> Result<Option<ClusterRole>, ResolverError>;
    /// All namespaces to scan RoleBindings in. A live inventory lists
    /// namespaces via the API; a fixture inventory returns a fixed set.
    async fn namespaces(&self) -> Result<Vec<String>, ResolverError>;
}

/// Resolve the full set of rules currently granted to `subject` across every
/// namespace plus the cluster scope. Two-step per binding: list bindings
/// naming the subject, then fetch the role each references. A binding
/// referencing a role that no longer exists is a `MissingRole` error — the
/// caller decides whether to skip it or abort the resolution.
pub async fn resolve_effective_rules(
    inventory: &dyn RbacInventory,
    subject: &Subject,
) -> Result<Vec<EffectiveRule>, ResolverError> {
    let mut effective = Vec::new();

    for cluster_binding in inventory.cluster_role_bindings().await? {
        let subjects = cluster_binding.subjects.clone().unwrap_or_default();
        if !subjects.iter().any(|s| subject_matches(s, subject)) {
            continue;
        }
        let role_name = &cluster_binding.role_ref.name;
        let role = inventory
            .cluster_role(role_name)
            .await?
            .ok_or_else(|| ResolverError::MissingRole {
                binding: cluster_binding.metadata.name.clone().unwrap_or_default(),
                role: role_name.clone(),
            })?;
        for rule in role.rules.unwrap_or_default() {
            effective.push(rule_to_effective(&rule, None));
        }
    }

    for namespace in inventory.namespaces().await? {
        for binding in inventory.role_bindings(&namespace).await? {
            let subjects = binding.subjects.clone().unwrap_or_default();
            if !subjects.iter().any(|s| subject_matches(s, subject)) {
                continue;
            }
            let role_ref = &binding.role_ref;
            let rules = if role_ref.kind == "ClusterRole" {
                inventory
                    .cluster_role(&role_ref.name)
                    .await?
                    .ok_or_else(|| ResolverError::MissingRole {
                        binding: binding.metadata.name.clone().unwrap_or_default(),
                        role: role_ref.name.clone(),
                    })?
                    .rules
                    .unwrap_or_default()
            } else {
                inventory
                    .role(&namespace, &role_ref.name)
                    .await?
                    .ok_or_else(|| ResolverError::MissingRole {
                        binding: binding.metadata.name.clone().unwrap_or_default(),
                        role: role_ref.name.clone(),
                    })?
                    .rules
                    .unwrap_or_default()
            };
            for rule in rules {
                effective.push(rule_to_effective(&rule, Some(namespace.clone())));
            }
        }
    }

    Ok(effective)
}

/// Live-cluster inventory backed by `kube::Client`. Namespace-scoped lookups
/// use `Api::namespaced`; this does not cache — each resolution re-lists,
/// which is acceptable at the report-flush cadence this crate runs at, not
/// per-event.
pub struct KubeRbacInventory {
    client: Client,
}

impl KubeRbacInventory {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RbacInventory for KubeRbacInventory {
    async fn role_bindings(&self, namespace: &str) -> Result<Vec<RoleBinding>, ResolverError> {
        let api: Api<RoleBinding> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn cluster_role_bindings(&self) -> Result<Vec<ClusterRoleBinding>, ResolverError> {
        let api: Api<ClusterRoleBinding> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn role(&self, namespace: &str, name: &str) -> Result<Option<Role>, ResolverError> {
        let api: Api<Role> = Api::namespaced(self.client.clone(), namespace);
        match api.get(name).await {
            Ok(role) => Ok(Some(role)),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn cluster_role(&self, name: &str) -> Result<Option<ClusterRole>, ResolverError> {
        let api: Api<ClusterRole> = Api::all(self.client.clone());
        match api.get(name).await {
            Ok(role) => Ok(Some(role)),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn namespaces(&self) -> Result<Vec<String>, ResolverError> {
        use k8s_openapi::api::core::v1::Namespace;
        let api: Api<Namespace> = Api::all(self.client.clone());
        Ok(api
            .list(&ListParams::default())
            .await?
            .items
            .into_iter()
            .filter_map(|ns| ns.metadata.name)
            .collect())
    }
}

/// Fixture inventory for tests and for the fixed-fixture resolution mode
/// `commands::report` uses offline: no live cluster required.
#[derive(Default)]
pub struct InMemoryRbacInventory {
    pub role_bindings: Vec<(String, RoleBinding)>,
    pub cluster_role_bindings: Vec<ClusterRoleBinding>,
    pub roles: Vec<(String, Role)>,
    pub cluster_roles: Vec<ClusterRole>,
    pub namespaces: Vec<String>,
}

#[async_trait]
impl RbacInventory for InMemoryRbacInventory {
    async fn role_bindings(&self, namespace: &str) -> Result<Vec<RoleBinding>, ResolverError> {
        Ok(self
            .role_bindings
            .iter()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, b)| b.clone())
            .collect())
    }

    async fn cluster_role_bindings(&self) -> Result<Vec<ClusterRoleBinding>, ResolverError> {
        Ok(self.cluster_role_bindings.clone())
    }

    async fn role(&self, namespace: &str, name: &str) -> Result<Option<Role>, ResolverError> {
        Ok(self
            .roles
            .iter()
            .find(|(ns, r)| ns == namespace && r.metadata.name.as_deref() == Some(name))
            .map(|(_, r)| r.clone()))
    }

    async fn cluster_role(&self, name: &str) -> Result<Option<ClusterRole>, ResolverError> {
        Ok(self
            .cluster_roles
            .iter()
            .find(|r| r.metadata.name.as_deref() == Some(name))
            .cloned())
    }

    async fn namespaces(&self) -> Result<Vec<String>, ResolverError> {
        Ok(self.namespaces.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use k8s_openapi::api::rbac::v1::RoleRef;

    fn rbac_subject(kind: &str, name: &str, namespace: Option<&str>) -> k8s_openapi::api::rbac::v1::Subject {
        k8s_openapi::api::rbac::v1::Subject {
            kind: kind.to_string(),
            name: name.to_string(),
            namespace: namespace.map(str::to_string),
            api_group: None,
        }
    }

    fn named<T>(name: &str, build: impl FnOnce(ObjectMeta) -> T) -> T {
        build(ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn resolves_namespaced_role_for_matching_subject() {
        let subject = Subject::ServiceAccount {
            namespace: "dev".into(),
            name: "backend".into(),
        };
        let mut inv = InMemoryRbacInventory {
            namespaces: vec!["dev".into()],
            ..Default::default()
        };
        inv.roles.push((
            "dev".into(),
            named("pod-reader", |metadata| Role {
                metadata,
                rules: Some(vec![PolicyRule {
                    api_groups: Some(vec!["".into()]),
                    resources: Some(vec!["pods".into()]),
                    verbs: vec!["get".into()],
                    ..Default::default()
                }]),
            }),
        ));
        inv.role_bindings.push((
            "dev".into(),
            named("pod-reader-binding", |metadata| RoleBinding {
                metadata,
                role_ref: RoleRef {
                    api_group: "rbac.authorization.k8s.io".into(),
                    kind: "Role".into(),
                    name: "pod-reader".into(),
                },
                subjects: Some(vec![rbac_subject("ServiceAccount", "backend", Some("dev"))]),
            }),
        ));

        let rules = resolve_effective_rules(&inv, &subject).await.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].resources, vec!["pods".to_string()]);
        assert_eq!(rules[0].namespace, Some("dev".to_string()));
    }

    #[tokio::test]
    async fn non_matching_subject_yields_no_rules() {
        let subject = Subject::User {
            name: "nobody".into(),
        };
        let inv = InMemoryRbacInventory {
            namespaces: vec!["dev".into()],
            ..Default::default()
        };
        let rules = resolve_effective_rules(&inv, &subject).await.unwrap();
        assert!(rules.is_empty());
    }

    #[tokio::test]
    async fn cluster_role_binding_yields_rule_with_no_namespace() {
        let subject = Subject::User { name: "alice".into() };
        let mut inv = InMemoryRbacInventory::default();
        inv.cluster_roles.push(named("viewer", |metadata| ClusterRole {
            metadata,
            rules: Some(vec![PolicyRule {
                api_groups: Some(vec!["".into()]),
                resources: Some(vec!["nodes".into()]),
                verbs: vec!["get".into()],
                ..Default::default()
            }]),
            ..Default::default()
        }));
        inv.cluster_role_bindings.push(named("viewer-binding", |metadata| ClusterRoleBinding {
            metadata,
            role_ref: RoleRef {
                api_group: "rbac.authorization.k8s.io".into(),
                kind: "ClusterRole".into(),
                name: "viewer".into(),
            },
            subjects: Some(vec![rbac_subject("User", "alice", None)]),
        }));

        let rules = resolve_effective_rules(&inv, &subject).await.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].namespace, None);
    }

    #[tokio::test]
    async fn role_binding_referencing_cluster_role_is_namespace_scoped() {
        let subject = Subject::User { name: "alice".into() };
        let mut inv = InMemoryRbacInventory {
            namespaces: vec!["dev".into()],
            ..Default::default()
        };
        inv.cluster_roles.push(named("view", |metadata| ClusterRole {
            metadata,
            rules: Some(vec![PolicyRule {
                verbs: vec!["list".into()],
                ..Default::default()
            }]),
            ..Default::default()
        }));
        inv.role_bindings.push((
            "dev".into(),
            named("view-binding", |metadata| RoleBinding {
                metadata,
                role_ref: RoleRef {
                    api_group: "rbac.authorization.k8s.io".into(),
                    kind: "ClusterRole".into(),
                    name: "view".into(),
                },
                subjects: Some(vec![rbac_subject("User", "alice", None)]),
            }),
        ));

        let rules = resolve_effective_rules(&inv, &subject).await.unwrap();
        assert_eq!(rules[0].namespace, Some("dev".to_string()));
    }

    #[tokio::test]
    async fn missing_role_surfaces_as_resolver_error() {
        let subject = Subject::User { name: "alice".into() };
        let mut inv = InMemoryRbacInventory::default();
        inv.cluster_role_bindings.push(named("dangling", |metadata| ClusterRoleBinding {
            metadata,
            role_ref: RoleRef {
                api_group: "rbac.authorization.k8s.io".into(),
                kind: "ClusterRole".into(),
                name: "ghost".into(),
            },
            subjects: Some(vec![rbac_subject("User", "alice", None)]),
        }));

        let err = resolve_effective_rules(&inv, &subject).await.unwrap_err();
        assert!(matches!(err, ResolverError::MissingRole { .. }));
    }
}
