//! Namespaced vs cluster-scoped kinds
//!
//! Kubernetes only knows the scope of a kind through discovery. Since nothing
//! here talks to a cluster, scope comes from a table of well-known
//! cluster-scoped kinds plus whatever the CRDs shipped alongside declare.

use std::collections::HashMap;

use serde_json::Value;
use tracing::debug;

use crate::object::{Resource, kinds};

/// Built-in kinds that are never namespaced
const CLUSTER_SCOPED_KINDS: &[&str] = &[
    "APIService",
    "CSIDriver",
    "CSINode",
    "CertificateSigningRequest",
    "ClusterIssuer",
    "ClusterRole",
    "ClusterRoleBinding",
    "ComponentStatus",
    "ConsoleCLIDownload",
    "ConsoleExternalLogLink",
    "ConsoleLink",
    "ConsoleNotification",
    "ConsolePlugin",
    "ConsoleQuickStart",
    "ConsoleYAMLSample",
    "CustomResourceDefinition",
    "FlowSchema",
    "IngressClass",
    "MutatingWebhookConfiguration",
    "Namespace",
    "Node",
    "PersistentVolume",
    "PriorityClass",
    "PriorityLevelConfiguration",
    "RuntimeClass",
    "SecurityContextConstraints",
    "StorageClass",
    "ValidatingAdmissionPolicy",
    "ValidatingAdmissionPolicyBinding",
    "ValidatingWebhookConfiguration",
    "VolumeAttachment",
    "VolumeSnapshotClass",
];

/// Scope lookup for resource kinds
#[derive(Debug, Clone, Default)]
pub struct KindScope {
    /// Scope declared by CRDs, keyed by (group, kind); true = namespaced
    declared: HashMap<(String, String), bool>,
}

impl KindScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a scope table that also knows about the kinds the given CRDs define
    pub fn from_resources<'a>(resources: impl IntoIterator<Item = &'a Resource>) -> Self {
        let mut scope = Self::new();
        for crd in resources.into_iter().filter(|r| r.is_kind(kinds::CRD)) {
            scope.learn_crd(crd);
        }
        scope
    }

    /// Record the scope a CRD declares for its kind
    pub fn learn_crd(&mut self, crd: &Resource) {
        let group = crd.pointer("/spec/group").and_then(Value::as_str);
        let kind = crd.pointer("/spec/names/kind").and_then(Value::as_str);
        let (Some(group), Some(kind)) = (group, kind) else {
            return;
        };
        let namespaced = crd
            .pointer("/spec/scope")
            .and_then(Value::as_str)
            .map(|s| s != "Cluster")
            .unwrap_or(true);
        debug!(group, kind, namespaced, "learned scope from CRD");
        self.declared
            .insert((group.to_string(), kind.to_string()), namespaced);
    }

    /// Returns true when objects of this group/kind live in a namespace
    ///
    /// Unknown kinds are assumed namespaced, like `kubectl apply` does for
    /// manifests without a namespace.
    pub fn is_namespaced(&self, group: &str, kind: &str) -> bool {
        if let Some(namespaced) = self.declared.get(&(group.to_string(), kind.to_string())) {
            return *namespaced;
        }
        !CLUSTER_SCOPED_KINDS.contains(&kind)
    }

    pub fn is_resource_namespaced(&self, resource: &Resource) -> bool {
        self.is_namespaced(resource.group(), resource.kind())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn crd(group: &str, kind: &str, scope: &str) -> Resource {
        Resource::from_value(json!({
            "apiVersion": "apiextensions.k8s.io/v1",
            "kind": "CustomResourceDefinition",
            "metadata": {"name": format!("{}s.{}", kind.to_lowercase(), group)},
            "spec": {"group": group, "names": {"kind": kind}, "scope": scope}
        }))
        .unwrap()
    }

    #[test]
    fn test_builtin_kinds() {
        let scope = KindScope::new();
        assert!(scope.is_namespaced("apps", "Deployment"));
        assert!(scope.is_namespaced("", "ConfigMap"));
        assert!(!scope.is_namespaced("", "Namespace"));
        assert!(!scope.is_namespaced("rbac.authorization.k8s.io", "ClusterRole"));
        assert!(!scope.is_namespaced("apiextensions.k8s.io", "CustomResourceDefinition"));
    }

    #[test]
    fn test_crd_declared_scope() {
        let crds = [
            crd("cache.example.com", "Memcached", "Namespaced"),
            crd("cache.example.com", "MemcachedPolicy", "Cluster"),
        ];
        let scope = KindScope::from_resources(&crds);
        assert!(scope.is_namespaced("cache.example.com", "Memcached"));
        assert!(!scope.is_namespaced("cache.example.com", "MemcachedPolicy"));
        // Same kind name in another group is unaffected
        assert!(scope.is_namespaced("other.example.com", "MemcachedPolicy"));
    }
}
