//! Apply ordering
//!
//! Objects are emitted in the order they can be created in: a namespace before
//! anything inside it, an Issuer before the Certificate that references it,
//! the Certificate (and so its secret) before the webhook that expects it.

use crate::object::{Resource, kinds};

/// Creation priority of a kind; lower applies first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ApplyPriority {
    Namespace = 1,
    CustomResourceDefinition = 2,
    ServiceAccount = 3,
    Role = 4,
    RoleBinding = 5,
    ClusterRole = 6,
    ClusterRoleBinding = 7,
    Deployment = 8,
    Service = 9,
    Issuer = 10,
    Certificate = 11,
    Webhook = 12,
    Other = 13,
}

impl ApplyPriority {
    pub fn for_kind(kind: &str) -> Self {
        match kind {
            kinds::NAMESPACE => Self::Namespace,
            kinds::CRD => Self::CustomResourceDefinition,
            kinds::SERVICE_ACCOUNT => Self::ServiceAccount,
            kinds::ROLE => Self::Role,
            kinds::ROLE_BINDING => Self::RoleBinding,
            kinds::CLUSTER_ROLE => Self::ClusterRole,
            kinds::CLUSTER_ROLE_BINDING => Self::ClusterRoleBinding,
            kinds::DEPLOYMENT => Self::Deployment,
            kinds::SERVICE => Self::Service,
            kinds::ISSUER | kinds::CLUSTER_ISSUER => Self::Issuer,
            kinds::CERTIFICATE => Self::Certificate,
            kinds::VALIDATING_WEBHOOK | kinds::MUTATING_WEBHOOK => Self::Webhook,
            _ => Self::Other,
        }
    }

    pub fn value(self) -> u8 {
        self as u8
    }
}

/// Stable sort by apply priority; objects of equal priority keep their order
pub fn sort_for_apply(resources: &mut [Resource]) {
    resources.sort_by_key(|r| ApplyPriority::for_kind(r.kind()));
}
