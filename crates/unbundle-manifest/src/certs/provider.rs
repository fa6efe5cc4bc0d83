//! Certificate authority providers
//!
//! A provider decides how a webhook service obtains its serving certificate
//! and how the webhook learns the CA that signed it. Neither provider embeds
//! certificate material: an in-cluster controller does the signing and the
//! CA injection.

use std::fmt;
use std::str::FromStr;

use serde_json::json;
use unbundle_core::{Resource, kinds};

use crate::error::{ManifestError, Result};

/// cert-manager annotation read by its CA injector
pub const CERT_MANAGER_INJECT_CA_FROM: &str = "cert-manager.io/inject-ca-from";
pub const CERT_MANAGER_API_VERSION: &str = "cert-manager.io/v1";

/// OpenShift service CA annotations
pub const SERVICE_CA_INJECT_CABUNDLE: &str = "service.beta.openshift.io/inject-cabundle";
pub const SERVICE_CA_SERVING_CERT_SECRET: &str = "service.beta.openshift.io/serving-cert-secret-name";

/// Service linkage of one webhook-bearing object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookInfo {
    pub service_name: String,
    pub namespace: String,
    pub port: i32,
}

impl WebhookInfo {
    pub fn certificate_name(&self) -> String {
        format!("{}-cert", self.service_name)
    }

    pub fn secret_name(&self) -> String {
        format!("{}-tls", self.service_name)
    }

    /// Short cluster-local name and fully-qualified name of the service
    pub fn dns_names(&self) -> Vec<String> {
        vec![
            format!("{}.{}.svc", self.service_name, self.namespace),
            format!("{}.{}.svc.cluster.local", self.service_name, self.namespace),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IssuerKind {
    #[default]
    Issuer,
    ClusterIssuer,
}

impl IssuerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            IssuerKind::Issuer => kinds::ISSUER,
            IssuerKind::ClusterIssuer => kinds::CLUSTER_ISSUER,
        }
    }
}

impl FromStr for IssuerKind {
    type Err = ManifestError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            kinds::ISSUER => Ok(IssuerKind::Issuer),
            kinds::CLUSTER_ISSUER => Ok(IssuerKind::ClusterIssuer),
            other => Err(ManifestError::InvalidIssuerKind {
                kind: other.to_string(),
            }),
        }
    }
}

/// Issuer a Certificate is signed by
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuerRef {
    pub name: String,
    pub kind: IssuerKind,
}

impl IssuerRef {
    pub fn new(name: impl Into<String>, kind: IssuerKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    /// `<operator>-selfsigned` namespaced Issuer
    pub fn self_signed(operator: &str) -> Self {
        Self::new(format!("{}-selfsigned", operator), IssuerKind::Issuer)
    }
}

/// What a provider contributes for one webhook
#[derive(Debug, Clone)]
pub struct WebhookTls {
    /// Certificate object to emit, if the provider uses one
    pub certificate: Option<Resource>,
    pub webhook_annotation: (&'static str, String),
    pub service_annotations: Vec<(&'static str, String)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaProvider {
    /// Certificate and Issuer objects handled by cert-manager
    #[default]
    CertManager,
    /// OpenShift's service CA operator
    ServiceCa,
}

impl CaProvider {
    pub const ALL: &'static [CaProvider] = &[CaProvider::CertManager, CaProvider::ServiceCa];

    pub fn name(self) -> &'static str {
        match self {
            CaProvider::CertManager => "cert-manager",
            CaProvider::ServiceCa => "service-ca",
        }
    }

    /// True when the provider signs through an Issuer
    pub fn uses_issuer(self) -> bool {
        matches!(self, CaProvider::CertManager)
    }

    /// Objects and annotations that make `webhook` admission-ready
    pub fn configure_webhook(self, webhook: &WebhookInfo, issuer: &IssuerRef) -> Result<WebhookTls> {
        match self {
            CaProvider::CertManager => {
                let certificate = Resource::from_value(json!({
                    "apiVersion": CERT_MANAGER_API_VERSION,
                    "kind": kinds::CERTIFICATE,
                    "metadata": {
                        "name": webhook.certificate_name(),
                        "namespace": webhook.namespace,
                    },
                    "spec": {
                        "secretName": webhook.secret_name(),
                        "dnsNames": webhook.dns_names(),
                        "issuerRef": {
                            "name": issuer.name,
                            "kind": issuer.kind.as_str(),
                        },
                    },
                }))?;
                Ok(WebhookTls {
                    certificate: Some(certificate),
                    webhook_annotation: (
                        CERT_MANAGER_INJECT_CA_FROM,
                        format!("{}/{}", webhook.namespace, webhook.certificate_name()),
                    ),
                    service_annotations: Vec::new(),
                })
            }
            CaProvider::ServiceCa => Ok(WebhookTls {
                certificate: None,
                webhook_annotation: (SERVICE_CA_INJECT_CABUNDLE, "true".to_string()),
                service_annotations: vec![(SERVICE_CA_SERVING_CERT_SECRET, webhook.secret_name())],
            }),
        }
    }

    /// Self-signed Issuer backing auto-generated certificates
    pub fn self_signed_issuer(self, issuer: &IssuerRef, namespace: &str) -> Result<Option<Resource>> {
        if !self.uses_issuer() {
            return Ok(None);
        }
        Ok(Some(Resource::from_value(json!({
            "apiVersion": CERT_MANAGER_API_VERSION,
            "kind": issuer.kind.as_str(),
            "metadata": {
                "name": issuer.name,
                "namespace": namespace,
            },
            "spec": {"selfSigned": {}},
        }))?))
    }
}

impl fmt::Display for CaProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CaProvider {
    type Err = ManifestError;

    fn from_str(s: &str) -> Result<Self> {
        CaProvider::ALL
            .iter()
            .copied()
            .find(|p| p.name() == s)
            .ok_or_else(|| ManifestError::UnknownCaProvider {
                name: s.to_string(),
                expected: CaProvider::ALL
                    .iter()
                    .map(|p| p.name())
                    .collect::<Vec<_>>()
                    .join(", "),
            })
    }
}
