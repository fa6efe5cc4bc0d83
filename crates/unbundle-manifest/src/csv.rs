//! ClusterServiceVersion descriptor
//!
//! Only the parts that drive synthesis are modeled: the install strategy
//! (deployments and RBAC) and the webhook definitions. Everything else in the
//! descriptor is ignored.

use std::collections::BTreeMap;

use k8s_openapi::api::admissionregistration::v1::RuleWithOperations;
use k8s_openapi::api::apps::v1::DeploymentSpec;
use k8s_openapi::api::rbac::v1::PolicyRule;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use serde::{Deserialize, Serialize};
use unbundle_core::Resource;

use crate::error::{ManifestError, Result};

/// The only install strategy that can be rendered
pub const DEPLOYMENT_STRATEGY: &str = "deployment";

/// Port used when a webhook definition declares none
pub const DEFAULT_WEBHOOK_PORT: i32 = 443;

/// Suffix appended to a deployment name to name its webhook service
pub const WEBHOOK_SERVICE_SUFFIX: &str = "-webhook-service";

/// Name of the service fronting a deployment's webhooks
pub fn webhook_service_name(deployment: &str) -> String {
    format!("{}{}", deployment, WEBHOOK_SERVICE_SUFFIX)
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ClusterServiceVersion {
    #[serde(default)]
    pub metadata: ObjectMeta,
    pub spec: CsvSpec,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CsvSpec {
    pub install: InstallStrategy,
    #[serde(default, rename = "webhookdefinitions")]
    pub webhook_definitions: Vec<WebhookDefinition>,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct InstallStrategy {
    pub strategy: String,
    #[serde(default)]
    pub spec: StrategySpec,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategySpec {
    #[serde(default)]
    pub deployments: Vec<StrategyDeployment>,
    #[serde(default)]
    pub permissions: Vec<Permission>,
    #[serde(default)]
    pub cluster_permissions: Vec<Permission>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StrategyDeployment {
    pub name: String,
    pub spec: DeploymentSpec,
    #[serde(default)]
    pub label: BTreeMap<String, String>,
}

/// Rules granted to one service account
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Permission {
    pub service_account_name: String,
    #[serde(default)]
    pub rules: Vec<PolicyRule>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum WebhookType {
    ValidatingAdmissionWebhook,
    MutatingAdmissionWebhook,
    ConversionWebhook,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookDefinition {
    #[serde(rename = "type")]
    pub webhook_type: WebhookType,
    pub deployment_name: String,
    #[serde(default)]
    pub container_port: Option<i32>,
    #[serde(default)]
    pub target_port: Option<IntOrString>,
    pub generate_name: String,
    #[serde(default)]
    pub admission_review_versions: Vec<String>,
    #[serde(default)]
    pub side_effects: Option<String>,
    #[serde(default)]
    pub failure_policy: Option<String>,
    #[serde(default)]
    pub match_policy: Option<String>,
    #[serde(default)]
    pub object_selector: Option<LabelSelector>,
    #[serde(default)]
    pub rules: Vec<RuleWithOperations>,
    #[serde(default)]
    pub webhook_path: Option<String>,
    #[serde(default)]
    pub timeout_seconds: Option<i32>,
    #[serde(default)]
    pub reinvocation_policy: Option<String>,
    #[serde(default, rename = "conversionCRDs")]
    pub conversion_crds: Vec<String>,
}

impl WebhookDefinition {
    /// Declared container port, or 443
    pub fn port(&self) -> i32 {
        self.container_port.unwrap_or(DEFAULT_WEBHOOK_PORT)
    }

    /// Port the service forwards to
    pub fn service_target_port(&self) -> IntOrString {
        self.target_port
            .clone()
            .unwrap_or(IntOrString::Int(self.port()))
    }

    pub fn service_name(&self) -> String {
        webhook_service_name(&self.deployment_name)
    }
}

impl ClusterServiceVersion {
    /// Decode a CSV, attributing failures to it by name
    pub fn from_resource(resource: &Resource) -> Result<Self> {
        resource
            .to_typed::<Self>()
            .map_err(|e| ManifestError::InvalidCsv {
                name: resource.name().to_string(),
                message: e.to_string(),
            })
    }

    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    /// Fail unless the install strategy is `deployment`
    pub fn ensure_supported_strategy(&self) -> Result<()> {
        if self.spec.install.strategy != DEPLOYMENT_STRATEGY {
            return Err(ManifestError::UnsupportedStrategy {
                csv: self.name().to_string(),
                strategy: self.spec.install.strategy.clone(),
            });
        }
        Ok(())
    }

    pub fn deployments(&self) -> &[StrategyDeployment] {
        &self.spec.install.spec.deployments
    }

    pub fn webhooks(&self) -> &[WebhookDefinition] {
        &self.spec.webhook_definitions
    }

    /// Conversion webhook targeting a CRD, by CRD name
    pub fn conversion_webhook_for(&self, crd_name: &str) -> Option<&WebhookDefinition> {
        self.webhooks().iter().find(|w| {
            w.webhook_type == WebhookType::ConversionWebhook
                && w.conversion_crds.iter().any(|c| c == crd_name)
        })
    }
}
