//! Manifest synthesis
//!
//! Turns a bundle into the objects a cluster needs to run the operator
//! without a lifecycle manager, in this order:
//!
//! 1. Namespace (skipped for `default`)
//! 2. CRDs, with conversion webhooks wired to `<deployment>-webhook-service`
//! 3. ServiceAccounts, Roles, RoleBindings, ClusterRoles, ClusterRoleBindings
//! 4. Deployments
//! 5. One webhook Service per webhook-owning deployment
//! 6. Validating and mutating webhook configurations, CA bundle left empty
//! 7. Every other bundle object, namespaced where its kind is

use std::collections::{BTreeMap, HashSet};

use k8s_openapi::api::admissionregistration::v1::{
    MutatingWebhook, MutatingWebhookConfiguration, ServiceReference, ValidatingWebhook,
    ValidatingWebhookConfiguration, WebhookClientConfig,
};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{Namespace, Service, ServiceAccount, ServicePort, ServiceSpec};
use k8s_openapi::api::rbac::v1::{
    ClusterRole, ClusterRoleBinding, PolicyRule, Role, RoleBinding, RoleRef, Subject,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde_json::{Map, Value, json};
use tracing::{debug, info};
use unbundle_core::{KindScope, Resource, kinds, validate_namespace};

use crate::bundle::Bundle;
use crate::csv::{ClusterServiceVersion, Permission, WebhookDefinition, WebhookType};
use crate::error::Result;

/// Namespace that is never created
pub const DEFAULT_NAMESPACE: &str = "default";

const RBAC_API_GROUP: &str = "rbac.authorization.k8s.io";

/// Groups whose kinds only mean something to a lifecycle manager
const PACKAGING_GROUPS: &[&str] = &["operators.coreos.com", "packages.operators.coreos.com"];

/// Label prefixes added by a lifecycle manager
const PACKAGING_LABEL_PREFIXES: &[&str] = &["olm.", "operators.coreos.com/"];

const DEFAULT_REVIEW_VERSIONS: &[&str] = &["v1"];
const DEFAULT_CONVERSION_REVIEW_VERSIONS: &[&str] = &["v1", "v1beta1"];
const DEFAULT_SIDE_EFFECTS: &str = "None";

pub(crate) const WEBHOOK_PORT_NAME: &str = "https";

/// Build the installable object set for a bundle in `namespace`
pub fn synthesize(bundle: &Bundle, namespace: &str) -> Result<Vec<Resource>> {
    validate_namespace(namespace)?;
    bundle.csv.ensure_supported_strategy()?;

    let synthesizer = ManifestSynthesizer {
        csv: &bundle.csv,
        namespace,
        scope: KindScope::from_resources(&bundle.objects),
    };
    synthesizer.run(&bundle.objects)
}

struct ManifestSynthesizer<'a> {
    csv: &'a ClusterServiceVersion,
    namespace: &'a str,
    scope: KindScope,
}

impl ManifestSynthesizer<'_> {
    fn run(&self, objects: &[Resource]) -> Result<Vec<Resource>> {
        let mut out = Vec::new();

        if self.namespace != DEFAULT_NAMESPACE {
            out.push(self.namespace_object()?);
        }
        for crd in objects.iter().filter(|o| o.is_kind(kinds::CRD)) {
            out.push(self.crd(crd));
        }
        out.extend(self.rbac()?);
        for deployment in self.csv.deployments() {
            out.push(self.deployment(&deployment.name, &deployment.spec, &deployment.label)?);
        }
        out.extend(self.webhook_services()?);
        for webhook in self.csv.webhooks() {
            if let Some(config) = self.webhook_configuration(webhook)? {
                out.push(config);
            }
        }

        let synthesized: HashSet<(String, String)> = out
            .iter()
            .map(|r| (r.kind().to_string(), r.name().to_string()))
            .collect();
        for object in objects {
            if let Some(passthrough) = self.passthrough(object, &synthesized) {
                out.push(passthrough);
            }
        }

        for resource in out
            .iter_mut()
            .filter(|r| is_rbac_kind(r.kind()))
        {
            strip_packaging_metadata(resource);
        }

        info!(csv = self.csv.name(), objects = out.len(), "synthesized manifests");
        Ok(out)
    }

    fn meta(&self, name: &str) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(self.namespace.to_string()),
            ..Default::default()
        }
    }

    fn cluster_meta(name: &str) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        }
    }

    fn namespace_object(&self) -> Result<Resource> {
        Ok(Resource::from_typed(&Namespace {
            metadata: Self::cluster_meta(self.namespace),
            ..Default::default()
        })?)
    }

    /// Copy a CRD, wiring its conversion webhook if the descriptor declares one
    fn crd(&self, crd: &Resource) -> Resource {
        let mut crd = crd.clone();
        if let Some(webhook) = self.csv.conversion_webhook_for(crd.name()) {
            debug!(crd = crd.name(), service = %webhook.service_name(), "wiring conversion webhook");
            let mut service = Map::new();
            service.insert("name".to_string(), json!(webhook.service_name()));
            service.insert("namespace".to_string(), json!(self.namespace));
            if let Some(path) = &webhook.webhook_path {
                service.insert("path".to_string(), json!(path));
            }
            service.insert("port".to_string(), json!(webhook.port()));

            let review_versions = if webhook.admission_review_versions.is_empty() {
                json!(DEFAULT_CONVERSION_REVIEW_VERSIONS)
            } else {
                json!(webhook.admission_review_versions)
            };
            let conversion = json!({
                "strategy": "Webhook",
                "webhook": {
                    "clientConfig": {"service": service},
                    "conversionReviewVersions": review_versions,
                }
            });

            let fields = crd.fields_mut();
            let spec = fields
                .entry("spec")
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(spec) = spec {
                spec.insert("conversion".to_string(), conversion);
            }
        }
        crd
    }

    fn rbac(&self) -> Result<Vec<Resource>> {
        let install = &self.csv.spec.install.spec;
        let mut service_accounts: Vec<&str> = Vec::new();
        let declared = install
            .permissions
            .iter()
            .chain(&install.cluster_permissions)
            .map(|p| p.service_account_name.as_str())
            .chain(install.deployments.iter().filter_map(|d| {
                d.spec
                    .template
                    .spec
                    .as_ref()
                    .and_then(|s| s.service_account_name.as_deref())
            }));
        for name in declared {
            if !name.is_empty() && !service_accounts.contains(&name) {
                service_accounts.push(name);
            }
        }

        let mut out = Vec::new();
        for name in &service_accounts {
            out.push(Resource::from_typed(&ServiceAccount {
                metadata: self.meta(name),
                ..Default::default()
            })?);
        }

        let mut used = HashSet::new();
        let roles: Vec<(String, &Permission)> = install
            .permissions
            .iter()
            .map(|p| (self.rbac_name(p, &mut used), p))
            .collect();
        for (name, permission) in &roles {
            out.push(Resource::from_typed(&Role {
                metadata: self.meta(name),
                rules: Some(default_rule_groups(&permission.rules)),
            })?);
        }
        for (name, permission) in &roles {
            out.push(Resource::from_typed(&RoleBinding {
                metadata: self.meta(name),
                role_ref: role_ref(kinds::ROLE, name),
                subjects: Some(vec![self.subject(permission)]),
            })?);
        }

        let mut used = HashSet::new();
        let cluster_roles: Vec<(String, &Permission)> = install
            .cluster_permissions
            .iter()
            .map(|p| (self.rbac_name(p, &mut used), p))
            .collect();
        for (name, permission) in &cluster_roles {
            out.push(Resource::from_typed(&ClusterRole {
                metadata: Self::cluster_meta(name),
                rules: Some(default_rule_groups(&permission.rules)),
                ..Default::default()
            })?);
        }
        for (name, permission) in &cluster_roles {
            out.push(Resource::from_typed(&ClusterRoleBinding {
                metadata: Self::cluster_meta(name),
                role_ref: role_ref(kinds::CLUSTER_ROLE, name),
                subjects: Some(vec![self.subject(permission)]),
            })?);
        }

        Ok(out)
    }

    /// `<csv>-<serviceaccount>`, suffixed with a counter when repeated
    fn rbac_name(&self, permission: &Permission, used: &mut HashSet<String>) -> String {
        let base = format!("{}-{}", self.csv.name(), permission.service_account_name);
        let mut name = base.clone();
        let mut n = 1;
        while !used.insert(name.clone()) {
            name = format!("{}-{}", base, n);
            n += 1;
        }
        name
    }

    fn subject(&self, permission: &Permission) -> Subject {
        Subject {
            kind: kinds::SERVICE_ACCOUNT.to_string(),
            name: permission.service_account_name.clone(),
            namespace: Some(self.namespace.to_string()),
            ..Default::default()
        }
    }

    fn deployment(
        &self,
        name: &str,
        spec: &DeploymentSpec,
        labels: &BTreeMap<String, String>,
    ) -> Result<Resource> {
        let mut spec = spec.clone();
        spec.template
            .metadata
            .get_or_insert_with(Default::default)
            .namespace = Some(self.namespace.to_string());

        let mut metadata = self.meta(name);
        if !labels.is_empty() {
            metadata.labels = Some(labels.clone());
        }
        Ok(Resource::from_typed(&Deployment {
            metadata,
            spec: Some(spec),
            ..Default::default()
        })?)
    }

    /// One service per distinct webhook-owning deployment
    fn webhook_services(&self) -> Result<Vec<Resource>> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for webhook in self.csv.webhooks() {
            if !seen.insert(webhook.deployment_name.as_str()) {
                continue;
            }
            let selector = self
                .csv
                .deployments()
                .iter()
                .find(|d| d.name == webhook.deployment_name)
                .and_then(|d| d.spec.selector.match_labels.clone());

            out.push(Resource::from_typed(&Service {
                metadata: self.meta(&webhook.service_name()),
                spec: Some(ServiceSpec {
                    ports: Some(vec![ServicePort {
                        name: Some(WEBHOOK_PORT_NAME.to_string()),
                        port: webhook.port(),
                        target_port: Some(webhook.service_target_port()),
                        protocol: Some("TCP".to_string()),
                        ..Default::default()
                    }]),
                    selector,
                    ..Default::default()
                }),
                ..Default::default()
            })?);
        }
        Ok(out)
    }

    fn client_config(&self, webhook: &WebhookDefinition) -> WebhookClientConfig {
        WebhookClientConfig {
            service: Some(ServiceReference {
                name: webhook.service_name(),
                namespace: self.namespace.to_string(),
                path: webhook.webhook_path.clone(),
                port: Some(webhook.port()),
            }),
            ..Default::default()
        }
    }

    fn webhook_configuration(&self, webhook: &WebhookDefinition) -> Result<Option<Resource>> {
        let review_versions = if webhook.admission_review_versions.is_empty() {
            DEFAULT_REVIEW_VERSIONS.iter().map(|v| v.to_string()).collect()
        } else {
            webhook.admission_review_versions.clone()
        };
        let side_effects = webhook
            .side_effects
            .clone()
            .unwrap_or_else(|| DEFAULT_SIDE_EFFECTS.to_string());
        let rules = (!webhook.rules.is_empty()).then(|| webhook.rules.clone());

        let resource = match webhook.webhook_type {
            WebhookType::ConversionWebhook => return Ok(None),
            WebhookType::ValidatingAdmissionWebhook => {
                Resource::from_typed(&ValidatingWebhookConfiguration {
                    metadata: Self::cluster_meta(&webhook.generate_name),
                    webhooks: Some(vec![ValidatingWebhook {
                        name: webhook.generate_name.clone(),
                        admission_review_versions: review_versions,
                        client_config: self.client_config(webhook),
                        failure_policy: webhook.failure_policy.clone(),
                        match_policy: webhook.match_policy.clone(),
                        object_selector: webhook.object_selector.clone(),
                        rules,
                        side_effects,
                        timeout_seconds: webhook.timeout_seconds,
                        ..Default::default()
                    }]),
                })?
            }
            WebhookType::MutatingAdmissionWebhook => {
                Resource::from_typed(&MutatingWebhookConfiguration {
                    metadata: Self::cluster_meta(&webhook.generate_name),
                    webhooks: Some(vec![MutatingWebhook {
                        name: webhook.generate_name.clone(),
                        admission_review_versions: review_versions,
                        client_config: self.client_config(webhook),
                        failure_policy: webhook.failure_policy.clone(),
                        match_policy: webhook.match_policy.clone(),
                        object_selector: webhook.object_selector.clone(),
                        reinvocation_policy: webhook.reinvocation_policy.clone(),
                        rules,
                        side_effects,
                        timeout_seconds: webhook.timeout_seconds,
                        ..Default::default()
                    }]),
                })?
            }
        };
        Ok(Some(resource))
    }

    fn passthrough(
        &self,
        object: &Resource,
        synthesized: &HashSet<(String, String)>,
    ) -> Option<Resource> {
        if object.is_kind(kinds::CRD) || object.is_kind(kinds::CSV) {
            return None;
        }
        if PACKAGING_GROUPS.contains(&object.group()) {
            debug!(resource = %object, "dropping packaging-only object");
            return None;
        }
        if synthesized.contains(&(object.kind().to_string(), object.name().to_string())) {
            debug!(resource = %object, "already synthesized, dropping bundle copy");
            return None;
        }

        let mut object = object.clone();
        if self.scope.is_resource_namespaced(&object) {
            object.set_namespace(self.namespace);
        }
        Some(object)
    }
}

fn role_ref(kind: &str, name: &str) -> RoleRef {
    RoleRef {
        api_group: RBAC_API_GROUP.to_string(),
        kind: kind.to_string(),
        name: name.to_string(),
    }
}

/// Give rules without an API group the core group
///
/// Rules for non-resource URLs must not carry a group and are left alone.
fn default_rule_groups(rules: &[PolicyRule]) -> Vec<PolicyRule> {
    rules
        .iter()
        .cloned()
        .map(|mut rule| {
            let has_groups = rule.api_groups.as_ref().is_some_and(|g| !g.is_empty());
            let non_resource = rule.non_resource_urls.as_ref().is_some_and(|u| !u.is_empty());
            if !has_groups && !non_resource {
                rule.api_groups = Some(vec![String::new()]);
            }
            rule
        })
        .collect()
}

fn is_rbac_kind(kind: &str) -> bool {
    matches!(
        kind,
        kinds::SERVICE_ACCOUNT
            | kinds::ROLE
            | kinds::ROLE_BINDING
            | kinds::CLUSTER_ROLE
            | kinds::CLUSTER_ROLE_BINDING
    )
}

/// Remove owner references and lifecycle-manager labels
fn strip_packaging_metadata(resource: &mut Resource) {
    if let Some(Value::Object(metadata)) = resource.fields_mut().get_mut("metadata") {
        metadata.remove("ownerReferences");
        if let Some(Value::Object(labels)) = metadata.get_mut("labels") {
            labels.retain(|key, _| {
                !PACKAGING_LABEL_PREFIXES
                    .iter()
                    .any(|prefix| key.starts_with(prefix))
            });
        }
    }
}
