//! Webhook certificate provisioning
//!
//! Makes webhook configurations admission-ready without embedding any
//! certificate material. For every webhook-bearing object:
//!
//! - its service linkage is read from the first webhook entry
//!   (URL-based client configs are left untouched)
//! - the CA provider contributes a Certificate (at most one per name) and a
//!   CA-injection annotation
//! - the backing Service is corrected or synthesized (at most once per name)
//! - the owning Deployment mounts the serving secret (at most once)
//!
//! Any object that fails to convert aborts the whole call.

mod mount;
mod provider;

use std::collections::{BTreeMap, HashSet};

use k8s_openapi::api::admissionregistration::v1::{
    MutatingWebhookConfiguration, ValidatingWebhookConfiguration,
};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, info};
use unbundle_core::{Resource, kinds};

pub use mount::{APISERVICE_CERT_DIR, WEBHOOK_CERT_DIR, mount_serving_cert};
pub use provider::{
    CERT_MANAGER_INJECT_CA_FROM, CaProvider, IssuerKind, IssuerRef, SERVICE_CA_INJECT_CABUNDLE,
    SERVICE_CA_SERVING_CERT_SECRET, WebhookInfo, WebhookTls,
};

use crate::csv::{DEFAULT_WEBHOOK_PORT, WEBHOOK_SERVICE_SUFFIX};
use crate::error::{ManifestError, Result};
use crate::synth::WEBHOOK_PORT_NAME;

/// Operator name used for the issuer when nothing better is found
const FALLBACK_OPERATOR_NAME: &str = "operator";

/// Label used to select pods when the owning deployment is unknown
const FALLBACK_SELECTOR_LABEL: &str = "app.kubernetes.io/name";

/// Provisioning settings
#[derive(Debug, Clone)]
pub struct CertOptions {
    /// Namespace of generated objects and of webhooks that name none
    pub namespace: String,
    pub provider: CaProvider,
    /// Sign with this issuer instead of an auto-generated self-signed one
    pub issuer: Option<IssuerRef>,
    /// Also treat CRDs with a conversion webhook as webhook-bearing
    pub conversion_crds: bool,
    /// Mount the serving secret into the owning deployment
    pub mount_serving_cert: bool,
}

impl CertOptions {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            provider: CaProvider::default(),
            issuer: None,
            conversion_crds: false,
            mount_serving_cert: true,
        }
    }
}

/// De-duplication state of one provisioning call
#[derive(Debug, Default)]
struct ProvisionState {
    certificates: HashSet<String>,
    services: HashSet<String>,
    deployments: HashSet<String>,
    /// Namespaces holding an emitted Certificate, in first-seen order
    certificate_namespaces: Vec<String>,
    added: Vec<Resource>,
}

/// Add certificates, services and annotations for every webhook
pub fn provision(mut resources: Vec<Resource>, options: &CertOptions) -> Result<Vec<Resource>> {
    let targets: Vec<usize> = resources
        .iter()
        .enumerate()
        .filter(|(_, r)| is_webhook_bearing(r, options.conversion_crds))
        .map(|(i, _)| i)
        .collect();
    if targets.is_empty() {
        debug!("no webhooks, nothing to provision");
        return Ok(resources);
    }

    let issuer = options
        .issuer
        .clone()
        .unwrap_or_else(|| IssuerRef::self_signed(&operator_name(&resources)));
    let mut state = ProvisionState::default();

    for i in targets {
        let Some(webhook) = webhook_info(&resources[i], &options.namespace)? else {
            debug!(resource = %resources[i], "webhook has no service reference, leaving as is");
            continue;
        };

        let tls = options.provider.configure_webhook(&webhook, &issuer)?;
        if let Some(certificate) = tls.certificate {
            if state.certificates.insert(webhook.certificate_name()) {
                debug!(certificate = %certificate, "adding certificate");
                if !state.certificate_namespaces.contains(&webhook.namespace) {
                    state.certificate_namespaces.push(webhook.namespace.clone());
                }
                state.added.push(certificate);
            }
        }
        let (key, value) = &tls.webhook_annotation;
        resources[i].set_annotation(key, value);

        if state.services.insert(webhook.service_name.clone()) {
            ensure_service(&mut resources, &mut state, &webhook, &tls.service_annotations)?;
            if options.mount_serving_cert {
                mount_in_owner(&mut resources, &mut state, &webhook)?;
            }
        }
    }

    // a namespaced Issuer is only visible to Certificates in its own namespace
    if options.issuer.is_none() {
        for namespace in &state.certificate_namespaces {
            if let Some(issuer) = options.provider.self_signed_issuer(&issuer, namespace)? {
                state.added.push(issuer);
            }
        }
    }

    info!(
        provider = %options.provider,
        certificates = state.certificates.len(),
        services = state.services.len(),
        added = state.added.len(),
        "provisioned webhook certificates"
    );
    resources.extend(state.added);
    Ok(resources)
}

fn is_webhook_bearing(resource: &Resource, conversion_crds: bool) -> bool {
    kinds::is_webhook_configuration(resource.kind())
        || (conversion_crds
            && resource.is_kind(kinds::CRD)
            && resource.pointer("/spec/conversion/strategy") == Some(&json!("Webhook")))
}

/// First Deployment name, else first ServiceAccount name, else "operator"
fn operator_name(resources: &[Resource]) -> String {
    [kinds::DEPLOYMENT, kinds::SERVICE_ACCOUNT]
        .iter()
        .find_map(|kind| resources.iter().find(|r| r.is_kind(kind) && !r.name().is_empty()))
        .map(|r| r.name().to_string())
        .unwrap_or_else(|| FALLBACK_OPERATOR_NAME.to_string())
}

fn typed<T: DeserializeOwned>(resource: &Resource) -> Result<T> {
    resource
        .to_typed()
        .map_err(|source| ManifestError::Provisioning {
            resource: resource.to_string(),
            source,
        })
}

/// Service linkage of the first webhook entry, if it names a service
pub fn webhook_info(resource: &Resource, default_namespace: &str) -> Result<Option<WebhookInfo>> {
    let service = match resource.kind() {
        kinds::VALIDATING_WEBHOOK => typed::<ValidatingWebhookConfiguration>(resource)?
            .webhooks
            .and_then(|w| w.into_iter().next())
            .and_then(|w| w.client_config.service)
            .map(|s| (s.name, s.namespace, s.port)),
        kinds::MUTATING_WEBHOOK => typed::<MutatingWebhookConfiguration>(resource)?
            .webhooks
            .and_then(|w| w.into_iter().next())
            .and_then(|w| w.client_config.service)
            .map(|s| (s.name, s.namespace, s.port)),
        kinds::CRD => typed::<CustomResourceDefinition>(resource)?
            .spec
            .conversion
            .and_then(|c| c.webhook)
            .and_then(|w| w.client_config)
            .and_then(|c| c.service)
            .map(|s| (s.name, s.namespace, s.port)),
        _ => None,
    };

    Ok(service.map(|(name, namespace, port)| WebhookInfo {
        service_name: name,
        namespace: if namespace.is_empty() {
            default_namespace.to_string()
        } else {
            namespace
        },
        port: port.unwrap_or(DEFAULT_WEBHOOK_PORT),
    }))
}

fn service_port(port: i32, target: IntOrString) -> ServicePort {
    ServicePort {
        name: Some(WEBHOOK_PORT_NAME.to_string()),
        port,
        target_port: Some(target),
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }
}

/// Deployment owning a `<deployment>-webhook-service`
fn owner_index(resources: &[Resource], webhook: &WebhookInfo) -> Option<usize> {
    let deployment = webhook.service_name.strip_suffix(WEBHOOK_SERVICE_SUFFIX)?;
    resources.iter().position(|r| {
        r.is_kind(kinds::DEPLOYMENT)
            && r.name() == deployment
            && r.namespace().is_none_or(|ns| ns == webhook.namespace)
    })
}

/// Correct an existing Service's port, or synthesize the Service
fn ensure_service(
    resources: &mut [Resource],
    state: &mut ProvisionState,
    webhook: &WebhookInfo,
    annotations: &[(&'static str, String)],
) -> Result<()> {
    let existing = resources.iter().position(|r| {
        r.is_kind(kinds::SERVICE)
            && r.name() == webhook.service_name
            && r.namespace().is_none_or(|ns| ns == webhook.namespace)
    });

    if let Some(index) = existing {
        let service = &mut resources[index];
        let current: Service = typed(service)?;
        let ports = current
            .spec
            .as_ref()
            .and_then(|s| s.ports.as_ref())
            .filter(|p| !p.is_empty());

        match ports {
            None => {
                debug!(service = %service, port = webhook.port, "service has no ports, adding one");
                let port = json!({
                    "name": WEBHOOK_PORT_NAME,
                    "port": webhook.port,
                    "targetPort": webhook.port,
                    "protocol": "TCP",
                });
                let fields = service.fields_mut();
                let spec = fields.entry("spec").or_insert_with(|| json!({}));
                if let Value::Object(spec) = spec {
                    spec.insert("ports".to_string(), json!([port]));
                }
            }
            Some(ports) if ports[0].port != webhook.port => {
                debug!(service = %service, from = ports[0].port, to = webhook.port, "correcting service port");
                if let Some(port) = service.pointer_mut("/spec/ports/0/port") {
                    *port = json!(webhook.port);
                }
            }
            Some(_) => {}
        }
        for (key, value) in annotations {
            service.set_annotation(key, value);
        }
        return Ok(());
    }

    let (target_port, selector) = match owner_index(resources, webhook) {
        Some(index) => {
            let deployment: Deployment = typed(&resources[index])?;
            let spec = deployment.spec.unwrap_or_default();
            let target = spec
                .template
                .spec
                .as_ref()
                .and_then(|pod| pod.containers.first())
                .and_then(|c| c.ports.as_ref())
                .and_then(|ports| ports.first())
                .map(|p| p.container_port)
                .unwrap_or(webhook.port);
            let selector = spec.selector.match_labels.unwrap_or_default();
            (target, selector)
        }
        None => {
            let app = webhook
                .service_name
                .strip_suffix(WEBHOOK_SERVICE_SUFFIX)
                .unwrap_or(&webhook.service_name);
            debug!(service = %webhook.service_name, "owning deployment not found, using default selector");
            (
                webhook.port,
                BTreeMap::from([(FALLBACK_SELECTOR_LABEL.to_string(), app.to_string())]),
            )
        }
    };

    let service_annotations: BTreeMap<String, String> = annotations
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect();
    let service = Service {
        metadata: ObjectMeta {
            name: Some(webhook.service_name.clone()),
            namespace: Some(webhook.namespace.clone()),
            annotations: (!service_annotations.is_empty()).then_some(service_annotations),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            ports: Some(vec![service_port(webhook.port, IntOrString::Int(target_port))]),
            selector: Some(selector),
            ..Default::default()
        }),
        ..Default::default()
    };
    debug!(service = %webhook.service_name, target_port, "synthesizing webhook service");
    state.added.push(Resource::from_typed(&service)?);
    Ok(())
}

fn mount_in_owner(
    resources: &mut [Resource],
    state: &mut ProvisionState,
    webhook: &WebhookInfo,
) -> Result<()> {
    let Some(index) = owner_index(resources, webhook) else {
        return Ok(());
    };
    if state.deployments.insert(resources[index].name().to_string()) {
        mount_serving_cert(&mut resources[index], &webhook.secret_name())?;
    }
    Ok(())
}
