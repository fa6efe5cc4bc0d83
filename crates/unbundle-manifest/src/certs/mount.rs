//! Serving certificate volumes for webhook deployments
//!
//! controller-runtime reads its serving certificate from
//! `/tmp/k8s-webhook-server/serving-certs`; aggregated API servers built on
//! k8s.io/apiserver read `/apiserver.local.config/certificates`. Both are
//! mounted from the same secret.

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{KeyToPath, SecretVolumeSource, Volume, VolumeMount};
use tracing::debug;
use unbundle_core::Resource;

use crate::error::{ManifestError, Result};

pub const WEBHOOK_CERT_VOLUME: &str = "webhook-cert";
pub const WEBHOOK_CERT_DIR: &str = "/tmp/k8s-webhook-server/serving-certs";
pub const APISERVICE_CERT_VOLUME: &str = "apiservice-cert";
pub const APISERVICE_CERT_DIR: &str = "/apiserver.local.config/certificates";

/// Mount `secret_name` into every container of a deployment
///
/// Volumes or mount paths that already exist are left as they are.
pub fn mount_serving_cert(deployment: &mut Resource, secret_name: &str) -> Result<()> {
    let mut typed: Deployment = deployment
        .to_typed()
        .map_err(|source| ManifestError::Provisioning {
            resource: deployment.to_string(),
            source,
        })?;

    let Some(pod) = typed
        .spec
        .as_mut()
        .and_then(|spec| spec.template.spec.as_mut())
    else {
        debug!(deployment = %deployment, "no pod spec, skipping certificate mount");
        return Ok(());
    };

    let wanted = [
        (
            WEBHOOK_CERT_VOLUME,
            WEBHOOK_CERT_DIR,
            [("tls.crt", "tls.crt"), ("tls.key", "tls.key")],
        ),
        (
            APISERVICE_CERT_VOLUME,
            APISERVICE_CERT_DIR,
            [("tls.crt", "apiserver.crt"), ("tls.key", "apiserver.key")],
        ),
    ];

    let volumes = pod.volumes.get_or_insert_with(Vec::new);
    for (name, _, items) in &wanted {
        if volumes.iter().any(|v| v.name == *name) {
            continue;
        }
        volumes.push(Volume {
            name: name.to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(secret_name.to_string()),
                items: Some(
                    items
                        .iter()
                        .map(|(key, path)| KeyToPath {
                            key: key.to_string(),
                            path: path.to_string(),
                            ..Default::default()
                        })
                        .collect(),
                ),
                ..Default::default()
            }),
            ..Default::default()
        });
    }

    for container in &mut pod.containers {
        let mounts = container.volume_mounts.get_or_insert_with(Vec::new);
        for (name, path, _) in &wanted {
            if mounts.iter().any(|m| m.mount_path == *path) {
                continue;
            }
            mounts.push(VolumeMount {
                name: name.to_string(),
                mount_path: path.to_string(),
                read_only: Some(true),
                ..Default::default()
            });
        }
    }

    debug!(deployment = %deployment, secret = secret_name, "mounted serving certificate");
    *deployment = Resource::from_typed(&typed)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn deployment() -> Resource {
        Resource::from_value(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "demo-controller", "namespace": "demo"},
            "spec": {
                "selector": {"matchLabels": {"app": "demo"}},
                "template": {
                    "metadata": {"labels": {"app": "demo"}},
                    "spec": {
                        "containers": [
                            {"name": "manager", "image": "demo:v1"},
                            {
                                "name": "proxy",
                                "image": "proxy:v1",
                                "volumeMounts": [{"name": "custom", "mountPath": "/tmp/k8s-webhook-server/serving-certs"}]
                            }
                        ],
                        "volumes": [{"name": "custom", "emptyDir": {}}]
                    }
                }
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_mounts_both_locations() {
        let mut deployment = deployment();

        mount_serving_cert(&mut deployment, "svc-tls").unwrap();

        let volumes = deployment.pointer("/spec/template/spec/volumes").unwrap();
        assert_eq!(volumes.as_array().unwrap().len(), 3);
        assert_eq!(
            deployment.pointer("/spec/template/spec/volumes/2/secret/items/1"),
            Some(&json!({"key": "tls.key", "path": "apiserver.key"}))
        );

        let manager = deployment
            .pointer("/spec/template/spec/containers/0/volumeMounts")
            .unwrap();
        assert_eq!(manager.as_array().unwrap().len(), 2);

        // The proxy already mounts something at the webhook path
        let proxy = deployment
            .pointer("/spec/template/spec/containers/1/volumeMounts")
            .unwrap()
            .as_array()
            .unwrap();
        assert_eq!(proxy.len(), 2);
        assert_eq!(proxy[0]["name"], json!("custom"));
        assert_eq!(proxy[1]["mountPath"], json!(APISERVICE_CERT_DIR));
    }

    #[test]
    fn test_mount_is_idempotent() {
        let mut once = deployment();
        mount_serving_cert(&mut once, "svc-tls").unwrap();
        let mut twice = once.clone();
        mount_serving_cert(&mut twice, "svc-tls").unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_invalid_deployment_aborts() {
        let mut broken = Resource::from_value(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "broken"},
            "spec": {"replicas": "three"}
        }))
        .unwrap();

        let err = mount_serving_cert(&mut broken, "svc-tls").unwrap_err();

        assert!(matches!(err, ManifestError::Provisioning { .. }));
        assert!(err.to_string().contains("Deployment/broken"));
    }
}
