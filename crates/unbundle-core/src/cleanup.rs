//! Removal of empty fields before rendering
//!
//! Bundle manifests and serialized typed objects carry plenty of noise:
//! `creationTimestamp: null`, `status: {}`, `resources: {}`. Map fields whose
//! value is null, an empty string, an empty map or an empty sequence are
//! dropped, bottom-up, so a map that only contained noise disappears too.
//!
//! Sequence elements are cleaned but never removed: `apiGroups: [""]` names
//! the core group and must survive.

use serde_json::Value;

use crate::object::Resource;

/// Keys whose empty map value carries meaning and must be kept
const MEANINGFUL_EMPTY_KEYS: &[&str] = &["emptyDir", "selfSigned"];

/// Keys whose empty map value carries meaning only under a given parent key
///
/// `subresources.status: {}` enables the status subresource of a CRD version.
const MEANINGFUL_EMPTY_CHILDREN: &[(&str, &str)] = &[("subresources", "status")];

/// Clean a resource in place
pub fn clean_resource(resource: &mut Resource) {
    let fields = resource.fields_mut();
    fields.retain(|key, value| {
        clean_under(Some(key.as_str()), value);
        !is_removable(None, key, value)
    });
}

/// Recursively remove empty fields from a value
pub fn clean_value(value: &mut Value) {
    clean_under(None, value);
}

/// Clean `value`, which sits under the map key `parent` (if any)
fn clean_under(parent: Option<&str>, value: &mut Value) {
    match value {
        Value::Object(map) => {
            map.retain(|key, child| {
                clean_under(Some(key.as_str()), child);
                !is_removable(parent, key, child)
            });
        }
        Value::Array(items) => {
            // elements inherit the key of the sequence they belong to
            for item in items.iter_mut() {
                clean_under(parent, item);
            }
        }
        _ => {}
    }
}

fn is_removable(parent: Option<&str>, key: &str, value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty() && !is_meaningful_empty(parent, key),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

fn is_meaningful_empty(parent: Option<&str>, key: &str) -> bool {
    if MEANINGFUL_EMPTY_KEYS.contains(&key) || key.ends_with("Selector") || key == "selector" {
        return true;
    }
    parent.is_some_and(|parent| MEANINGFUL_EMPTY_CHILDREN.contains(&(parent, key)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_removes_empty_and_null_fields() {
        let mut resource = Resource::from_value(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {
                "name": "settings",
                "creationTimestamp": null,
                "labels": {},
                "annotations": {"note": ""}
            },
            "data": {"replicas": "3"},
            "binaryData": {},
            "items": [],
            "comment": "",
            "status": {"conditions": [], "observed": null}
        }))
        .unwrap();

        clean_resource(&mut resource);

        assert_eq!(
            resource.to_value(),
            json!({
                "apiVersion": "v1",
                "kind": "ConfigMap",
                "metadata": {"name": "settings"},
                "data": {"replicas": "3"}
            })
        );
    }

    #[test]
    fn test_preserves_zero_and_false() {
        let mut value = json!({
            "spec": {
                "replicas": 0,
                "paused": false,
                "ratio": 0.0,
                "empty": {}
            }
        });

        clean_value(&mut value);

        assert_eq!(
            value,
            json!({"spec": {"replicas": 0, "paused": false, "ratio": 0.0}})
        );
    }

    #[test]
    fn test_keeps_sequence_elements() {
        let mut value = json!({
            "rules": [
                {"apiGroups": [""], "resources": ["pods"], "verbs": ["get"], "resourceNames": []}
            ]
        });

        clean_value(&mut value);

        assert_eq!(
            value,
            json!({"rules": [{"apiGroups": [""], "resources": ["pods"], "verbs": ["get"]}]})
        );
    }

    #[test]
    fn test_keeps_meaningful_empty_maps() {
        let mut value = json!({
            "spec": {
                "selfSigned": {},
                "podSelector": {},
                "volumes": [{"name": "scratch", "emptyDir": {}}],
                "resources": {}
            }
        });

        clean_value(&mut value);

        assert_eq!(
            value,
            json!({
                "spec": {
                    "selfSigned": {},
                    "podSelector": {},
                    "volumes": [{"name": "scratch", "emptyDir": {}}]
                }
            })
        );
    }

    #[test]
    fn test_keeps_crd_status_subresource() {
        let mut resource = Resource::from_value(json!({
            "apiVersion": "apiextensions.k8s.io/v1",
            "kind": "CustomResourceDefinition",
            "metadata": {"name": "widgets.example.com"},
            "spec": {
                "versions": [{
                    "name": "v1",
                    "served": true,
                    "storage": true,
                    "subresources": {"status": {}}
                }]
            },
            "status": {}
        }))
        .unwrap();

        clean_resource(&mut resource);

        let value = resource.to_value();
        assert_eq!(value["spec"]["versions"][0]["subresources"], json!({"status": {}}));
        assert!(value.get("status").is_none());
    }

    #[test]
    fn test_nested_noise_collapses() {
        let mut value = json!({"a": {"b": {"c": null, "d": [], "e": ""}}, "keep": 1});
        clean_value(&mut value);
        assert_eq!(value, json!({"keep": 1}));
    }
}
