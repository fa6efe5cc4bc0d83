//! Generic Kubernetes resource objects
//!
//! Every stage after bundle loading works on `Resource`, an untyped object tree.
//! Typed `k8s-openapi` structs are only used at the edges: to build new objects
//! and to read existing ones with validation.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{CoreError, Result};

/// Well-known kind names
pub mod kinds {
    pub const NAMESPACE: &str = "Namespace";
    pub const CRD: &str = "CustomResourceDefinition";
    pub const SERVICE_ACCOUNT: &str = "ServiceAccount";
    pub const ROLE: &str = "Role";
    pub const ROLE_BINDING: &str = "RoleBinding";
    pub const CLUSTER_ROLE: &str = "ClusterRole";
    pub const CLUSTER_ROLE_BINDING: &str = "ClusterRoleBinding";
    pub const DEPLOYMENT: &str = "Deployment";
    pub const SERVICE: &str = "Service";
    pub const ISSUER: &str = "Issuer";
    pub const CLUSTER_ISSUER: &str = "ClusterIssuer";
    pub const CERTIFICATE: &str = "Certificate";
    pub const VALIDATING_WEBHOOK: &str = "ValidatingWebhookConfiguration";
    pub const MUTATING_WEBHOOK: &str = "MutatingWebhookConfiguration";
    pub const CSV: &str = "ClusterServiceVersion";

    /// Returns true for admission webhook configuration kinds
    pub fn is_webhook_configuration(kind: &str) -> bool {
        kind == VALIDATING_WEBHOOK || kind == MUTATING_WEBHOOK
    }
}

/// A generic Kubernetes object
///
/// The wrapped value is always a JSON object. Field order is preserved so that
/// rendered output follows the order objects were built in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct Resource(Map<String, Value>);

impl Resource {
    /// Wrap a JSON value, which must be an object
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(CoreError::InvalidResource {
                message: format!("expected an object, found {}", type_name(&other)),
            }),
        }
    }

    /// Parse a single YAML document
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let value: Value = serde_yaml::from_str(yaml)?;
        Self::from_value(value)
    }

    /// Build a resource from a typed object
    pub fn from_typed<T: Serialize>(object: &T) -> Result<Self> {
        let value = serde_json::to_value(object)?;
        Self::from_value(value)
    }

    /// Convert into a typed object, attributing failures to this resource
    pub fn to_typed<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(Value::Object(self.0.clone())).map_err(|source| {
            CoreError::Conversion {
                resource: self.key(),
                source,
            }
        })
    }

    pub fn api_version(&self) -> &str {
        self.0.get("apiVersion").and_then(Value::as_str).unwrap_or("")
    }

    pub fn kind(&self) -> &str {
        self.0.get("kind").and_then(Value::as_str).unwrap_or("")
    }

    /// API group portion of apiVersion ("" for the core group)
    pub fn group(&self) -> &str {
        match self.api_version().split_once('/') {
            Some((group, _)) => group,
            None => "",
        }
    }

    pub fn name(&self) -> &str {
        self.metadata_str("name").unwrap_or("")
    }

    pub fn namespace(&self) -> Option<&str> {
        self.metadata_str("namespace")
    }

    /// Unique key for logging and error attribution
    pub fn key(&self) -> String {
        format!("{}/{}", self.kind(), self.name())
    }

    pub fn is_kind(&self, kind: &str) -> bool {
        self.kind() == kind
    }

    pub fn set_namespace(&mut self, namespace: &str) {
        self.metadata_mut()
            .insert("namespace".to_string(), Value::String(namespace.to_string()));
    }

    pub fn annotations(&self) -> BTreeMap<String, String> {
        self.string_map("annotations")
    }

    pub fn labels(&self) -> BTreeMap<String, String> {
        self.string_map("labels")
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.0
            .get("metadata")?
            .get("annotations")?
            .get(key)?
            .as_str()
    }

    pub fn set_annotation(&mut self, key: &str, value: &str) {
        self.set_metadata_entry("annotations", key, value);
    }

    pub fn set_label(&mut self, key: &str, value: &str) {
        self.set_metadata_entry("labels", key, value);
    }

    /// Look up a nested field by JSON pointer (e.g. `/spec/ports/0/port`)
    pub fn pointer(&self, pointer: &str) -> Option<&Value> {
        let mut tokens = pointer.strip_prefix('/')?.split('/');
        let mut current = self.0.get(&unescape(tokens.next()?))?;
        for token in tokens {
            let token = unescape(token);
            current = match current {
                Value::Object(map) => map.get(&token)?,
                Value::Array(items) => items.get(token.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Mutable nested lookup by JSON pointer
    pub fn pointer_mut(&mut self, pointer: &str) -> Option<&mut Value> {
        let mut tokens = pointer.strip_prefix('/')?.split('/');
        let mut current = self.0.get_mut(&unescape(tokens.next()?))?;
        for token in tokens {
            let token = unescape(token);
            current = match current {
                Value::Object(map) => map.get_mut(&token)?,
                Value::Array(items) => items.get_mut(token.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Top-level field map
    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn fields_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.0
    }

    /// Owned copy as a JSON value
    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    /// Render as a YAML document (without the leading `---`)
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(&self.0)?)
    }

    fn metadata_str(&self, key: &str) -> Option<&str> {
        self.0.get("metadata")?.get(key)?.as_str()
    }

    fn metadata_mut(&mut self) -> &mut Map<String, Value> {
        let metadata = self
            .0
            .entry("metadata")
            .or_insert_with(|| Value::Object(Map::new()));
        if !metadata.is_object() {
            *metadata = Value::Object(Map::new());
        }
        match metadata {
            Value::Object(map) => map,
            _ => unreachable!("metadata was just replaced with an object"),
        }
    }

    fn set_metadata_entry(&mut self, field: &str, key: &str, value: &str) {
        let entry = self
            .metadata_mut()
            .entry(field)
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        if let Value::Object(map) = entry {
            map.insert(key.to_string(), Value::String(value.to_string()));
        }
    }

    fn string_map(&self, field: &str) -> BTreeMap<String, String> {
        self.0
            .get("metadata")
            .and_then(|m| m.get(field))
            .and_then(Value::as_object)
            .map(|map| {
                map.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl TryFrom<Value> for Resource {
    type Error = CoreError;

    fn try_from(value: Value) -> Result<Self> {
        Self::from_value(value)
    }
}

impl From<Resource> for Value {
    fn from(resource: Resource) -> Self {
        resource.into_value()
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.namespace() {
            Some(ns) => write!(f, "{}/{}/{}", ns, self.kind(), self.name()),
            None => write!(f, "{}/{}", self.kind(), self.name()),
        }
    }
}

fn unescape(token: &str) -> String {
    token.replace("~1", "/").replace("~0", "~")
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a sequence",
        Value::Object(_) => "an object",
    }
}

static DNS1123_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").expect("static regex is valid")
});

/// Validate a namespace name as a DNS-1123 label
pub fn validate_namespace(namespace: &str) -> Result<()> {
    let invalid = |reason: &str| CoreError::InvalidNamespace {
        namespace: namespace.to_string(),
        reason: reason.to_string(),
    };

    if namespace.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if namespace.len() > 63 {
        return Err(invalid("must be no more than 63 characters"));
    }
    if !DNS1123_LABEL.is_match(namespace) {
        return Err(invalid(
            "must consist of lower case alphanumeric characters or '-', and must start and end with an alphanumeric character",
        ));
    }
    Ok(())
}
