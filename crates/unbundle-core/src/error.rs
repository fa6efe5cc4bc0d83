//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("invalid namespace '{namespace}': {reason}")]
    InvalidNamespace { namespace: String, reason: String },

    #[error("invalid resource: {message}")]
    InvalidResource { message: String },

    #[error("failed to convert {resource}: {source}")]
    Conversion {
        resource: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid filter expression '{expression}': {message}")]
    InvalidExpression { expression: String, message: String },

    #[error("Failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),
}

impl CoreError {
    /// True for errors raised while validating user input, before any I/O
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            CoreError::InvalidNamespace { .. } | CoreError::InvalidExpression { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
