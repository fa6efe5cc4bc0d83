//! CLI error types with exit code handling
//!
//! Library errors are classified once, here, into the categories the exit
//! codes distinguish.

use miette::Diagnostic;
use thiserror::Error;
use unbundle_image::ImageError;
use unbundle_manifest::ManifestError;

use crate::exit_codes;

/// CLI-specific error type that includes exit code information
#[derive(Error, Debug, Diagnostic, Clone)]
pub enum CliError {
    /// Invalid user input, detected before any registry or filesystem access
    #[error("Configuration error: {message}")]
    #[diagnostic(code(unbundle::cli::config))]
    Config {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// Package, channel or version absent from a catalog
    #[error("Resolution failed: {message}")]
    #[diagnostic(code(unbundle::cli::resolution))]
    Resolution {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// Pulling or extracting image content failed
    #[error("Retrieval failed: {message}")]
    #[diagnostic(code(unbundle::cli::retrieval))]
    Retrieval {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// Bundle content could not be turned into manifests
    #[error("Bundle error: {message}")]
    #[diagnostic(code(unbundle::cli::bundle))]
    Bundle {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// IO error (file not found, permissions, etc.)
    #[error("IO error: {message}")]
    #[diagnostic(code(unbundle::cli::io))]
    Io { message: String },

    /// Interrupted or out of time
    #[error("{message}")]
    #[diagnostic(code(unbundle::cli::cancelled))]
    Cancelled { message: String },

    /// Wrapped error for passthrough (stores the formatted message)
    #[error("{message}")]
    #[diagnostic(code(unbundle::cli::error))]
    Other { message: String },
}

impl CliError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Config { .. } => exit_codes::CONFIG_ERROR,
            CliError::Resolution { .. } => exit_codes::RESOLUTION_ERROR,
            CliError::Retrieval { .. } => exit_codes::RETRIEVAL_ERROR,
            CliError::Bundle { .. } => exit_codes::BUNDLE_ERROR,
            CliError::Io { .. } => exit_codes::IO_ERROR,
            CliError::Cancelled { .. } => exit_codes::CANCELLED,
            CliError::Other { .. } => exit_codes::ERROR,
        }
    }

    /// Create a configuration error with help text
    pub fn config_with_help(message: impl Into<String>, help: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            help: Some(help.into()),
        }
    }

    /// Create a cancellation error
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::Cancelled {
            message: message.into(),
        }
    }

    /// Create an IO error with the path it concerns
    pub fn io(path: impl std::fmt::Display, err: std::io::Error) -> Self {
        Self::Io {
            message: format!("{}: {}", path, err),
        }
    }

    /// Create a generic error
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
        }
    }
}

impl From<ManifestError> for CliError {
    fn from(err: ManifestError) -> Self {
        let message = err.to_string();
        if err.is_configuration() {
            return CliError::Config {
                message,
                help: config_help(&err),
            };
        }
        if err.is_resolution() {
            return CliError::Resolution {
                message,
                help: Some(
                    "Run `unbundle resolve --catalog <catalog> --package <name> --channel <channel>` to check a lookup"
                        .to_string(),
                ),
            };
        }
        if err.is_retrieval() {
            return CliError::Retrieval {
                help: retrieval_help(&err),
                message,
            };
        }
        match err {
            ManifestError::Io(e) => CliError::Io {
                message: e.to_string(),
            },
            _ => CliError::Bundle {
                message,
                help: Some(
                    "A bundle needs a manifests/ directory with exactly one ClusterServiceVersion"
                        .to_string(),
                ),
            },
        }
    }
}

fn config_help(err: &ManifestError) -> Option<String> {
    match err {
        ManifestError::UnknownCaProvider { .. } => {
            Some("Use --ca-provider cert-manager or --ca-provider service-ca".to_string())
        }
        ManifestError::InvalidIssuerKind { .. } => {
            Some("Use --issuer-kind Issuer or --issuer-kind ClusterIssuer".to_string())
        }
        _ => None,
    }
}

fn retrieval_help(err: &ManifestError) -> Option<String> {
    match err {
        ManifestError::Image(ImageError::Unauthorized { .. }) => {
            Some("Check the registry credentials passed with --username/--password".to_string())
        }
        ManifestError::Image(ImageError::NoMatchingLayers { .. }) => {
            Some("Check --configs-dir against the catalog image layout".to_string())
        }
        ManifestError::Image(ImageError::Registry { .. }) => {
            Some("Use --insecure for registries served over plain HTTP".to_string())
        }
        _ => None,
    }
}
