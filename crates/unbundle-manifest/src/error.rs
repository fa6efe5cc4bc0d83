//! Error types for unbundle-manifest

use thiserror::Error;
use unbundle_core::CoreError;
use unbundle_image::ImageError;

/// Result type for manifest operations
pub type Result<T> = std::result::Result<T, ManifestError>;

/// Errors raised while loading, synthesizing or provisioning
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ManifestError {
    // ============ Configuration Errors ============
    /// Only the `deployment` install strategy can be turned into manifests
    #[error("unsupported install strategy '{strategy}' in {csv} (only 'deployment' is supported)")]
    UnsupportedStrategy { csv: String, strategy: String },

    #[error("unknown CA provider '{name}' (expected one of: {expected})")]
    UnknownCaProvider { name: String, expected: String },

    #[error("invalid issuer kind '{kind}' (expected Issuer or ClusterIssuer)")]
    InvalidIssuerKind { kind: String },

    // ============ Bundle Errors ============
    #[error("no ClusterServiceVersion found in bundle at {path}")]
    MissingCsv { path: String },

    #[error("bundle at {path} contains more than one ClusterServiceVersion: {names}")]
    MultipleCsv { path: String, names: String },

    #[error("failed to parse {path}: {message}")]
    BundleParse { path: String, message: String },

    #[error("invalid ClusterServiceVersion '{name}': {message}")]
    InvalidCsv { name: String, message: String },

    // ============ Transformation Errors ============
    /// Provisioning is all-or-nothing; the offending object is named here
    #[error("certificate provisioning failed at {resource}: {source}")]
    Provisioning {
        resource: String,
        #[source]
        source: CoreError,
    },

    // ============ Wrapped Errors ============
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Image(#[from] ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ManifestError {
    /// True for errors caused by invalid user input
    pub fn is_configuration(&self) -> bool {
        match self {
            ManifestError::UnsupportedStrategy { .. }
            | ManifestError::UnknownCaProvider { .. }
            | ManifestError::InvalidIssuerKind { .. } => true,
            ManifestError::Core(e) => e.is_configuration(),
            ManifestError::Image(e) => e.is_configuration(),
            _ => false,
        }
    }

    /// True when a catalog lookup found nothing
    pub fn is_resolution(&self) -> bool {
        matches!(self, ManifestError::Image(e) if e.is_resolution())
    }

    /// True for failures reaching or reading from a registry
    pub fn is_retrieval(&self) -> bool {
        matches!(
            self,
            ManifestError::Image(e) if !e.is_configuration() && !e.is_resolution()
        )
    }
}

impl From<walkdir::Error> for ManifestError {
    fn from(e: walkdir::Error) -> Self {
        let path = e
            .path()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        ManifestError::BundleParse {
            path,
            message: e.to_string(),
        }
    }
}
