//! Error types for image retrieval and catalog resolution

use thiserror::Error;

/// Image and catalog operation errors
#[derive(Debug, Error)]
pub enum ImageError {
    // ============ Configuration Errors ============
    #[error("invalid image reference '{reference}': {reason}")]
    InvalidReference { reference: String, reason: String },

    #[error("invalid registry configuration: {message}")]
    InvalidConfig { message: String },

    // ============ Retrieval Errors ============
    #[error("unauthorized to pull {reference}: {message}")]
    Unauthorized { reference: String, message: String },

    #[error(
        "unauthorized to pull {reference}: {message}\nHint: run `docker login {registry}` or pass --username and --password"
    )]
    LoginRequired {
        reference: String,
        registry: String,
        message: String,
    },

    #[error("failed to pull {reference}: {message}")]
    Registry { reference: String, message: String },

    #[error("digest mismatch for layer {expected}: got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("no layers found containing paths: {paths}")]
    NoMatchingLayers { reference: String, paths: String },

    #[error("absolute file path in tar: {path}")]
    AbsolutePath { path: String },

    #[error("illegal file path in tar: {path}")]
    IllegalPath { path: String },

    #[error("failed to extract {path}: {source}")]
    Extraction {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("credential helper '{helper}' failed: {message}")]
    CredentialHelper { helper: String, message: String },

    // ============ Resolution Errors ============
    #[error("package '{package}' not found in catalog")]
    PackageNotFound { package: String },

    #[error("package '{package}' declares no default channel; specify a channel")]
    NoDefaultChannel { package: String },

    #[error("channel '{channel}' not found for package '{package}' (available: {available})")]
    ChannelNotFound {
        package: String,
        channel: String,
        available: String,
    },

    #[error("channel '{channel}' of package '{package}' has no entries")]
    EmptyChannel { package: String, channel: String },

    #[error(
        "version '{version}' not found in channel '{channel}' of package '{package}' (available: {available})"
    )]
    VersionNotFound {
        package: String,
        channel: String,
        version: String,
        available: String,
    },

    #[error("bundle '{bundle}' of package '{package}' not found in catalog")]
    BundleNotFound { package: String, bundle: String },

    #[error("bundle '{bundle}' has no image reference")]
    BundleWithoutImage { bundle: String },

    #[error("failed to parse catalog file {path}: {message}")]
    CatalogParse { path: String, message: String },

    // ============ IO Errors ============
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for image operations
pub type Result<T> = std::result::Result<T, ImageError>;

impl ImageError {
    /// True for errors raised before any network or filesystem work
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            ImageError::InvalidReference { .. } | ImageError::InvalidConfig { .. }
        )
    }

    /// True for package/channel/version lookups that found nothing
    pub fn is_resolution(&self) -> bool {
        matches!(
            self,
            ImageError::PackageNotFound { .. }
                | ImageError::NoDefaultChannel { .. }
                | ImageError::ChannelNotFound { .. }
                | ImageError::EmptyChannel { .. }
                | ImageError::VersionNotFound { .. }
                | ImageError::BundleNotFound { .. }
                | ImageError::BundleWithoutImage { .. }
        )
    }
}

impl From<walkdir::Error> for ImageError {
    fn from(e: walkdir::Error) -> Self {
        let path = e
            .path()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        match e.into_io_error() {
            Some(source) => ImageError::Extraction { path, source },
            None => ImageError::CatalogParse {
                path,
                message: "filesystem loop detected".to_string(),
            },
        }
    }
}
