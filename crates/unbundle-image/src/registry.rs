//! OCI registry access
//!
//! The pull path only needs two operations, so the client sits behind the
//! small [`RegistryClient`] trait. [`OciRegistry`] implements it over
//! `oci-distribution`; tests substitute an in-memory registry.

use async_trait::async_trait;
use oci_distribution::Reference;
use oci_distribution::client::{Client, ClientConfig, ClientProtocol, linux_amd64_resolver};
use oci_distribution::manifest::{OciDescriptor, OciImageManifest};
use oci_distribution::secrets::RegistryAuth;
use oci_distribution::RegistryOperation;
use tracing::debug;

use crate::error::{ImageError, Result};

/// Fetch manifests and layer blobs from a registry
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Authenticate and fetch the image manifest
    ///
    /// Multi-architecture indexes resolve to the linux/amd64 image.
    async fn fetch_manifest(
        &self,
        reference: &Reference,
        auth: &RegistryAuth,
    ) -> Result<OciImageManifest>;

    /// Fetch one layer blob, unverified
    async fn fetch_blob(&self, reference: &Reference, layer: &OciDescriptor) -> Result<Vec<u8>>;
}

/// Production registry client
pub struct OciRegistry {
    client: Client,
}

impl OciRegistry {
    /// Create a client; `insecure` selects plain HTTP and skips TLS verification
    pub fn new(insecure: bool) -> Self {
        let config = if insecure {
            ClientConfig {
                protocol: ClientProtocol::Http,
                accept_invalid_certificates: true,
                platform_resolver: Some(Box::new(linux_amd64_resolver)),
                ..Default::default()
            }
        } else {
            ClientConfig {
                protocol: ClientProtocol::Https,
                platform_resolver: Some(Box::new(linux_amd64_resolver)),
                ..Default::default()
            }
        };
        Self {
            client: Client::new(config),
        }
    }
}

#[async_trait]
impl RegistryClient for OciRegistry {
    async fn fetch_manifest(
        &self,
        reference: &Reference,
        auth: &RegistryAuth,
    ) -> Result<OciImageManifest> {
        self.client
            .auth(reference, auth, RegistryOperation::Pull)
            .await
            .map_err(|e| classify(reference, e))?;

        let (manifest, digest) = self
            .client
            .pull_image_manifest(reference, auth)
            .await
            .map_err(|e| classify(reference, e))?;
        debug!(reference = %reference, digest = %digest, layers = manifest.layers.len(), "fetched manifest");
        Ok(manifest)
    }

    async fn fetch_blob(&self, reference: &Reference, layer: &OciDescriptor) -> Result<Vec<u8>> {
        let mut data = Vec::with_capacity(usize::try_from(layer.size).unwrap_or_default());
        self.client
            .pull_blob(reference, layer, &mut data)
            .await
            .map_err(|e| classify(reference, e))?;
        Ok(data)
    }
}

/// Sort registry failures into authorization and everything else
fn classify(reference: &Reference, error: impl std::fmt::Display) -> ImageError {
    let message = error.to_string();
    let lower = message.to_lowercase();
    let unauthorized = ["unauthorized", "401", "403", "denied", "authentication"]
        .iter()
        .any(|needle| lower.contains(needle));

    if unauthorized {
        ImageError::Unauthorized {
            reference: reference.whole(),
            message,
        }
    } else {
        ImageError::Registry {
            reference: reference.whole(),
            message,
        }
    }
}

/// Parse an image reference, accepting an optional `oci://` or `docker://`
/// transport prefix
pub fn parse_reference(input: &str) -> Result<Reference> {
    let clean = input
        .trim()
        .trim_start_matches("oci://")
        .trim_start_matches("docker://");

    if clean.is_empty() {
        return Err(ImageError::InvalidReference {
            reference: input.to_string(),
            reason: "empty reference".to_string(),
        });
    }

    Reference::try_from(clean).map_err(|e| ImageError::InvalidReference {
        reference: input.to_string(),
        reason: e.to_string(),
    })
}
