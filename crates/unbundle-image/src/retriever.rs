//! Turn a path-or-reference string into content on disk

use std::path::{Path, PathBuf};

use oci_distribution::Reference;
use oci_distribution::manifest::OciDescriptor;
use oci_distribution::secrets::RegistryAuth;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::content::BundleContent;
use crate::credentials::{RegistryOptions, resolve_auth};
use crate::error::{ImageError, Result};
use crate::extract::{ExtractMode, extract_layer, matching_prefixes};
use crate::registry::{OciRegistry, RegistryClient, parse_reference};

/// Pulls images into private temporary directories
pub struct ImageRetriever<C = OciRegistry> {
    client: C,
    options: RegistryOptions,
    temp_root: Option<PathBuf>,
}

impl ImageRetriever<OciRegistry> {
    pub fn new(options: RegistryOptions) -> Self {
        let client = OciRegistry::new(options.insecure);
        Self::with_client(client, options)
    }
}

impl<C: RegistryClient> ImageRetriever<C> {
    pub fn with_client(client: C, options: RegistryOptions) -> Self {
        Self {
            client,
            options,
            temp_root: None,
        }
    }

    /// Create extraction directories under `root` instead of the system temp dir
    pub fn temp_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.temp_root = Some(root.into());
        self
    }

    /// Resolve `input` to content on disk
    ///
    /// An existing local directory is returned as-is. Anything else is pulled
    /// as an image. With `prefixes`, layers are scanned newest-first and only
    /// those containing a requested path are extracted; scanning stops once
    /// every prefix has been found.
    ///
    /// The temporary directory is removed if the pull fails, and when the
    /// returned future is dropped before completion.
    pub async fn retrieve(&self, input: &str, prefixes: &[String]) -> Result<BundleContent> {
        let local = Path::new(input);
        if local.is_dir() {
            debug!(path = %local.display(), "using local directory");
            return Ok(BundleContent::local(local));
        }

        let reference = parse_reference(input)?;
        let auth = resolve_auth(&reference, &self.options)?;
        let mut content = BundleContent::temporary(self.temp_root.as_deref())?;

        info!(reference = %reference, "pulling image");
        let pulled = if prefixes.is_empty() {
            self.pull_all(&reference, &auth, content.path()).await
        } else {
            self.pull_matching(&reference, &auth, prefixes, content.path())
                .await
        };

        match pulled {
            Ok(()) => Ok(content),
            Err(e) => {
                if let Err(release) = content.release() {
                    warn!(error = %release, "failed to remove extraction directory");
                }
                Err(e)
            }
        }
    }

    /// Flatten every layer, oldest first
    async fn pull_all(&self, reference: &Reference, auth: &RegistryAuth, dest: &Path) -> Result<()> {
        let manifest = self.fetch_manifest(reference, auth).await?;
        for layer in &manifest.layers {
            let data = self.fetch_layer(reference, layer).await?;
            let written = extract_layer(&data, &layer.media_type, dest, ExtractMode::Overlay)?;
            debug!(digest = %layer.digest, entries = written, "extracted layer");
        }
        Ok(())
    }

    async fn pull_matching(
        &self,
        reference: &Reference,
        auth: &RegistryAuth,
        prefixes: &[String],
        dest: &Path,
    ) -> Result<()> {
        let manifest = self.fetch_manifest(reference, auth).await?;
        let mut found = vec![false; prefixes.len()];

        for layer in manifest.layers.iter().rev() {
            let data = self.fetch_layer(reference, layer).await?;
            let matched = matching_prefixes(&data, &layer.media_type, prefixes)?;
            if matched.is_empty() {
                debug!(digest = %layer.digest, "layer has no requested paths, skipping");
                continue;
            }

            let written =
                extract_layer(&data, &layer.media_type, dest, ExtractMode::PreferExisting)?;
            debug!(digest = %layer.digest, entries = written, "extracted layer");

            for i in matched {
                found[i] = true;
            }
            if found.iter().all(|f| *f) {
                break;
            }
        }

        if !found.iter().any(|f| *f) {
            return Err(ImageError::NoMatchingLayers {
                reference: reference.whole(),
                paths: prefixes.join(", "),
            });
        }
        for (prefix, _) in prefixes.iter().zip(&found).filter(|(_, f)| !**f) {
            warn!(prefix = %prefix, "no layer contains requested path");
        }
        Ok(())
    }

    async fn fetch_manifest(
        &self,
        reference: &Reference,
        auth: &RegistryAuth,
    ) -> Result<oci_distribution::manifest::OciImageManifest> {
        self.client
            .fetch_manifest(reference, auth)
            .await
            .map_err(|e| self.with_login_hint(reference, e))
    }

    /// Fetch a layer blob and check it against its manifest digest
    async fn fetch_layer(&self, reference: &Reference, layer: &OciDescriptor) -> Result<Vec<u8>> {
        let data = self
            .client
            .fetch_blob(reference, layer)
            .await
            .map_err(|e| self.with_login_hint(reference, e))?;
        verify_digest(&layer.digest, &data)?;
        Ok(data)
    }

    fn with_login_hint(&self, reference: &Reference, error: ImageError) -> ImageError {
        match error {
            ImageError::Unauthorized { reference: r, message }
                if !self.options.has_explicit_credentials() =>
            {
                ImageError::LoginRequired {
                    reference: r,
                    registry: reference.registry().to_string(),
                    message,
                }
            }
            other => other,
        }
    }
}

fn verify_digest(expected: &str, data: &[u8]) -> Result<()> {
    let Some(hex_digest) = expected.strip_prefix("sha256:") else {
        debug!(digest = expected, "unsupported digest algorithm, not verified");
        return Ok(());
    };
    let actual = hex::encode(Sha256::digest(data));
    if actual != hex_digest {
        return Err(ImageError::DigestMismatch {
            expected: expected.to_string(),
            actual: format!("sha256:{}", actual),
        });
    }
    Ok(())
}
