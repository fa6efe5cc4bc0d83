//! Resolve a package in a catalog image to its bundle image

use std::path::Path;

use tracing::{debug, info};

use crate::catalog::{BundleQuery, CatalogIndex, ResolvedBundle};
use crate::error::Result;
use crate::registry::{OciRegistry, RegistryClient};
use crate::retriever::ImageRetriever;

/// Directory holding the declarative config inside a catalog image
pub const DEFAULT_CONFIGS_DIR: &str = "configs";

pub struct CatalogResolver<'a, C = OciRegistry> {
    retriever: &'a ImageRetriever<C>,
    configs_dir: String,
}

impl<'a, C: RegistryClient> CatalogResolver<'a, C> {
    pub fn new(retriever: &'a ImageRetriever<C>) -> Self {
        Self {
            retriever,
            configs_dir: DEFAULT_CONFIGS_DIR.to_string(),
        }
    }

    /// Use a different declarative config directory
    pub fn configs_dir(mut self, dir: impl Into<String>) -> Self {
        self.configs_dir = dir.into();
        self
    }

    /// Pull the config subtree of `catalog` and resolve `query` against it
    ///
    /// The pulled catalog is removed before returning, whatever the outcome.
    pub async fn resolve(&self, catalog: &str, query: &BundleQuery) -> Result<ResolvedBundle> {
        let prefix = self.configs_dir.trim_matches('/').to_string();
        let mut content = self.retriever.retrieve(catalog, &[prefix.clone()]).await?;

        let resolved = self.resolve_in(content.path(), &prefix, query);
        let released = content.release();
        let resolved = resolved?;
        released?;

        info!(
            package = %resolved.package,
            channel = %resolved.channel,
            bundle = %resolved.bundle,
            image = %resolved.image,
            "resolved bundle"
        );
        Ok(resolved)
    }

    fn resolve_in(&self, root: &Path, prefix: &str, query: &BundleQuery) -> Result<ResolvedBundle> {
        let configs = root.join(prefix);
        let dir = if configs.is_dir() {
            configs
        } else {
            debug!(path = %configs.display(), "config directory missing, loading catalog root");
            root.to_path_buf()
        };
        CatalogIndex::load_dir(&dir)?.resolve(query)
    }
}
