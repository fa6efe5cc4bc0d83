//! The bundle-to-manifests pipeline
//!
//! retrieve → load → synthesize → sort → clean → filter → provision → sort
//!
//! All user input is validated when the pipeline is built, so configuration
//! errors surface before any registry or filesystem access.

use std::path::PathBuf;

use tracing::{info, warn};
use unbundle_core::{Resource, ResourceFilter, clean_resource, sort_for_apply, validate_namespace};
use unbundle_image::{
    BundleQuery, CatalogResolver, DEFAULT_CONFIGS_DIR, ImageRetriever, OciRegistry,
    RegistryClient, RegistryOptions, ResolvedBundle,
};

use crate::bundle::Bundle;
use crate::certs::{CertOptions, provision};
use crate::error::Result;
use crate::synth::synthesize;

/// Where the bundle comes from
#[derive(Debug, Clone)]
pub enum BundleSource {
    /// A bundle directory or bundle image reference
    Bundle(String),
    /// A package looked up in a catalog image
    Catalog { catalog: String, query: BundleQuery },
}

/// Everything the pipeline needs besides registry access
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub includes: Vec<String>,
    pub excludes: Vec<String>,
    pub certs: CertOptions,
    pub configs_dir: String,
}

impl PipelineOptions {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            includes: Vec::new(),
            excludes: Vec::new(),
            certs: CertOptions::new(namespace),
            configs_dir: DEFAULT_CONFIGS_DIR.to_string(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.certs.namespace
    }
}

/// Result of one run
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    /// Objects in apply order
    pub resources: Vec<Resource>,
    /// Name of the bundle's ClusterServiceVersion
    pub csv: String,
    /// Catalog resolution, when the bundle came from a catalog
    pub resolved: Option<ResolvedBundle>,
}

pub struct Pipeline<C = OciRegistry> {
    retriever: ImageRetriever<C>,
    filter: ResourceFilter,
    options: PipelineOptions,
}

impl Pipeline<OciRegistry> {
    pub fn new(
        options: PipelineOptions,
        registry: RegistryOptions,
        temp_root: Option<PathBuf>,
    ) -> Result<Self> {
        let mut retriever = ImageRetriever::new(registry);
        if let Some(root) = temp_root {
            retriever = retriever.temp_root(root);
        }
        Self::with_retriever(retriever, options)
    }
}

impl<C: RegistryClient> Pipeline<C> {
    /// Validate options and build a pipeline over `retriever`
    pub fn with_retriever(retriever: ImageRetriever<C>, options: PipelineOptions) -> Result<Self> {
        validate_namespace(options.namespace())?;
        let filter = ResourceFilter::new(&options.includes, &options.excludes)?;
        Ok(Self {
            retriever,
            filter,
            options,
        })
    }

    /// Resolve a package in a catalog to its bundle image
    pub async fn resolve(&self, catalog: &str, query: &BundleQuery) -> Result<ResolvedBundle> {
        Ok(CatalogResolver::new(&self.retriever)
            .configs_dir(self.options.configs_dir.clone())
            .resolve(catalog, query)
            .await?)
    }

    /// Run every stage for one bundle
    ///
    /// Pulled content is removed before returning, on success and failure,
    /// and when the returned future is dropped early.
    pub async fn run(&self, source: &BundleSource) -> Result<PipelineOutput> {
        let (input, resolved) = match source {
            BundleSource::Bundle(input) => (input.clone(), None),
            BundleSource::Catalog { catalog, query } => {
                let resolved = self.resolve(catalog, query).await?;
                (resolved.image.clone(), Some(resolved))
            }
        };

        let mut content = self.retriever.retrieve(&input, &[]).await?;
        let outcome = Bundle::load(content.path())
            .and_then(|bundle| Ok((bundle.csv.name().to_string(), self.transform(&bundle)?)));
        if let Err(e) = content.release() {
            warn!(error = %e, "failed to remove bundle content");
        }
        let (csv, resources) = outcome?;

        Ok(PipelineOutput {
            resources,
            csv,
            resolved,
        })
    }

    /// The in-memory stages, from a loaded bundle to ordered objects
    pub fn transform(&self, bundle: &Bundle) -> Result<Vec<Resource>> {
        let mut resources = synthesize(bundle, self.options.namespace())?;
        sort_for_apply(&mut resources);
        for resource in &mut resources {
            clean_resource(resource);
        }

        let before = resources.len();
        let resources = self.filter.apply(resources);
        if resources.len() != before {
            info!(kept = resources.len(), dropped = before - resources.len(), "applied filters");
        }

        let mut resources = provision(resources, &self.options.certs)?;
        sort_for_apply(&mut resources);
        Ok(resources)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::tests::CSV;
    use std::path::Path;
    use unbundle_core::kinds;

    fn options(namespace: &str) -> PipelineOptions {
        PipelineOptions::new(namespace)
    }

    fn pipeline(options: PipelineOptions, dir: &Path) -> Result<Pipeline> {
        Pipeline::new(
            options,
            RegistryOptions {
                docker_config: Some(dir.join("no-config.json")),
                ..Default::default()
            },
            Some(dir.join("tmp")),
        )
    }

    fn write_bundle(dir: &Path) -> PathBuf {
        let bundle = dir.join("bundle");
        std::fs::create_dir_all(bundle.join("manifests")).unwrap();
        std::fs::write(bundle.join("manifests/demo.clusterserviceversion.yaml"), CSV).unwrap();
        std::fs::write(
            bundle.join("manifests/config.yaml"),
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: demo-config\n  annotations: {}\ndata:\n  enabled: \"false\"\n  empty: \"\"\n",
        )
        .unwrap();
        bundle
    }

    #[tokio::test]
    async fn test_run_local_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = write_bundle(dir.path());
        let pipeline = pipeline(options("demo"), dir.path()).unwrap();

        let output = pipeline
            .run(&BundleSource::Bundle(bundle.display().to_string()))
            .await
            .unwrap();

        assert_eq!(output.csv, "demo-operator.v1.0.0");
        assert!(output.resolved.is_none());
        let kinds: Vec<&str> = output.resources.iter().map(Resource::kind).collect();
        assert_eq!(kinds.first(), Some(&kinds::NAMESPACE));
        assert_eq!(kinds.iter().filter(|k| **k == kinds::CERTIFICATE).count(), 1);
        assert_eq!(kinds.last(), Some(&"ConfigMap"));

        let config = output.resources.iter().find(|r| r.is_kind("ConfigMap")).unwrap();
        assert_eq!(
            config.to_value(),
            serde_json::json!({
                "apiVersion": "v1",
                "kind": "ConfigMap",
                "metadata": {"name": "demo-config", "namespace": "demo"},
                "data": {"enabled": "false"}
            })
        );
        assert!(bundle.exists());
    }

    #[tokio::test]
    async fn test_filters_apply_before_provisioning() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = write_bundle(dir.path());
        let mut options = options("demo");
        options.excludes = vec![r#".kind == "ValidatingWebhookConfiguration""#.to_string()];
        options.excludes.push(r#".kind == "MutatingWebhookConfiguration""#.to_string());
        let pipeline = pipeline(options, dir.path()).unwrap();

        let output = pipeline
            .run(&BundleSource::Bundle(bundle.display().to_string()))
            .await
            .unwrap();

        assert!(!output.resources.iter().any(|r| r.is_kind(kinds::CERTIFICATE)));
        assert!(!output.resources.iter().any(|r| r.is_kind(kinds::ISSUER)));
    }

    #[tokio::test]
    async fn test_catalog_source() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = write_bundle(dir.path());
        let catalog = dir.path().join("catalog");
        std::fs::create_dir_all(catalog.join("configs")).unwrap();
        std::fs::write(
            catalog.join("configs/index.json"),
            format!(
                r#"{{"schema": "olm.package", "name": "demo", "defaultChannel": "stable"}}
{{"schema": "olm.channel", "package": "demo", "name": "stable", "entries": [{{"name": "demo.v1.0.0"}}]}}
{{"schema": "olm.bundle", "package": "demo", "name": "demo.v1.0.0", "image": "{}"}}
"#,
                bundle.display()
            ),
        )
        .unwrap();
        let pipeline = pipeline(options("demo"), dir.path()).unwrap();

        let output = pipeline
            .run(&BundleSource::Catalog {
                catalog: catalog.display().to_string(),
                query: BundleQuery {
                    package: "demo".to_string(),
                    ..Default::default()
                },
            })
            .await
            .unwrap();

        assert_eq!(output.resolved.unwrap().bundle, "demo.v1.0.0");
        assert_eq!(output.csv, "demo-operator.v1.0.0");
    }

    #[test]
    fn test_configuration_errors_before_io() {
        let dir = tempfile::tempdir().unwrap();

        let err = pipeline(options("Bad Namespace"), dir.path()).err().unwrap();
        assert!(err.is_configuration());

        let mut bad_filter = options("demo");
        bad_filter.includes = vec!["kind ==".to_string()];
        let err = pipeline(bad_filter, dir.path()).err().unwrap();
        assert!(err.is_configuration());

        assert!(!dir.path().join("tmp").exists());
    }

    #[tokio::test]
    async fn test_missing_bundle_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("empty")).unwrap();
        let pipeline = pipeline(options("demo"), dir.path()).unwrap();

        let err = pipeline
            .run(&BundleSource::Bundle(dir.path().join("empty").display().to_string()))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("no ClusterServiceVersion"));
    }
}
