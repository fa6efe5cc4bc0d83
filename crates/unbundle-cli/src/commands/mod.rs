//! Command implementations

pub mod render;
pub mod resolve;

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use tracing::debug;
use unbundle_image::{BundleQuery, RegistryOptions};
use unbundle_manifest::{CaProvider, CertOptions, IssuerKind, IssuerRef, PipelineOptions};

use crate::config::Config;
use crate::error::CliError;
use crate::{CatalogArgs, CertArgs, RunArgs};

/// Namespace used when neither a flag, the environment nor the config names one
pub const DEFAULT_NAMESPACE: &str = "default";

/// Registry settings: flag or environment first, then the config file
pub fn registry_options(run: &RunArgs, config: &Config) -> RegistryOptions {
    RegistryOptions {
        username: run.username.clone(),
        password: run.password.clone(),
        insecure: run.insecure || config.registry.insecure,
        docker_config: run
            .docker_config
            .clone()
            .or_else(|| config.registry.docker_config.clone()),
    }
}

pub fn temp_root(run: &RunArgs, config: &Config) -> Option<PathBuf> {
    run.temp_dir.clone().or_else(|| config.temp_dir.clone())
}

/// Pipeline options shared by every command
pub fn pipeline_options(
    namespace: Option<&str>,
    catalog: &CatalogArgs,
    certs: Option<&CertArgs>,
    config: &Config,
) -> Result<PipelineOptions, CliError> {
    let namespace = namespace
        .map(str::to_string)
        .or_else(|| config.namespace.clone())
        .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());

    let mut options = PipelineOptions::new(namespace.clone());
    if let Some(dir) = catalog.configs_dir.clone().or_else(|| config.configs_dir.clone()) {
        options.configs_dir = dir;
    }
    options.certs = cert_options(namespace, certs, config)?;
    Ok(options)
}

fn cert_options(
    namespace: String,
    certs: Option<&CertArgs>,
    config: &Config,
) -> Result<CertOptions, CliError> {
    let mut options = CertOptions::new(namespace);

    let provider = certs
        .and_then(|c| c.ca_provider.clone())
        .or_else(|| config.ca_provider.clone());
    if let Some(provider) = provider {
        options.provider = provider.parse::<CaProvider>()?;
    }

    let issuer = match certs.and_then(|c| c.issuer_name.clone()) {
        Some(name) => Some((name, certs.and_then(|c| c.issuer_kind.clone()))),
        None => config
            .issuer
            .as_ref()
            .map(|issuer| (issuer.name.clone(), issuer.kind.clone())),
    };
    if let Some((name, kind)) = issuer {
        let kind = match kind {
            Some(kind) => kind.parse::<IssuerKind>()?,
            None => IssuerKind::default(),
        };
        options.issuer = Some(IssuerRef::new(name, kind));
    }

    if let Some(certs) = certs {
        options.conversion_crds = certs.conversion_crds;
        options.mount_serving_cert = !certs.no_mount_certs;
    }
    Ok(options)
}

/// The catalog and query named by `--catalog` and `--package`
pub fn catalog_query(catalog: &CatalogArgs) -> Option<(String, BundleQuery)> {
    let image = catalog.catalog.clone()?;
    let package = catalog.package.clone()?;
    Some((
        image,
        BundleQuery {
            package,
            channel: catalog.channel.clone(),
            version: catalog.version.clone(),
        },
    ))
}

/// Drive `work` to completion unless Ctrl-C arrives or the deadline passes
///
/// Dropping `work` releases any temporary content it holds.
pub async fn cancellable<T, F>(work: F, timeout: Option<u64>) -> Result<T, CliError>
where
    F: Future<Output = Result<T, CliError>>,
{
    let deadline = async {
        match timeout {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        result = work => result,
        _ = tokio::signal::ctrl_c() => {
            debug!("interrupted");
            Err(CliError::cancelled("interrupted"))
        }
        _ = deadline => Err(CliError::cancelled(format!(
            "timed out after {}s",
            timeout.unwrap_or_default()
        ))),
    }
}
