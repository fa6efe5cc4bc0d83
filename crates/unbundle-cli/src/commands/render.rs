//! Render command - bundle to manifests

use std::io::Write;
use std::path::PathBuf;

use console::style;
use tracing::info;
use unbundle_manifest::{BundleSource, Pipeline};

use super::{cancellable, catalog_query, pipeline_options, registry_options, temp_root};
use crate::config::Config;
use crate::error::CliError;
use crate::output::{self, OutputFormat};
use crate::{CatalogArgs, CertArgs, RunArgs};

pub struct RenderArgs {
    pub bundle: Option<String>,
    pub catalog: CatalogArgs,
    pub namespace: Option<String>,
    pub includes: Vec<String>,
    pub excludes: Vec<String>,
    pub certs: CertArgs,
    pub format: OutputFormat,
    pub output_dir: Option<PathBuf>,
}

pub async fn run(args: RenderArgs, run: &RunArgs, config: &Config) -> Result<(), CliError> {
    let source = match (&args.bundle, catalog_query(&args.catalog)) {
        (Some(bundle), _) => BundleSource::Bundle(bundle.clone()),
        (None, Some((catalog, query))) => BundleSource::Catalog { catalog, query },
        (None, None) => {
            return Err(CliError::config_with_help(
                "no bundle given",
                "Pass a bundle directory or image, or --catalog with --package",
            ));
        }
    };

    let mut options =
        pipeline_options(args.namespace.as_deref(), &args.catalog, Some(&args.certs), config)?;
    options.includes = args.includes;
    options.excludes = args.excludes;

    let pipeline = Pipeline::new(options, registry_options(run, config), temp_root(run, config))?;
    let output = cancellable(
        async { pipeline.run(&source).await.map_err(CliError::from) },
        run.timeout,
    )
    .await?;

    if let Some(resolved) = &output.resolved {
        info!(package = %resolved.package, channel = %resolved.channel, bundle = %resolved.bundle, "resolved bundle");
    }
    info!(csv = %output.csv, objects = output.resources.len(), "rendered bundle");

    match &args.output_dir {
        Some(dir) => {
            let written = output::write_dir(&output.resources, dir, args.format)?;
            println!(
                "{} Wrote {} manifests for {} to {}",
                style("✓").green().bold(),
                written.len(),
                style(&output.csv).cyan(),
                dir.display()
            );
        }
        None => {
            let rendered = output::render(&output.resources, args.format)?;
            let mut stdout = std::io::stdout().lock();
            stdout
                .write_all(rendered.as_bytes())
                .and_then(|_| stdout.flush())
                .map_err(|e| CliError::io("stdout", e))?;
        }
    }

    Ok(())
}
