//! Resolve command - catalog package to bundle image

use unbundle_manifest::Pipeline;

use super::{cancellable, catalog_query, pipeline_options, registry_options, temp_root};
use crate::config::Config;
use crate::error::CliError;
use crate::{CatalogArgs, RunArgs};

pub async fn run(
    catalog: &CatalogArgs,
    json: bool,
    run: &RunArgs,
    config: &Config,
) -> Result<(), CliError> {
    let Some((image, query)) = catalog_query(catalog) else {
        return Err(CliError::config_with_help(
            "no catalog given",
            "Pass --catalog <image or directory> and --package <name>",
        ));
    };

    let options = pipeline_options(None, catalog, None, config)?;
    let pipeline = Pipeline::new(options, registry_options(run, config), temp_root(run, config))?;
    let resolved = cancellable(
        async { pipeline.resolve(&image, &query).await.map_err(CliError::from) },
        run.timeout,
    )
    .await?;

    if json {
        let out = serde_json::to_string_pretty(&resolved)
            .map_err(|e| CliError::other(format!("failed to render JSON: {}", e)))?;
        println!("{}", out);
    } else {
        println!("{}", resolved.image);
    }
    Ok(())
}
