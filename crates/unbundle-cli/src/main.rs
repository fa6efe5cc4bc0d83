//! Unbundle CLI - operator bundles to standalone Kubernetes manifests

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod error;
mod exit_codes;
mod output;

use config::Config;
use error::CliError;
use output::OutputFormat;

#[derive(Parser)]
#[command(name = "unbundle")]
#[command(author = "Unbundle Contributors")]
#[command(version)]
#[command(about = "Turn operator bundles into standalone Kubernetes manifests", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug output
    #[arg(long, global = true)]
    debug: bool,

    /// Configuration file (default: <config dir>/unbundle/config.yaml)
    #[arg(long, global = true, env = "UNBUNDLE_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Render the manifests of a bundle
    Render {
        /// Bundle directory or bundle image reference
        #[arg(required_unless_present = "catalog", conflicts_with = "catalog")]
        bundle: Option<String>,

        #[command(flatten)]
        catalog: CatalogArgs,

        /// Target namespace
        #[arg(short, long, env = "UNBUNDLE_NAMESPACE")]
        namespace: Option<String>,

        /// Keep only objects matching this expression (repeatable)
        #[arg(long = "include")]
        includes: Vec<String>,

        /// Drop objects matching this expression (repeatable, wins over --include)
        #[arg(long = "exclude")]
        excludes: Vec<String>,

        #[command(flatten)]
        certs: CertArgs,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Yaml)]
        output: OutputFormat,

        /// Write one file per object into this directory instead of stdout
        #[arg(long)]
        output_dir: Option<PathBuf>,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Print the bundle image a catalog resolves a package to
    Resolve {
        #[command(flatten)]
        catalog: CatalogArgs,

        /// Print the full resolution as JSON
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        run: RunArgs,
    },
}

/// Catalog lookup
#[derive(Args, Debug, Clone)]
pub struct CatalogArgs {
    /// Catalog image reference or directory
    #[arg(long, env = "UNBUNDLE_CATALOG", requires = "package")]
    pub catalog: Option<String>,

    /// Package to look up in the catalog
    #[arg(long, requires = "catalog")]
    pub package: Option<String>,

    /// Channel (default: the package's default channel)
    #[arg(long, requires = "package")]
    pub channel: Option<String>,

    /// Bundle name within the channel (default: the channel head)
    #[arg(long = "version", requires = "package")]
    pub version: Option<String>,

    /// Declarative config directory inside the catalog image
    #[arg(long, env = "UNBUNDLE_CONFIGS_DIR")]
    pub configs_dir: Option<String>,
}

/// Webhook certificate provisioning
#[derive(Args, Debug, Clone)]
pub struct CertArgs {
    /// Certificate authority provider: cert-manager or service-ca
    #[arg(long, env = "UNBUNDLE_CA_PROVIDER")]
    pub ca_provider: Option<String>,

    /// Existing issuer to sign certificates with (default: a generated self-signed Issuer)
    #[arg(long, env = "UNBUNDLE_ISSUER_NAME")]
    pub issuer_name: Option<String>,

    /// Kind of --issuer-name: Issuer or ClusterIssuer
    #[arg(long, env = "UNBUNDLE_ISSUER_KIND", requires = "issuer_name")]
    pub issuer_kind: Option<String>,

    /// Also provision CRD conversion webhooks
    #[arg(long)]
    pub conversion_crds: bool,

    /// Do not mount the serving certificate into webhook deployments
    #[arg(long)]
    pub no_mount_certs: bool,
}

/// Registry access and run limits
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Registry username
    #[arg(long, env = "UNBUNDLE_REGISTRY_USERNAME")]
    pub username: Option<String>,

    /// Registry password
    #[arg(long, env = "UNBUNDLE_REGISTRY_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Use plain HTTP and accept invalid TLS certificates
    #[arg(long, env = "UNBUNDLE_INSECURE")]
    pub insecure: bool,

    /// Docker config file for registry credentials
    #[arg(long, env = "UNBUNDLE_DOCKER_CONFIG")]
    pub docker_config: Option<PathBuf>,

    /// Root directory for temporary image content
    #[arg(long, env = "UNBUNDLE_TEMP_DIR")]
    pub temp_dir: Option<PathBuf>,

    /// Abort after this many seconds
    #[arg(long, env = "UNBUNDLE_TIMEOUT")]
    pub timeout: Option<u64>,
}

fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Render {
            bundle,
            catalog,
            namespace,
            includes,
            excludes,
            certs,
            output,
            output_dir,
            run,
        } => {
            commands::render::run(
                commands::render::RenderArgs {
                    bundle,
                    catalog,
                    namespace,
                    includes,
                    excludes,
                    certs,
                    format: output,
                    output_dir,
                },
                &run,
                &config,
            )
            .await
        }

        Commands::Resolve { catalog, json, run } => {
            commands::resolve::run(&catalog, json, &run, &config).await
        }
    }
}

#[tokio::main]
async fn main() {
    // Setup miette for nice error display
    miette::set_panic_hook();

    let cli = Cli::parse();
    init_tracing(cli.debug);

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}
