//! Unbundle Manifest - from operator bundle to standalone manifests
//!
//! This crate provides:
//! - Bundle loading (ClusterServiceVersion, CRDs, other objects)
//! - Manifest synthesis from the install strategy and webhook definitions
//! - Webhook certificate provisioning through a CA provider
//! - The end-to-end [`Pipeline`]
//!
//! ## Example
//!
//! ```rust,no_run
//! use unbundle_image::RegistryOptions;
//! use unbundle_manifest::{BundleSource, Pipeline, PipelineOptions};
//!
//! # async fn example() -> unbundle_manifest::Result<()> {
//! let pipeline = Pipeline::new(PipelineOptions::new("demo"), RegistryOptions::default(), None)?;
//! let output = pipeline
//!     .run(&BundleSource::Bundle("quay.io/demo/demo-operator-bundle:v1.0.0".into()))
//!     .await?;
//! for resource in &output.resources {
//!     println!("{}", resource);
//! }
//! # Ok(())
//! # }
//! ```

pub mod bundle;
pub mod certs;
pub mod csv;
pub mod error;
pub mod pipeline;
pub mod synth;

pub use bundle::{Bundle, BundleAnnotations};
pub use certs::{CaProvider, CertOptions, IssuerKind, IssuerRef, WebhookInfo, provision};
pub use csv::{ClusterServiceVersion, WebhookDefinition, WebhookType};
pub use error::{ManifestError, Result};
pub use pipeline::{BundleSource, Pipeline, PipelineOptions, PipelineOutput};
pub use synth::synthesize;
