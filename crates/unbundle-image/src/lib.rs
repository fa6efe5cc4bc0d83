//! Unbundle Image - content retrieval for the bundle extraction pipeline
//!
//! This crate turns a string the user typed into files on disk:
//!
//! - **Local directories** are used in place
//! - **Container images** are pulled from an OCI registry and their layers
//!   extracted into a private temporary directory
//! - **Catalog images** are pulled (only their declarative config subtree)
//!   and queried to find the bundle image for a package, channel and version
//!
//! ## Security Notes
//!
//! - Every archive entry goes through one path-safe routine: absolute paths
//!   and entries escaping the target directory are rejected
//! - Layer blobs are verified against their manifest digest
//! - Explicit credentials always win over the Docker credential chain

pub mod catalog;
pub mod content;
pub mod credentials;
pub mod error;
pub mod extract;
pub mod registry;
pub mod resolver;
pub mod retriever;

// Re-exports for convenience
pub use catalog::{BundleQuery, BundleRecord, CatalogIndex, Channel, ChannelEntry, Package, ResolvedBundle};
pub use content::BundleContent;
pub use credentials::{DockerConfig, RegistryOptions, resolve_auth};
pub use error::{ImageError, Result};
pub use extract::{ExtractMode, extract_layer, matching_prefixes, safe_destination};
pub use registry::{OciRegistry, RegistryClient, parse_reference};
pub use resolver::{CatalogResolver, DEFAULT_CONFIGS_DIR};
pub use retriever::ImageRetriever;
