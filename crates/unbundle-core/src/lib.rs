//! Unbundle Core - shared resource model for the bundle extraction pipeline
//!
//! This crate provides the types and pure policies every later stage works with:
//! - `Resource`: a generic Kubernetes object tree (apiVersion/kind/metadata/...)
//! - `KindScope`: which kinds are namespaced and which are cluster-scoped
//! - `cleanup`: removal of empty and null fields before rendering
//! - `order`: the deterministic apply order over kinds
//! - `filter`: include/exclude predicate policy

pub mod cleanup;
pub mod error;
pub mod filter;
pub mod object;
pub mod order;
pub mod scope;

pub use cleanup::{clean_resource, clean_value};
pub use error::{CoreError, Result};
pub use filter::ResourceFilter;
pub use object::{Resource, kinds, validate_namespace};
pub use order::{ApplyPriority, sort_for_apply};
pub use scope::KindScope;
