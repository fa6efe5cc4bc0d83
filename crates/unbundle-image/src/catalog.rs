//! File-based declarative catalog
//!
//! A catalog is a directory tree of JSON or YAML files, each holding a
//! stream of schema-tagged blobs:
//!
//! ```yaml
//! schema: olm.package
//! name: demo-operator
//! defaultChannel: stable
//! ---
//! schema: olm.channel
//! package: demo-operator
//! name: stable
//! entries:
//!   - name: demo-operator.v1.1.0
//!     replaces: demo-operator.v1.0.0
//! ---
//! schema: olm.bundle
//! name: demo-operator.v1.1.0
//! package: demo-operator
//! image: quay.io/demo/demo-operator-bundle:v1.1.0
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{ImageError, Result};

pub const SCHEMA_PACKAGE: &str = "olm.package";
pub const SCHEMA_CHANNEL: &str = "olm.channel";
pub const SCHEMA_BUNDLE: &str = "olm.bundle";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Package {
    pub name: String,
    #[serde(default)]
    pub default_channel: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub package: String,
    pub name: String,
    #[serde(default)]
    pub entries: Vec<ChannelEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelEntry {
    pub name: String,
    #[serde(default)]
    pub replaces: Option<String>,
    #[serde(default)]
    pub skips: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleRecord {
    pub name: String,
    pub package: String,
    #[serde(default)]
    pub image: Option<String>,
}

/// What to look up in a catalog
#[derive(Debug, Clone, Default)]
pub struct BundleQuery {
    pub package: String,
    /// Falls back to the package's default channel
    pub channel: Option<String>,
    /// Exact channel entry name; the channel head when unset
    pub version: Option<String>,
}

/// Outcome of a catalog lookup
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedBundle {
    pub package: String,
    pub channel: String,
    pub bundle: String,
    pub image: String,
}

/// Packages, channels and bundles of one catalog, in source order
#[derive(Debug, Clone, Default)]
pub struct CatalogIndex {
    pub packages: Vec<Package>,
    pub channels: Vec<Channel>,
    pub bundles: Vec<BundleRecord>,
}

impl CatalogIndex {
    /// Load every `*.json`, `*.yaml` and `*.yml` file below `dir`
    ///
    /// Files are visited in name order; hidden directories are skipped.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let mut index = Self::default();
        let walker = WalkDir::new(dir)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e.file_name()));

        for entry in walker {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let format = match path.extension().and_then(|e| e.to_str()) {
                Some("json") => Format::Json,
                Some("yaml") | Some("yml") => Format::Yaml,
                _ => continue,
            };
            let content = std::fs::read_to_string(path)?;
            index
                .add_document(&content, format)
                .map_err(|message| ImageError::CatalogParse {
                    path: path.display().to_string(),
                    message,
                })?;
        }

        debug!(
            packages = index.packages.len(),
            channels = index.channels.len(),
            bundles = index.bundles.len(),
            "loaded catalog"
        );
        Ok(index)
    }

    /// Parse a single JSON stream
    pub fn from_json(content: &str) -> Result<Self> {
        let mut index = Self::default();
        index
            .add_document(content, Format::Json)
            .map_err(|message| ImageError::CatalogParse {
                path: "<inline>".to_string(),
                message,
            })?;
        Ok(index)
    }

    /// Parse a single YAML multi-document stream
    pub fn from_yaml(content: &str) -> Result<Self> {
        let mut index = Self::default();
        index
            .add_document(content, Format::Yaml)
            .map_err(|message| ImageError::CatalogParse {
                path: "<inline>".to_string(),
                message,
            })?;
        Ok(index)
    }

    fn add_document(&mut self, content: &str, format: Format) -> std::result::Result<(), String> {
        match format {
            Format::Json => {
                for blob in serde_json::Deserializer::from_str(content).into_iter::<Value>() {
                    self.add_blob(blob.map_err(|e| e.to_string())?)?;
                }
            }
            Format::Yaml => {
                for document in serde_yaml::Deserializer::from_str(content) {
                    let blob = Value::deserialize(document).map_err(|e| e.to_string())?;
                    if !blob.is_null() {
                        self.add_blob(blob)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn add_blob(&mut self, blob: Value) -> std::result::Result<(), String> {
        let schema = blob.get("schema").and_then(Value::as_str).unwrap_or_default();
        match schema {
            SCHEMA_PACKAGE => self.packages.push(decode(blob)?),
            SCHEMA_CHANNEL => self.channels.push(decode(blob)?),
            SCHEMA_BUNDLE => self.bundles.push(decode(blob)?),
            other => debug!(schema = other, "ignoring catalog blob"),
        }
        Ok(())
    }

    pub fn package(&self, name: &str) -> Option<&Package> {
        self.packages.iter().find(|p| p.name == name)
    }

    pub fn channels_of<'a>(&'a self, package: &'a str) -> impl Iterator<Item = &'a Channel> + 'a {
        self.channels.iter().filter(move |c| c.package == package)
    }

    pub fn bundle(&self, package: &str, name: &str) -> Option<&BundleRecord> {
        self.bundles
            .iter()
            .find(|b| b.package == package && b.name == name)
    }

    /// Resolve a package, channel and version to a bundle image
    ///
    /// Without a version the first entry of the channel is taken as its head.
    /// Replacement edges are not walked.
    pub fn resolve(&self, query: &BundleQuery) -> Result<ResolvedBundle> {
        let package = self
            .package(&query.package)
            .ok_or_else(|| ImageError::PackageNotFound {
                package: query.package.clone(),
            })?;

        let channel_name = match (&query.channel, &package.default_channel) {
            (Some(channel), _) => channel.clone(),
            (None, Some(default)) if !default.is_empty() => default.clone(),
            _ => {
                return Err(ImageError::NoDefaultChannel {
                    package: package.name.clone(),
                });
            }
        };

        let channel = self
            .channels_of(&package.name)
            .find(|c| c.name == channel_name)
            .ok_or_else(|| ImageError::ChannelNotFound {
                package: package.name.clone(),
                channel: channel_name.clone(),
                available: self
                    .channels_of(&package.name)
                    .map(|c| c.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
            })?;

        let entry = match &query.version {
            Some(version) => channel
                .entries
                .iter()
                .find(|e| &e.name == version)
                .ok_or_else(|| ImageError::VersionNotFound {
                    package: package.name.clone(),
                    channel: channel.name.clone(),
                    version: version.clone(),
                    available: channel
                        .entries
                        .iter()
                        .map(|e| e.name.as_str())
                        .collect::<Vec<_>>()
                        .join(", "),
                })?,
            None => {
                if channel.entries.len() > 1 {
                    debug!(
                        channel = %channel.name,
                        entries = channel.entries.len(),
                        "taking first channel entry as head"
                    );
                }
                channel
                    .entries
                    .first()
                    .ok_or_else(|| ImageError::EmptyChannel {
                        package: package.name.clone(),
                        channel: channel.name.clone(),
                    })?
            }
        };

        let record = self
            .bundle(&package.name, &entry.name)
            .ok_or_else(|| ImageError::BundleNotFound {
                package: package.name.clone(),
                bundle: entry.name.clone(),
            })?;

        let image = record
            .image
            .as_deref()
            .filter(|i| !i.is_empty())
            .ok_or_else(|| ImageError::BundleWithoutImage {
                bundle: record.name.clone(),
            })?;

        Ok(ResolvedBundle {
            package: package.name.clone(),
            channel: channel.name.clone(),
            bundle: record.name.clone(),
            image: image.to_string(),
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum Format {
    Json,
    Yaml,
}

fn decode<T: serde::de::DeserializeOwned>(blob: Value) -> std::result::Result<T, String> {
    let name = blob
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or("<unnamed>")
        .to_string();
    serde_json::from_value(blob).map_err(|e| {
        warn!(blob = %name, error = %e, "invalid catalog blob");
        format!("blob '{}': {}", name, e)
    })
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_str().is_some_and(|n| n.starts_with('.'))
}
