//! Bundle directory loading
//!
//! A bundle image extracts to:
//!
//! ```text
//! manifests/   ClusterServiceVersion, CRDs and other objects
//! metadata/    annotations.yaml (package name, channels)
//! ```
//!
//! When `manifests/` is missing the whole directory is scanned.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};
use unbundle_core::{Resource, kinds};
use walkdir::WalkDir;

use crate::csv::ClusterServiceVersion;
use crate::error::{ManifestError, Result};

const MANIFESTS_DIR: &str = "manifests";
const ANNOTATIONS_FILE: &str = "metadata/annotations.yaml";

const ANNOTATION_PACKAGE: &str = "operators.operatorframework.io.bundle.package.v1";
const ANNOTATION_CHANNELS: &str = "operators.operatorframework.io.bundle.channels.v1";
const ANNOTATION_DEFAULT_CHANNEL: &str = "operators.operatorframework.io.bundle.channel.default.v1";

/// Package metadata from `metadata/annotations.yaml`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BundleAnnotations {
    pub package: Option<String>,
    pub channels: Vec<String>,
    pub default_channel: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnnotationsFile {
    #[serde(default)]
    annotations: BTreeMap<String, String>,
}

/// A parsed bundle
#[derive(Debug, Clone)]
pub struct Bundle {
    pub root: PathBuf,
    /// The raw descriptor object
    pub csv_resource: Resource,
    pub csv: ClusterServiceVersion,
    /// Every other object, in file name then document order
    pub objects: Vec<Resource>,
    pub annotations: BundleAnnotations,
}

impl Bundle {
    /// Load a bundle directory; exactly one ClusterServiceVersion is required
    pub fn load(root: &Path) -> Result<Self> {
        let manifests = root.join(MANIFESTS_DIR);
        let scan_root = if manifests.is_dir() {
            manifests
        } else {
            debug!(path = %root.display(), "no manifests directory, scanning bundle root");
            root.to_path_buf()
        };

        let mut csvs = Vec::new();
        let mut objects = Vec::new();
        for resource in load_objects(&scan_root)? {
            if resource.is_kind(kinds::CSV) {
                csvs.push(resource);
            } else {
                objects.push(resource);
            }
        }

        let csv_resource = match csvs.len() {
            0 => {
                return Err(ManifestError::MissingCsv {
                    path: root.display().to_string(),
                });
            }
            1 => csvs.remove(0),
            _ => {
                return Err(ManifestError::MultipleCsv {
                    path: root.display().to_string(),
                    names: csvs
                        .iter()
                        .map(Resource::name)
                        .collect::<Vec<_>>()
                        .join(", "),
                });
            }
        };
        let csv = ClusterServiceVersion::from_resource(&csv_resource)?;
        let annotations = load_annotations(&root.join(ANNOTATIONS_FILE))?;

        debug!(csv = csv.name(), objects = objects.len(), "loaded bundle");
        Ok(Self {
            root: root.to_path_buf(),
            csv_resource,
            csv,
            objects,
            annotations,
        })
    }
}

/// Read every YAML and JSON object below `dir`
fn load_objects(dir: &Path) -> Result<Vec<Resource>> {
    let mut objects = Vec::new();
    let walker = WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            e.depth() == 0 || !e.file_name().to_str().is_some_and(|n| n.starts_with('.'))
        });

    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let is_json = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => false,
            Some("json") => true,
            _ => continue,
        };

        let content = std::fs::read_to_string(path)?;
        let parse_error = |message: String| ManifestError::BundleParse {
            path: path.display().to_string(),
            message,
        };
        let values = if is_json {
            parse_json(&content).map_err(parse_error)?
        } else {
            parse_yaml(&content).map_err(parse_error)?
        };

        for value in values {
            if value.get("kind").and_then(Value::as_str).is_none() {
                warn!(path = %path.display(), "skipping document without a kind");
                continue;
            }
            objects.push(Resource::from_value(value)?);
        }
    }
    Ok(objects)
}

fn parse_yaml(content: &str) -> std::result::Result<Vec<Value>, String> {
    let mut values = Vec::new();
    for document in serde_yaml::Deserializer::from_str(content) {
        let value = Value::deserialize(document).map_err(|e| e.to_string())?;
        if !value.is_null() {
            values.push(value);
        }
    }
    Ok(values)
}

fn parse_json(content: &str) -> std::result::Result<Vec<Value>, String> {
    serde_json::Deserializer::from_str(content)
        .into_iter::<Value>()
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| e.to_string())
}

fn load_annotations(path: &Path) -> Result<BundleAnnotations> {
    if !path.exists() {
        return Ok(BundleAnnotations::default());
    }
    let content = std::fs::read_to_string(path)?;
    let file: AnnotationsFile =
        serde_yaml::from_str(&content).map_err(|e| ManifestError::BundleParse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

    let annotations = file.annotations;
    Ok(BundleAnnotations {
        package: annotations.get(ANNOTATION_PACKAGE).cloned(),
        channels: annotations
            .get(ANNOTATION_CHANNELS)
            .map(|c| {
                c.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default(),
        default_channel: annotations.get(ANNOTATION_DEFAULT_CHANNEL).cloned(),
    })
}
