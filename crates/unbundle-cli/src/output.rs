//! Rendering of the final object list

use std::path::{Path, PathBuf};

use clap::ValueEnum;
use serde_json::{Value, json};
use unbundle_core::Resource;

use crate::error::CliError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// `---` separated YAML stream
    #[default]
    Yaml,
    /// A single `v1/List` JSON document
    Json,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Yaml => "yaml",
            OutputFormat::Json => "json",
        }
    }
}

/// Render every object into one document stream
pub fn render(resources: &[Resource], format: OutputFormat) -> Result<String, CliError> {
    match format {
        OutputFormat::Yaml => render_yaml(resources),
        OutputFormat::Json => render_json(resources),
    }
}

fn render_yaml(resources: &[Resource]) -> Result<String, CliError> {
    let mut out = String::new();
    for resource in resources {
        out.push_str("---\n");
        out.push_str(&to_yaml(resource)?);
    }
    Ok(out)
}

fn render_json(resources: &[Resource]) -> Result<String, CliError> {
    let list = json!({
        "apiVersion": "v1",
        "kind": "List",
        "items": resources.iter().map(Resource::to_value).collect::<Vec<Value>>(),
    });
    let mut out = serde_json::to_string_pretty(&list)
        .map_err(|e| CliError::other(format!("failed to render JSON: {}", e)))?;
    out.push('\n');
    Ok(out)
}

fn to_yaml(resource: &Resource) -> Result<String, CliError> {
    resource
        .to_yaml()
        .map_err(|e| CliError::other(format!("failed to render {}: {}", resource, e)))
}

/// File name for the object at `index` in apply order: `NN-kind-name.ext`
pub fn file_name(index: usize, resource: &Resource, format: OutputFormat) -> String {
    let name: String = resource
        .name()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
        .collect();
    format!(
        "{:02}-{}-{}.{}",
        index,
        resource.kind().to_lowercase(),
        name,
        format.extension()
    )
}

/// Write one file per object into `dir`, numbered in apply order
pub fn write_dir(
    resources: &[Resource],
    dir: &Path,
    format: OutputFormat,
) -> Result<Vec<PathBuf>, CliError> {
    std::fs::create_dir_all(dir).map_err(|e| CliError::io(dir.display(), e))?;

    let mut written = Vec::with_capacity(resources.len());
    for (index, resource) in resources.iter().enumerate() {
        let content = match format {
            OutputFormat::Yaml => to_yaml(resource)?,
            OutputFormat::Json => {
                let mut content = serde_json::to_string_pretty(&resource.to_value())
                    .map_err(|e| CliError::other(format!("failed to render {}: {}", resource, e)))?;
                content.push('\n');
                content
            }
        };
        let path = dir.join(file_name(index, resource, format));
        std::fs::write(&path, content).map_err(|e| CliError::io(path.display(), e))?;
        written.push(path);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resources() -> Vec<Resource> {
        vec![
            Resource::from_yaml("apiVersion: v1\nkind: Namespace\nmetadata:\n  name: demo\n")
                .unwrap(),
            Resource::from_yaml(
                "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: demo-config\n  namespace: demo\ndata:\n  mode: strict\n",
            )
            .unwrap(),
        ]
    }

    #[test]
    fn test_yaml_stream() {
        let out = render(&resources(), OutputFormat::Yaml).unwrap();
        insta::assert_snapshot!(out, @r"
        ---
        apiVersion: v1
        kind: Namespace
        metadata:
          name: demo
        ---
        apiVersion: v1
        kind: ConfigMap
        metadata:
          name: demo-config
          namespace: demo
        data:
          mode: strict
        ");
    }

    #[test]
    fn test_json_list() {
        let out = render(&resources(), OutputFormat::Json).unwrap();
        let list: Value = serde_json::from_str(&out).unwrap();

        assert_eq!(list["kind"], "List");
        assert_eq!(list["items"].as_array().unwrap().len(), 2);
        assert_eq!(list["items"][1]["data"]["mode"], "strict");
    }

    #[test]
    fn test_empty_yaml_stream() {
        assert_eq!(render(&[], OutputFormat::Yaml).unwrap(), "");
    }

    #[test]
    fn test_file_names() {
        let resources = resources();
        assert_eq!(file_name(0, &resources[0], OutputFormat::Yaml), "00-namespace-demo.yaml");
        assert_eq!(
            file_name(11, &resources[1], OutputFormat::Json),
            "11-configmap-demo-config.json"
        );

        let odd = Resource::from_yaml(
            "apiVersion: rbac.authorization.k8s.io/v1\nkind: ClusterRole\nmetadata:\n  name: system:demo\n",
        )
        .unwrap();
        assert_eq!(file_name(3, &odd, OutputFormat::Yaml), "03-clusterrole-system_demo.yaml");
    }

    #[test]
    fn test_write_dir() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("manifests");

        let written = write_dir(&resources(), &out, OutputFormat::Yaml).unwrap();

        assert_eq!(written.len(), 2);
        let content = std::fs::read_to_string(out.join("01-configmap-demo-config.yaml")).unwrap();
        assert!(content.starts_with("apiVersion: v1\nkind: ConfigMap"));
    }
}
