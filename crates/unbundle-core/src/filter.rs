//! Include/exclude filtering of resources
//!
//! Predicates are boolean expressions evaluated against each object's tree.
//! They use minijinja expression syntax with the object's top-level fields
//! bound as variables, and also accept jq-style leading-dot paths:
//!
//! ```text
//! .kind == "Deployment"
//! .metadata.name == "x"
//! kind in ["Service", "ConfigMap"] and metadata.labels["app"] == "web"
//! ```
//!
//! Precedence is fixed:
//! - any matching exclusion removes the object, whatever the inclusions say
//! - with no inclusions, every non-excluded object is kept
//! - with inclusions, an object is kept only if one evaluates to boolean `true`
//!
//! An expression that fails for a given object (missing field, type error)
//! simply does not match it.

use std::sync::LazyLock;

use minijinja::value::ValueKind;
use minijinja::{Environment, Expression, UndefinedBehavior};
use tracing::debug;

use crate::error::{CoreError, Result};
use crate::object::Resource;

static ENVIRONMENT: LazyLock<Environment<'static>> = LazyLock::new(|| {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env
});

/// A predicate parsed once and evaluated against every resource
struct Predicate {
    source: String,
    expression: Expression<'static, 'static>,
}

impl Predicate {
    fn compile(original: String, normalized: String) -> Result<Self> {
        let expression = ENVIRONMENT
            .compile_expression_owned(normalized.clone())
            .map_err(|e| CoreError::InvalidExpression {
                expression: original,
                message: e.to_string(),
            })?;
        Ok(Self {
            source: normalized,
            expression,
        })
    }

    fn matches(&self, resource: &Resource) -> bool {
        match self.expression.eval(resource.fields()) {
            Ok(value) => value.kind() == ValueKind::Bool && value.is_true(),
            Err(e) => {
                debug!(
                    resource = %resource,
                    expression = %self.source,
                    error = %e,
                    "filter expression failed"
                );
                false
            }
        }
    }
}

/// Compiled include/exclude policy
pub struct ResourceFilter {
    includes: Vec<Predicate>,
    excludes: Vec<Predicate>,
}

impl ResourceFilter {
    /// Build a filter, rejecting expressions that do not parse
    pub fn new<I, E>(includes: I, excludes: E) -> Result<Self>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
        E: IntoIterator,
        E::Item: AsRef<str>,
    {
        Ok(Self {
            includes: compile_all(includes)?,
            excludes: compile_all(excludes)?,
        })
    }

    /// A filter that keeps everything
    pub fn allow_all() -> Self {
        Self {
            includes: Vec::new(),
            excludes: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.includes.is_empty() && self.excludes.is_empty()
    }

    /// Decide whether a single resource is kept
    pub fn keep(&self, resource: &Resource) -> bool {
        if self.excludes.iter().any(|p| p.matches(resource)) {
            debug!(resource = %resource, "excluded by filter");
            return false;
        }
        if self.includes.is_empty() {
            return true;
        }
        let kept = self.includes.iter().any(|p| p.matches(resource));
        if !kept {
            debug!(resource = %resource, "not matched by any include filter");
        }
        kept
    }

    /// Keep the matching resources, preserving order
    pub fn apply(&self, resources: Vec<Resource>) -> Vec<Resource> {
        if self.is_empty() {
            return resources;
        }
        resources.into_iter().filter(|r| self.keep(r)).collect()
    }
}

fn compile_all<I>(expressions: I) -> Result<Vec<Predicate>>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    normalize_all(expressions)
        .into_iter()
        .map(|(original, normalized)| Predicate::compile(original, normalized))
        .collect()
}

fn normalize_all<I>(expressions: I) -> Vec<(String, String)>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    expressions
        .into_iter()
        .map(|e| {
            let original = e.as_ref().to_string();
            let normalized = normalize_paths(&original);
            (original, normalized)
        })
        .collect()
}

/// Rewrite jq-style leading-dot paths (`.metadata.name`) to plain variable
/// access (`metadata.name`). Dots inside string literals and attribute access
/// after an identifier, call or subscript are left alone.
fn normalize_paths(expression: &str) -> String {
    let chars: Vec<char> = expression.chars().collect();
    let mut out = String::with_capacity(expression.len());
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut prev: Option<char> = None;

    for (i, &c) in chars.iter().enumerate() {
        if let Some(q) = quote {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
                prev = Some(c);
            }
            continue;
        }

        match c {
            '"' | '\'' => {
                quote = Some(c);
                out.push(c);
            }
            '.' => {
                let starts_ident = chars
                    .get(i + 1)
                    .is_some_and(|n| n.is_alphabetic() || *n == '_');
                let continues_path = prev.is_some_and(|p| {
                    p.is_alphanumeric() || matches!(p, '_' | ')' | ']' | '"' | '\'')
                });
                if !(starts_ident && !continues_path) {
                    out.push(c);
                }
                prev = Some(c);
            }
            _ => {
                out.push(c);
                if !c.is_whitespace() {
                    prev = Some(c);
                }
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(kind: &str, name: &str) -> Resource {
        Resource::from_value(json!({
            "apiVersion": "v1",
            "kind": kind,
            "metadata": {"name": name, "labels": {"app.kubernetes.io/name": "demo"}},
            "spec": {"replicas": 1}
        }))
        .unwrap()
    }

    fn names(resources: &[Resource]) -> Vec<String> {
        resources.iter().map(Resource::key).collect()
    }

    #[test]
    fn test_normalize_paths() {
        assert_eq!(normalize_paths(r#".kind=="Deployment""#), r#"kind=="Deployment""#);
        assert_eq!(
            normalize_paths(r#".metadata.name == "a.b""#),
            r#"metadata.name == "a.b""#
        );
        assert_eq!(
            normalize_paths(r#"(.spec.replicas > 1) and .kind == "x""#),
            r#"(spec.replicas > 1) and kind == "x""#
        );
        assert_eq!(normalize_paths("spec.ratio > 0.5"), "spec.ratio > 0.5");
        assert_eq!(normalize_paths(r#""abc".upper()"#), r#""abc".upper()"#);
    }

    #[test]
    fn test_exclude_takes_priority_over_include() {
        let filter = ResourceFilter::new(
            [r#".kind=="Deployment""#],
            [r#".metadata.name=="x""#],
        )
        .unwrap();

        let kept = filter.apply(vec![
            obj("Deployment", "app"),
            obj("Deployment", "x"),
            obj("Service", "svc"),
        ]);

        assert_eq!(names(&kept), vec!["Deployment/app"]);
    }

    #[test]
    fn test_no_includes_keeps_everything_not_excluded() {
        let filter = ResourceFilter::new(Vec::<String>::new(), [r#".kind == "Service""#]).unwrap();
        let kept = filter.apply(vec![obj("Deployment", "app"), obj("Service", "svc")]);
        assert_eq!(names(&kept), vec!["Deployment/app"]);
    }

    #[test]
    fn test_only_literal_true_includes() {
        // A non-empty string is truthy in jinja but is not the boolean true
        let filter = ResourceFilter::new([".metadata.name", ".spec.replicas"], Vec::<String>::new())
            .unwrap();
        let kept = filter.apply(vec![obj("Deployment", "app")]);
        assert!(kept.is_empty());
    }

    #[test]
    fn test_evaluation_error_is_non_matching() {
        let filter = ResourceFilter::new(
            [r#".spec.template.metadata.name == "x""#, r#".kind == "Service""#],
            [r#".status.phase == "Failed""#],
        )
        .unwrap();
        let kept = filter.apply(vec![obj("Deployment", "app"), obj("Service", "svc")]);
        assert_eq!(names(&kept), vec!["Service/svc"]);
    }

    #[test]
    fn test_subscript_access() {
        let filter = ResourceFilter::new(
            [r#".metadata.labels["app.kubernetes.io/name"] == "demo""#],
            Vec::<String>::new(),
        )
        .unwrap();
        assert!(filter.keep(&obj("ConfigMap", "cm")));
    }

    #[test]
    fn test_invalid_expression_is_configuration_error() {
        let err = ResourceFilter::new(["kind == == 1"], Vec::<String>::new())
            .err()
            .unwrap();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("kind == == 1"));
    }

    #[test]
    fn test_compiled_once_and_reused() {
        let filter = ResourceFilter::new(
            [r#".kind == "Deployment""#],
            [r#".metadata.name == "skip""#],
        )
        .unwrap();
        assert_eq!(filter.includes.len(), 1);
        assert_eq!(filter.includes[0].source, r#"kind == "Deployment""#);

        let resources: Vec<Resource> = (0..50)
            .map(|i| obj("Deployment", if i % 10 == 0 { "skip" } else { "app" }))
            .collect();
        assert_eq!(filter.apply(resources).len(), 45);
    }

    #[test]
    fn test_allow_all() {
        let filter = ResourceFilter::allow_all();
        assert!(filter.is_empty());
        assert_eq!(filter.apply(vec![obj("Service", "svc")]).len(), 1);
    }
}
