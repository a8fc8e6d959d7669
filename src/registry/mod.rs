//! `EndpointRegistry`: the immutable catalog of endpoint definitions for
//! one [`crate::reload::ReloadGeneration`].
//!
//! Construction walks a tree of YAML files under `endpoints_dir`, parsing
//! each as one endpoint definition and indexing it by `(kind, name)`. A
//! duplicate pair, or any file that fails to parse, fails the whole load
//! so the previous generation is retained — never a partially-loaded
//! catalog.

mod param;

pub use param::{ParamConstraints, ParamType, ParameterDef};

use crate::error::{GatewayError, Result};
use crate::model::EndpointKind;
use crate::policy::PolicyRule;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Where an endpoint's body comes from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EndpointSource {
    /// Inline SQL, substituted with named parameters only.
    InlineSql { sql: String },
    /// SQL loaded from a file path relative to the endpoint's own YAML file.
    SqlFile { path: String },
    /// A reference to a function registered into the registry at reload
    /// time via a `NativeEndpoint` implementation.
    Native { function: String },
}

/// One loaded tool, resource, or prompt definition.
///
/// Immutable within a reload generation; constructed fresh from YAML at
/// startup or reload and never mutated in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointDefinition {
    pub kind: EndpointKind,
    /// Name for tools/prompts; URI template for resources.
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub parameters: Vec<ParameterDef>,
    /// JSON Schema describing the return shape, used for output validation
    /// and coercion. Left loose (`serde_json::Value`) since the schema
    /// itself is data, not a Rust type.
    #[serde(default)]
    pub return_schema: Option<serde_json::Value>,
    pub source: EndpointSource,
    #[serde(default)]
    pub required_scopes: Vec<String>,
    #[serde(default)]
    pub policies: Vec<PolicyRule>,
    #[serde(default)]
    pub annotations: HashMap<String, serde_json::Value>,
    /// Per-endpoint SQL timeout override; falls back to
    /// `LimitsConfig::default_sql_timeout_secs` when absent.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl EndpointDefinition {
    /// Parameters marked `sensitive: true`, used by the audit pipeline to
    /// redact input before persistence and by `filter_sensitive_fields`
    /// output policies.
    pub fn sensitive_param_names(&self) -> Vec<String> {
        self.parameters
            .iter()
            .filter(|p| p.sensitive)
            .map(|p| p.name.clone())
            .collect()
    }

    pub fn parameter(&self, name: &str) -> Option<&ParameterDef> {
        self.parameters.iter().find(|p| p.name == name)
    }
}

/// The immutable catalog owned by one reload generation.
#[derive(Debug, Default)]
pub struct EndpointRegistry {
    by_kind_and_name: HashMap<(EndpointKind, String), EndpointDefinition>,
}

impl EndpointRegistry {
    pub fn lookup(&self, kind: EndpointKind, name: &str) -> Option<&EndpointDefinition> {
        self.by_kind_and_name.get(&(kind, name.to_string()))
    }

    pub fn list(&self, kind: EndpointKind) -> Vec<&EndpointDefinition> {
        self.by_kind_and_name
            .iter()
            .filter(|((k, _), _)| *k == kind)
            .map(|(_, v)| v)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.by_kind_and_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_kind_and_name.is_empty()
    }

    /// Walk every `*.yml`/`*.yaml` file under `dir`, parse it as one
    /// [`EndpointDefinition`], and index it. Any parse error or duplicate
    /// `(kind, name)` fails the entire load.
    pub fn load_from_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let mut registry = Self::default();

        if !dir.exists() {
            return Err(GatewayError::config(format!(
                "endpoints directory does not exist: {}",
                dir.display()
            )));
        }

        for path in yaml_files(dir)? {
            registry.load_file(&path)?;
        }

        Ok(registry)
    }

    fn load_file(&mut self, path: &Path) -> Result<()> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| GatewayError::config(format!("reading {}: {e}", path.display())))?;
        let def: EndpointDefinition = serde_yaml::from_str(&raw)
            .map_err(|e| GatewayError::config(format!("parsing {}: {e}", path.display())))?;
        let key = (def.kind, def.name.clone());

        if self.by_kind_and_name.contains_key(&key) {
            return Err(GatewayError::config(format!(
                "duplicate {} definition '{}' in {} (already loaded)",
                def.kind,
                def.name,
                path.display()
            )));
        }

        self.by_kind_and_name.insert(key, def);
        Ok(())
    }
}

fn yaml_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        let entries = std::fs::read_dir(&current)
            .map_err(|e| GatewayError::config(format!("reading {}: {e}", current.display())))?;
        for entry in entries {
            let entry = entry.map_err(|e| GatewayError::config(format!("reading directory entry: {e}")))?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if matches!(path.extension().and_then(|e| e.to_str()), Some("yml") | Some("yaml")) {
                out.push(path);
            }
        }
    }
    out.sort();
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_endpoint(dir: &Path, file_name: &str, contents: &str) {
        let path = dir.join(file_name);
        let mut f = std::fs::File::create(path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
    }

    #[test]
    fn loads_tool_with_parameters() {
        let tmp = tempfile::tempdir().unwrap();
        write_endpoint(
            tmp.path(),
            "list_orders.yaml",
            r#"
kind: tool
name: list_orders
source:
  type: inline_sql
  sql: "select * from orders where customer_id = $customer_id"
parameters:
  - name: customer_id
    type: string
    sensitive: false
required_scopes: ["orders.read"]
"#,
        );

        let registry = EndpointRegistry::load_from_dir(tmp.path()).unwrap();
        let def = registry.lookup(EndpointKind::Tool, "list_orders").unwrap();
        assert_eq!(def.required_scopes, vec!["orders.read".to_string()]);
        assert_eq!(def.parameters.len(), 1);
    }

    #[test]
    fn duplicate_name_fails_the_whole_load() {
        let tmp = tempfile::tempdir().unwrap();
        let body = r#"
kind: tool
name: dup
source:
  type: inline_sql
  sql: "select 1"
"#;
        write_endpoint(tmp.path(), "a.yaml", body);
        write_endpoint(tmp.path(), "b.yaml", body);

        assert!(EndpointRegistry::load_from_dir(tmp.path()).is_err());
    }

    #[test]
    fn same_name_different_kind_is_not_a_duplicate() {
        let tmp = tempfile::tempdir().unwrap();
        write_endpoint(
            tmp.path(),
            "tool.yaml",
            r#"
kind: tool
name: widgets
source:
  type: inline_sql
  sql: "select 1"
"#,
        );
        write_endpoint(
            tmp.path(),
            "resource.yaml",
            r#"
kind: resource
name: widgets
source:
  type: inline_sql
  sql: "select 1"
"#,
        );

        let registry = EndpointRegistry::load_from_dir(tmp.path()).unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn sensitive_params_are_collected() {
        let tmp = tempfile::tempdir().unwrap();
        write_endpoint(
            tmp.path(),
            "e.yaml",
            r#"
kind: tool
name: charge_card
source:
  type: inline_sql
  sql: "select 1"
parameters:
  - name: card_number
    type: string
    sensitive: true
  - name: amount
    type: number
"#,
        );
        let registry = EndpointRegistry::load_from_dir(tmp.path()).unwrap();
        let def = registry.lookup(EndpointKind::Tool, "charge_card").unwrap();
        assert_eq!(def.sensitive_param_names(), vec!["card_number".to_string()]);
    }
}
