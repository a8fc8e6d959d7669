//! Parameter schema normalization.
//!
//! Each endpoint parameter declares a semantic type plus a constraint set;
//! both are interpreted by the execution engine at parameter-binding and
//! input-validation time, not here — this module only owns the shape, not
//! the checking logic.

use serde::{Deserialize, Serialize};

/// The semantic type repertoire endpoint parameters may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ParamType {
    String,
    Number,
    Integer,
    Boolean,
    #[serde(rename = "array")]
    Array,
    #[serde(rename = "object")]
    Object,
    Date,
    #[serde(rename = "date-time")]
    DateTime,
    Duration,
    Email,
    Uri,
}

/// Constraints a parameter's declared type may further narrow: enum,
/// minimum/maximum, pattern, format, minLength/maxLength, items.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParamConstraints {
    #[serde(default, rename = "enum", skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    /// The element schema for `ParamType::Array` ("array-of-T" in the
    /// glossary); recursive since an array item may itself be an object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<ParameterDef>>,
    /// Nested property schemas for `ParamType::Object`
    /// ("object-with-properties" in the glossary).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Vec<ParameterDef>>,
}

/// One named, typed parameter in an endpoint's ordered parameter schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterDef {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParamType,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<serde_json::Value>,
    #[serde(flatten)]
    pub constraints: ParamConstraints,
    /// Redacted from audit input and droppable by `filter_sensitive_fields`
    /// output policies.
    #[serde(default)]
    pub sensitive: bool,
}
