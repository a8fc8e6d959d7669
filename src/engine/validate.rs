//! Parameter binding, input validation, and output validation.
//!
//! Binding parses each raw JSON value against its declared [`ParamType`],
//! including ISO-8601 date/date-time/duration parsing; validation then
//! checks the parsed value against its [`ParamConstraints`]. Output
//! validation is a much looser JSON Schema check against the endpoint's
//! `return_schema`, applied per-element when the response is an array.

use crate::error::{GatewayError, Result};
use crate::registry::{ParamType, ParameterDef};
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;

/// Parse + validate every declared parameter against the raw request
/// payload. Missing required parameters, malformed values, and constraint
/// violations all fail as one `GatewayError::Validation`, since the
/// client-facing error is the same structured "validation-error" regardless
/// of which sub-step failed.
pub fn bind_and_validate(
    parameters: &[ParameterDef],
    raw: &serde_json::Map<String, Value>,
) -> Result<HashMap<String, Value>> {
    let mut bound = HashMap::with_capacity(parameters.len());

    for param in parameters {
        let raw_value = raw.get(&param.name).cloned();
        let value = match raw_value {
            Some(v) if !v.is_null() => v,
            _ => match &param.default {
                Some(default) => default.clone(),
                None => {
                    if param.required {
                        return Err(GatewayError::validation(format!("missing required parameter '{}'", param.name)));
                    }
                    continue;
                }
            },
        };

        let parsed = parse_typed(&param.name, param.param_type, &value)?;
        validate_constraints(param, &parsed)?;
        bound.insert(param.name.clone(), parsed);
    }

    Ok(bound)
}

fn parse_typed(name: &str, param_type: ParamType, value: &Value) -> Result<Value> {
    match param_type {
        ParamType::String | ParamType::Email | ParamType::Uri => match value {
            Value::String(_) => Ok(value.clone()),
            _ => Err(GatewayError::validation(format!("parameter '{name}' must be a string"))),
        },
        ParamType::Number => match value {
            Value::Number(_) => Ok(value.clone()),
            Value::String(s) => s
                .parse::<f64>()
                .map(Value::from)
                .map_err(|_| GatewayError::validation(format!("parameter '{name}' must be a number"))),
            _ => Err(GatewayError::validation(format!("parameter '{name}' must be a number"))),
        },
        ParamType::Integer => match value {
            Value::Number(n) if n.is_i64() || n.is_u64() => Ok(value.clone()),
            Value::String(s) => s
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| GatewayError::validation(format!("parameter '{name}' must be an integer"))),
            _ => Err(GatewayError::validation(format!("parameter '{name}' must be an integer"))),
        },
        ParamType::Boolean => match value {
            Value::Bool(_) => Ok(value.clone()),
            Value::String(s) if s == "true" || s == "false" => Ok(Value::Bool(s == "true")),
            _ => Err(GatewayError::validation(format!("parameter '{name}' must be a boolean"))),
        },
        ParamType::Array => match value {
            Value::Array(_) => Ok(value.clone()),
            _ => Err(GatewayError::validation(format!("parameter '{name}' must be an array"))),
        },
        ParamType::Object => match value {
            Value::Object(_) => Ok(value.clone()),
            _ => Err(GatewayError::validation(format!("parameter '{name}' must be an object"))),
        },
        ParamType::Date => {
            let s = value
                .as_str()
                .ok_or_else(|| GatewayError::validation(format!("parameter '{name}' must be an ISO-8601 date string")))?;
            chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .map_err(|_| GatewayError::validation(format!("parameter '{name}' is not a valid ISO-8601 date")))?;
            Ok(value.clone())
        }
        ParamType::DateTime => {
            let s = value.as_str().ok_or_else(|| {
                GatewayError::validation(format!("parameter '{name}' must be an ISO-8601 date-time string"))
            })?;
            chrono::DateTime::parse_from_rfc3339(s)
                .map_err(|_| GatewayError::validation(format!("parameter '{name}' is not a valid ISO-8601 date-time")))?;
            Ok(value.clone())
        }
        ParamType::Duration => {
            let s = value
                .as_str()
                .ok_or_else(|| GatewayError::validation(format!("parameter '{name}' must be an ISO-8601 duration string")))?;
            parse_iso8601_duration(s)
                .ok_or_else(|| GatewayError::validation(format!("parameter '{name}' is not a valid ISO-8601 duration")))?;
            Ok(value.clone())
        }
    }
}

/// A minimal `PnYnMnDTnHnMnS`-shaped parser, enough to validate a duration
/// parameter without pulling in a full calendar-arithmetic duration crate.
fn parse_iso8601_duration(s: &str) -> Option<()> {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"^P(?:\d+Y)?(?:\d+M)?(?:\d+D)?(?:T(?:\d+H)?(?:\d+M)?(?:\d+(?:\.\d+)?S)?)?$").unwrap()
    });
    if s == "P" || s == "PT" || !re.is_match(s) {
        return None;
    }
    Some(())
}

fn validate_constraints(param: &ParameterDef, value: &Value) -> Result<()> {
    let name = &param.name;
    let constraints = &param.constraints;

    if let Some(enum_values) = &constraints.enum_values {
        if !enum_values.contains(value) {
            return Err(GatewayError::validation(format!("parameter '{name}' is not one of the allowed values")));
        }
    }

    if let Some(n) = value.as_f64() {
        if let Some(min) = constraints.minimum {
            if n < min {
                return Err(GatewayError::validation(format!("parameter '{name}' is below minimum {min}")));
            }
        }
        if let Some(max) = constraints.maximum {
            if n > max {
                return Err(GatewayError::validation(format!("parameter '{name}' is above maximum {max}")));
            }
        }
    }

    if let Some(s) = value.as_str() {
        if let Some(min_len) = constraints.min_length {
            if s.chars().count() < min_len {
                return Err(GatewayError::validation(format!("parameter '{name}' is shorter than minLength {min_len}")));
            }
        }
        if let Some(max_len) = constraints.max_length {
            if s.chars().count() > max_len {
                return Err(GatewayError::validation(format!("parameter '{name}' is longer than maxLength {max_len}")));
            }
        }
        if let Some(pattern) = &constraints.pattern {
            let re = Regex::new(pattern)
                .map_err(|e| GatewayError::config(format!("invalid pattern for parameter '{name}': {e}")))?;
            if !re.is_match(s) {
                return Err(GatewayError::validation(format!("parameter '{name}' does not match pattern {pattern}")));
            }
        }
        if param.param_type == ParamType::Email && !s.contains('@') {
            return Err(GatewayError::validation(format!("parameter '{name}' is not a valid email address")));
        }
        if param.param_type == ParamType::Uri && url::Url::parse(s).is_err() {
            return Err(GatewayError::validation(format!("parameter '{name}' is not a valid URI")));
        }
    }

    if let Value::Array(items) = value {
        if let Some(item_def) = &constraints.items {
            for item in items {
                let parsed = parse_typed(name, item_def.param_type, item)?;
                validate_constraints(item_def, &parsed)?;
            }
        }
    }

    Ok(())
}

/// Output validation against `return_schema`. Loose by design: the schema
/// is operator-authored data, not a Rust type, and a schema-less endpoint
/// simply skips validation.
pub fn validate_output(schema: Option<&Value>, response: &Value) -> Result<()> {
    let Some(schema) = schema else {
        return Ok(());
    };
    let validator = jsonschema::validator_for(schema)
        .map_err(|e| GatewayError::config(format!("invalid return_schema: {e}")))?;

    if let Value::Array(items) = response {
        for item in items {
            if let Err(e) = validator.validate(item) {
                return Err(GatewayError::validation(format!("return value failed schema validation: {e}")));
            }
        }
        return Ok(());
    }

    validator
        .validate(response)
        .map_err(|e| GatewayError::validation(format!("return value failed schema validation: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ParamConstraints;

    fn param(name: &str, param_type: ParamType, required: bool) -> ParameterDef {
        ParameterDef {
            name: name.to_string(),
            param_type,
            description: None,
            required,
            default: None,
            constraints: ParamConstraints::default(),
            sensitive: false,
        }
    }

    #[test]
    fn missing_required_parameter_fails() {
        let params = vec![param("price", ParamType::Number, true)];
        let raw = serde_json::Map::new();
        assert!(bind_and_validate(&params, &raw).is_err());
    }

    #[test]
    fn minimum_constraint_rejects_negative_price() {
        let mut price = param("price", ParamType::Number, true);
        price.constraints.minimum = Some(0.0);
        let mut raw = serde_json::Map::new();
        raw.insert("price".to_string(), Value::from(-1));
        assert!(bind_and_validate(&[price], &raw).is_err());
    }

    #[test]
    fn arithmetic_tool_binds_cleanly() {
        let params = vec![param("price", ParamType::Number, true), param("discount_percent", ParamType::Number, true)];
        let mut raw = serde_json::Map::new();
        raw.insert("price".to_string(), Value::from(100));
        raw.insert("discount_percent".to_string(), Value::from(10));
        let bound = bind_and_validate(&params, &raw).unwrap();
        assert_eq!(bound["price"], Value::from(100));
        assert_eq!(bound["discount_percent"], Value::from(10));
    }

    #[test]
    fn duration_parses_iso8601() {
        assert!(parse_iso8601_duration("P1DT2H").is_some());
        assert!(parse_iso8601_duration("not-a-duration").is_none());
    }
}
