//! Policy engine: compiles and evaluates a CEL-subset expression per rule,
//! cached per [`crate::reload::ReloadGeneration`].
//!
//! The evaluator is total: any runtime error in an expression is coerced to
//! `GatewayError::PolicyEvaluation` rather than panicking or propagating a
//! foreign error type — a malformed or hostile expression never crashes the
//! request path.

mod scope_mapper;
pub mod value;

pub use scope_mapper::{ScopeMapper, ScopeRule};

use crate::constants::{CEL_RESERVED_RESPONSE, CEL_RESERVED_USER};
use crate::error::{GatewayError, Result};
use crate::model::{PolicyDecision, UserContext};
use cel_interpreter::{Context as CelContext, Program};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Where a [`PolicyRule`] applies in the request pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppliesTo {
    Input,
    Output,
}

/// The action a matching rule takes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PolicyAction {
    Deny,
    FilterFields { fields: Vec<String> },
    FilterSensitiveFields,
    MaskFields { fields: Vec<String> },
}

/// A `(condition, action, reason)` triple attached to an endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyRule {
    pub applies_to: AppliesTo,
    pub condition: String,
    #[serde(flatten)]
    pub action: PolicyAction,
    pub reason: String,
}

/// Result of running one policy pass (input or output) over a request.
pub struct PolicyOutcome {
    pub decision: PolicyDecision,
    pub reason: Option<String>,
    /// `None` for input passes that didn't deny; `Some` for output passes,
    /// carrying the (possibly transformed) response.
    pub response: Option<serde_json::Value>,
}

/// The CEL-subset operators and functions this policy engine supports.
/// `cel-interpreter` itself supports a larger grammar; this is a textual
/// allowlist checked at compile time so an out-of-subset expression fails
/// the reload rather than silently working (see DESIGN.md's Open Question
/// decision).
const DISALLOWED_SUBSTRINGS: &[&str] = &[
    "matches(", // regex macro: not in the supported repertoire
    "map(",
    "filter(",
    "duration(",
    "timestamp(",
];

fn compile(condition: &str) -> Result<Program> {
    for bad in DISALLOWED_SUBSTRINGS {
        if condition.contains(bad) {
            return Err(GatewayError::PolicyEvaluation(format!(
                "expression uses a construct outside the supported CEL subset: {bad}"
            )));
        }
    }
    Program::compile(condition)
        .map_err(|e| GatewayError::PolicyEvaluation(format!("failed to compile policy: {e}")))
}

/// Compiles and caches CEL-subset expressions for one ReloadGeneration.
///
/// Stateless beyond the compiled-expression cache; rebuilt, never mutated,
/// on reload.
pub struct PolicyEvaluator {
    compiled: HashMap<String, Arc<Program>>,
}

impl PolicyEvaluator {
    /// Compile every rule's condition up front; a reload that introduces an
    /// uncompilable expression fails closed, same as any other reload
    /// error.
    pub fn compile_rules(rules: &[PolicyRule]) -> Result<Self> {
        let mut compiled = HashMap::new();
        for rule in rules {
            if !compiled.contains_key(&rule.condition) {
                compiled.insert(rule.condition.clone(), Arc::new(compile(&rule.condition)?));
            }
        }
        Ok(Self { compiled })
    }

    pub fn empty() -> Self {
        Self {
            compiled: HashMap::new(),
        }
    }

    fn evaluate_condition(&self, condition: &str, ctx: &CelContext) -> Result<bool> {
        let program = self
            .compiled
            .get(condition)
            .ok_or_else(|| GatewayError::PolicyEvaluation(format!("uncompiled rule: {condition}")))?;
        let value = program
            .execute(ctx)
            .map_err(|e| GatewayError::PolicyEvaluation(format!("evaluation failed: {e}")))?;
        match value {
            cel_interpreter::Value::Bool(b) => Ok(b),
            other => Err(GatewayError::PolicyEvaluation(format!(
                "policy condition did not evaluate to bool, got {other:?}"
            ))),
        }
    }

    fn build_context(
        &self,
        user: &UserContext,
        params: &HashMap<String, serde_json::Value>,
        response: Option<&serde_json::Value>,
    ) -> Result<CelContext<'static>> {
        let mut ctx = CelContext::default();
        let user_value = cel_json(&user.to_cel_value())?;
        ctx.add_variable_from_value(CEL_RESERVED_USER, user_value);

        if let Some(response) = response {
            ctx.add_variable_from_value(CEL_RESERVED_RESPONSE, cel_json(response)?);
        }

        for (name, value) in params {
            if name == CEL_RESERVED_USER || name == CEL_RESERVED_RESPONSE {
                warn!(param = %name, "parameter name collides with a reserved CEL binding; reserved binding wins");
                continue;
            }
            ctx.add_variable_from_value(name.as_str(), cel_json(value)?);
        }
        Ok(ctx)
    }

    /// Evaluate input rules in declaration order; the first `deny` wins.
    pub fn evaluate_input(
        &self,
        rules: &[PolicyRule],
        user: &UserContext,
        params: &HashMap<String, serde_json::Value>,
    ) -> PolicyOutcome {
        let ctx = match self.build_context(user, params, None) {
            Ok(ctx) => ctx,
            Err(e) => {
                return PolicyOutcome {
                    decision: PolicyDecision::Error,
                    reason: Some(e.to_string()),
                    response: None,
                };
            }
        };

        for rule in rules.iter().filter(|r| r.applies_to == AppliesTo::Input) {
            match self.evaluate_condition(&rule.condition, &ctx) {
                Ok(true) => {
                    if matches!(rule.action, PolicyAction::Deny) {
                        crate::telemetry::record_policy_decision("input", "deny");
                        return PolicyOutcome {
                            decision: PolicyDecision::Deny,
                            reason: Some(rule.reason.clone()),
                            response: None,
                        };
                    }
                }
                Ok(false) => continue,
                Err(e) => {
                    crate::telemetry::record_policy_decision("input", "error");
                    return PolicyOutcome {
                        decision: PolicyDecision::Error,
                        reason: Some(e.to_string()),
                        response: None,
                    };
                }
            }
        }

        crate::telemetry::record_policy_decision("input", "allow");
        PolicyOutcome {
            decision: PolicyDecision::NotApplicable,
            reason: None,
            response: None,
        }
    }

    /// Apply output rules in declaration order; later rules see the output
    /// of earlier ones. `policy_decision` in the returned outcome is the
    /// first non-trivial decision.
    pub fn evaluate_output(
        &self,
        rules: &[PolicyRule],
        user: &UserContext,
        sensitive_fields: &[String],
        mut response: serde_json::Value,
    ) -> PolicyOutcome {
        let mut first_decision = PolicyDecision::NotApplicable;

        for rule in rules.iter().filter(|r| r.applies_to == AppliesTo::Output) {
            let ctx = match self.build_context(user, &HashMap::new(), Some(&response)) {
                Ok(ctx) => ctx,
                Err(e) => {
                    return PolicyOutcome {
                        decision: PolicyDecision::Error,
                        reason: Some(e.to_string()),
                        response: None,
                    };
                }
            };

            match self.evaluate_condition(&rule.condition, &ctx) {
                Ok(false) => continue,
                Err(e) => {
                    return PolicyOutcome {
                        decision: PolicyDecision::Error,
                        reason: Some(e.to_string()),
                        response: None,
                    };
                }
                Ok(true) => {}
            }

            match &rule.action {
                PolicyAction::Deny => {
                    return PolicyOutcome {
                        decision: PolicyDecision::Deny,
                        reason: Some(rule.reason.clone()),
                        response: None,
                    };
                }
                PolicyAction::FilterFields { fields } => {
                    response = value::filter_fields(&response, fields);
                    if first_decision == PolicyDecision::NotApplicable {
                        first_decision = PolicyDecision::Filter;
                    }
                }
                PolicyAction::FilterSensitiveFields => {
                    response = value::filter_sensitive_fields(&response, sensitive_fields);
                    if first_decision == PolicyDecision::NotApplicable {
                        first_decision = PolicyDecision::Filter;
                    }
                }
                PolicyAction::MaskFields { fields } => {
                    response = value::mask_fields(&response, fields);
                    if first_decision == PolicyDecision::NotApplicable {
                        first_decision = PolicyDecision::Mask;
                    }
                }
            }
        }

        if first_decision == PolicyDecision::NotApplicable {
            first_decision = PolicyDecision::Allow;
        }

        crate::telemetry::record_policy_decision("output", decision_label(first_decision));
        PolicyOutcome {
            decision: first_decision,
            reason: None,
            response: Some(response),
        }
    }
}

fn decision_label(decision: PolicyDecision) -> &'static str {
    match decision {
        PolicyDecision::Allow => "allow",
        PolicyDecision::Deny => "deny",
        PolicyDecision::Filter => "filter",
        PolicyDecision::Mask => "mask",
        PolicyDecision::Error => "error",
        PolicyDecision::NotApplicable => "not_applicable",
    }
}

/// Convert a `serde_json::Value` into a `cel_interpreter::Value`. The crate's
/// `json` feature provides this conversion; kept as a named helper so the
/// rest of the module reads in terms of our own error type.
fn cel_json(value: &serde_json::Value) -> Result<cel_interpreter::Value> {
    cel_interpreter::Value::try_from(value.clone())
        .map_err(|e| GatewayError::PolicyEvaluation(format!("invalid CEL value: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn user_with_role(role: &str) -> UserContext {
        let mut raw = serde_json::Map::new();
        raw.insert("role".to_string(), serde_json::json!(role));
        UserContext {
            user_id: "u1".into(),
            username: None,
            email: None,
            provider: "test".into(),
            raw_profile: serde_json::Value::Object(raw),
            mxcp_scopes: HashSet::new(),
            provider_scopes_granted: HashSet::new(),
        }
    }

    #[test]
    fn output_filter_by_role() {
        let rules = vec![PolicyRule {
            applies_to: AppliesTo::Output,
            condition: "user.profile.role != 'hr'".to_string(),
            action: PolicyAction::FilterFields {
                fields: vec!["salary".to_string(), "ssn".to_string()],
            },
            reason: "HR only".to_string(),
        }];
        let evaluator = PolicyEvaluator::compile_rules(&rules).unwrap();
        let response = serde_json::json!({"id": "emp1", "name": "Alice", "salary": 95000, "ssn": "123-45-6789"});

        let outcome = evaluator.evaluate_output(&rules, &user_with_role("user"), &[], response.clone());
        assert_eq!(outcome.decision, PolicyDecision::Filter);
        assert_eq!(
            outcome.response.unwrap(),
            serde_json::json!({"id": "emp1", "name": "Alice"})
        );

        let outcome = evaluator.evaluate_output(&rules, &user_with_role("hr"), &[], response);
        assert_eq!(outcome.decision, PolicyDecision::Allow);
    }

    #[test]
    fn input_deny_by_scope() {
        let rules = vec![PolicyRule {
            applies_to: AppliesTo::Input,
            condition: "!('calendar.read' in user.scopes)".to_string(),
            action: PolicyAction::Deny,
            reason: "missing calendar.read".to_string(),
        }];
        let evaluator = PolicyEvaluator::compile_rules(&rules).unwrap();
        let mut user = user_with_role("user");
        user.mxcp_scopes.insert("email.read".to_string());

        let outcome = evaluator.evaluate_input(&rules, &user, &HashMap::new());
        assert_eq!(outcome.decision, PolicyDecision::Deny);
    }
}
