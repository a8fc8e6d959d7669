//! `ExecutionEngine`: the per-request orchestrator that composes admission,
//! validation, policy, dispatch, and audit into a fixed step order.
//!
//! Every suspension point in `execute` — `AuthService::verify_token`,
//! `SqlEngine::execute`, `NativeEndpoint::call`, `AuditSink::record` — runs
//! against the single [`crate::reload::ReloadGeneration`] pinned at step 1,
//! so a request never straddles a reload: it sees one consistent set of
//! endpoints, secrets, SQL pool, and policies from start to finish.

pub mod native;
pub mod sql_engine;
mod validate;

use crate::audit::AuditSink;
use crate::auth::service::AuthService;
use crate::constants::REDACTED_PLACEHOLDER;
use crate::error::{GatewayError, Result};
use crate::model::{
    AuditRecord, EndpointKind, NamedParam, PolicyDecision, RequestStatus, Transport, UserContext,
};
use crate::registry::EndpointSource;
use crate::reload::ReloadCoordinator;
use chrono::Utc;
use native::ExecutionContext;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// One inbound MCP request, already stripped of transport framing.
pub struct ExecutionRequest {
    pub transport: Transport,
    pub kind: EndpointKind,
    pub name: String,
    /// For a tool: the call arguments. For a resource: path-template
    /// captures merged with the payload — merging is the transport layer's
    /// job, this field is already flat.
    pub params: serde_json::Map<String, Value>,
    pub bearer: Option<String>,
    pub trace_id: Option<String>,
}

pub struct ExecutionEngine {
    reload: Arc<ReloadCoordinator>,
    auth: Arc<AuthService>,
    audit: Arc<AuditSink>,
    endpoints_dir: PathBuf,
    default_sql_timeout: Duration,
    default_request_timeout: Duration,
}

fn anonymous_user() -> UserContext {
    UserContext {
        user_id: "anonymous".to_string(),
        username: None,
        email: None,
        provider: "none".to_string(),
        raw_profile: Value::Null,
        mxcp_scopes: HashSet::new(),
        provider_scopes_granted: HashSet::new(),
    }
}

/// Everything the pipeline accumulates for exactly one `AuditRecord`: every
/// code path through `execute_inner` finishes by emitting exactly one,
/// success or failure alike.
struct AuditBuilder {
    start: std::time::Instant,
    transport: Transport,
    kind: EndpointKind,
    name: String,
    input_json: Value,
    trace_id: Option<String>,
    session_id: Option<String>,
}

impl AuditBuilder {
    fn finish(self, decision: PolicyDecision, reason: Option<String>, status: RequestStatus, error: Option<String>) -> AuditRecord {
        AuditRecord {
            timestamp: Utc::now(),
            transport: self.transport,
            kind: self.kind,
            name: self.name,
            input_json: self.input_json,
            duration_ms: self.start.elapsed().as_millis() as u64,
            policy_decision: decision,
            reason,
            status,
            error,
            session_id: self.session_id,
            trace_id: self.trace_id,
        }
    }
}

impl ExecutionEngine {
    pub fn new(
        reload: Arc<ReloadCoordinator>,
        auth: Arc<AuthService>,
        audit: Arc<AuditSink>,
        endpoints_dir: impl Into<PathBuf>,
        default_sql_timeout: Duration,
        default_request_timeout: Duration,
    ) -> Self {
        Self {
            reload,
            auth,
            audit,
            endpoints_dir: endpoints_dir.into(),
            default_sql_timeout,
            default_request_timeout,
        }
    }

    /// Runs the full admission → validation → policy → dispatch → audit
    /// pipeline. Always emits exactly one `AuditRecord` for any request that
    /// got far enough to be looked up against an endpoint name, success or
    /// failure alike.
    pub async fn execute(&self, req: ExecutionRequest) -> Result<Value> {
        let transport = req.transport.to_string();
        let kind = req.kind.to_string();
        let start = std::time::Instant::now();
        let overall_timeout = self.default_request_timeout;

        let result = match tokio::time::timeout(overall_timeout, self.execute_inner(req)).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout("request exceeded overall timeout".to_string())),
        };

        crate::telemetry::record_request_duration(&transport, &kind, start.elapsed().as_secs_f64());
        crate::telemetry::record_request(&transport, &kind, if result.is_ok() { "success" } else { "error" });
        result
    }

    async fn execute_inner(&self, req: ExecutionRequest) -> Result<Value> {
        let generation = self.reload.admit().await;

        let mut audit = AuditBuilder {
            start: std::time::Instant::now(),
            transport: req.transport,
            kind: req.kind,
            name: req.name.clone(),
            input_json: Value::Object(req.params.clone()),
            trace_id: req.trace_id.clone(),
            session_id: None,
        };

        // Step 1: admission.
        let user = match &req.bearer {
            Some(bearer) => match self.auth.verify_token(bearer).await {
                Ok(user) => user,
                Err(e) => {
                    let record = audit.finish(PolicyDecision::NotApplicable, None, RequestStatus::Error, Some(e.audit_error_kind().to_string()));
                    self.audit.record(record).await;
                    return Err(e);
                }
            },
            None => anonymous_user(),
        };

        let Some(endpoint) = generation.registry.lookup(req.kind, &req.name) else {
            let err = GatewayError::not_found(req.kind.to_string(), req.name.clone());
            let record = audit.finish(PolicyDecision::NotApplicable, None, RequestStatus::Error, Some(err.audit_error_kind().to_string()));
            self.audit.record(record).await;
            return Err(err);
        };

        audit.input_json = redact_sensitive(&req.params, &endpoint.sensitive_param_names());

        if !user.has_scopes(&endpoint.required_scopes) {
            let err = GatewayError::forbidden(format!("missing required scopes for {} '{}'", req.kind, req.name));
            let record = audit.finish(PolicyDecision::NotApplicable, None, RequestStatus::Error, Some(err.audit_error_kind().to_string()));
            self.audit.record(record).await;
            return Err(err);
        }

        // Step 2-3: parameter binding + input validation.
        let bound = match validate::bind_and_validate(&endpoint.parameters, &req.params) {
            Ok(bound) => bound,
            Err(e) => {
                let record = audit.finish(PolicyDecision::NotApplicable, None, RequestStatus::Error, Some(e.audit_error_kind().to_string()));
                self.audit.record(record).await;
                return Err(e);
            }
        };

        // Step 4: input policy.
        let input_outcome = generation.policies.evaluate_input(&endpoint.policies, &user, &bound);
        match input_outcome.decision {
            PolicyDecision::Deny => {
                let err = GatewayError::policy_denied(input_outcome.reason.clone().unwrap_or_default());
                let record = audit.finish(PolicyDecision::Deny, input_outcome.reason, RequestStatus::Error, Some(err.audit_error_kind().to_string()));
                self.audit.record(record).await;
                return Err(err);
            }
            PolicyDecision::Error => {
                let err = GatewayError::PolicyEvaluation(input_outcome.reason.clone().unwrap_or_default());
                let record = audit.finish(PolicyDecision::Error, input_outcome.reason, RequestStatus::Error, Some(err.audit_error_kind().to_string()));
                self.audit.record(record).await;
                return Err(err);
            }
            _ => {}
        }

        // Step 5: dispatch.
        let timeout = Duration::from_secs(endpoint.timeout_secs.unwrap_or(self.default_sql_timeout.as_secs()));
        let dispatch_result = match &endpoint.source {
            EndpointSource::InlineSql { sql } => self.dispatch_sql(&generation, sql, &bound, timeout).await,
            EndpointSource::SqlFile { path } => {
                let full_path = self.endpoints_dir.join(path);
                match tokio::fs::read_to_string(&full_path).await {
                    Ok(sql) => self.dispatch_sql(&generation, &sql, &bound, timeout).await,
                    Err(e) => Err(GatewayError::execution(format!("reading sql file {}: {e}", full_path.display()))),
                }
            }
            EndpointSource::Native { function } => self.dispatch_native(&generation, function, &bound).await,
        };

        let response = match dispatch_result {
            Ok(value) => value,
            Err(e) => {
                let record = audit.finish(PolicyDecision::NotApplicable, None, RequestStatus::Error, Some(e.audit_error_kind().to_string()));
                self.audit.record(record).await;
                return Err(e);
            }
        };

        // Step 6: output validation.
        if let Err(e) = validate::validate_output(endpoint.return_schema.as_ref(), &response) {
            let record = audit.finish(PolicyDecision::NotApplicable, None, RequestStatus::Error, Some(e.audit_error_kind().to_string()));
            self.audit.record(record).await;
            return Err(e);
        }

        // Step 7: output policy.
        let sensitive_fields = endpoint.sensitive_param_names();
        let output_outcome = generation
            .policies
            .evaluate_output(&endpoint.policies, &user, &sensitive_fields, response);

        if output_outcome.decision == PolicyDecision::Deny {
            let err = GatewayError::policy_denied(output_outcome.reason.clone().unwrap_or_default());
            let record = audit.finish(PolicyDecision::Deny, output_outcome.reason, RequestStatus::Error, Some(err.audit_error_kind().to_string()));
            self.audit.record(record).await;
            return Err(err);
        }

        // Step 8: audit emission (success path).
        let record = audit.finish(output_outcome.decision, output_outcome.reason, RequestStatus::Success, None);
        self.audit.record(record).await;
        Ok(output_outcome.response.unwrap_or(Value::Null))
    }

    async fn dispatch_sql(
        &self,
        generation: &crate::reload::ReloadGeneration,
        sql: &str,
        bound: &HashMap<String, Value>,
        timeout: Duration,
    ) -> Result<Value> {
        let params: Vec<NamedParam> = bound
            .iter()
            .map(|(name, value)| NamedParam {
                name: name.clone(),
                value: value.clone(),
            })
            .collect();
        let rows = generation.sql.execute(sql, &params, timeout).await?;
        Ok(collapse_rows(rows))
    }

    async fn dispatch_native(
        &self,
        generation: &crate::reload::ReloadGeneration,
        function: &str,
        bound: &HashMap<String, Value>,
    ) -> Result<Value> {
        let native = self
            .reload
            .natives
            .lookup(function)
            .ok_or_else(|| GatewayError::config(format!("no native endpoint registered for '{function}'")))?;
        let ctx = ExecutionContext {
            sql: generation.sql.clone(),
            secrets: (*generation.secrets).clone(),
        };
        native.call(bound, &ctx).await
    }
}

/// Collapse SQL rows into the shape callers expect: a single-row,
/// single-column result unwraps to its bare scalar value; a single-row,
/// multi-column result is one object; anything else is an array of row
/// objects (zero rows → empty array).
fn collapse_rows(rows: Vec<Value>) -> Value {
    if rows.len() == 1 {
        if let Value::Object(map) = &rows[0] {
            if map.len() == 1 {
                return map.values().next().cloned().unwrap_or(Value::Null);
            }
        }
        return rows.into_iter().next().unwrap_or(Value::Null);
    }
    Value::Array(rows)
}

/// Replace `sensitive: true` parameter values with the redaction
/// placeholder before persisting to the audit log.
fn redact_sensitive(params: &serde_json::Map<String, Value>, sensitive: &[String]) -> Value {
    let mut redacted = params.clone();
    for name in sensitive {
        if redacted.contains_key(name) {
            redacted.insert(name.clone(), Value::String(REDACTED_PLACEHOLDER.to_string()));
        }
    }
    Value::Object(redacted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapse_single_row_single_column_to_scalar() {
        let rows = vec![serde_json::json!({"result": 90.0})];
        assert_eq!(collapse_rows(rows), serde_json::json!(90.0));
    }

    #[test]
    fn collapse_multi_row_to_array() {
        let rows = vec![serde_json::json!({"id": 1}), serde_json::json!({"id": 2})];
        assert_eq!(collapse_rows(rows), serde_json::json!([{"id": 1}, {"id": 2}]));
    }

    #[test]
    fn collapse_empty_to_empty_array() {
        assert_eq!(collapse_rows(vec![]), serde_json::json!([]));
    }

    #[test]
    fn redact_replaces_only_sensitive_fields() {
        let mut params = serde_json::Map::new();
        params.insert("card_number".to_string(), serde_json::json!("4111111111111111"));
        params.insert("amount".to_string(), serde_json::json!(10));
        let redacted = redact_sensitive(&params, &["card_number".to_string()]);
        assert_eq!(redacted["card_number"], serde_json::json!(REDACTED_PLACEHOLDER));
        assert_eq!(redacted["amount"], serde_json::json!(10));
    }
}
