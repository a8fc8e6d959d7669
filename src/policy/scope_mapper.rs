//! Maps provider-granted OAuth scopes, groups, and roles to gateway scopes.
//!
//! Scope mapping happens once, at session creation, and the result is frozen
//! into [`crate::model::UserContext::mxcp_scopes`] — it is never recomputed
//! per request.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// One rule entry. `Scopes` matches against `provider_scopes_granted`
/// directly; `Groups`/`Roles` match against a list of strings read out of
/// `raw_profile` at `source_path`. A rule with no matching entry grants
/// nothing — there is no pass-through of unmapped scopes, groups, or
/// roles.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScopeRule {
    Scopes {
        provider_scope: String,
        mxcp_scopes: Vec<String>,
    },
    Groups {
        source_path: String,
        group: String,
        mxcp_scopes: Vec<String>,
    },
    Roles {
        source_path: String,
        role: String,
        mxcp_scopes: Vec<String>,
    },
}

/// Read a dot-separated path (e.g. `"identities.groups"`) out of a JSON
/// value, returning every string found at that path whether it holds an
/// array of strings or a single string. An absent path yields no matches
/// rather than an error.
fn strings_at_path(profile: &serde_json::Value, path: &str) -> Vec<String> {
    let mut current = profile;
    for segment in path.split('.') {
        if segment.is_empty() {
            continue;
        }
        match current.get(segment) {
            Some(next) => current = next,
            None => return Vec::new(),
        }
    }
    match current {
        serde_json::Value::Array(items) => items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect(),
        serde_json::Value::String(s) => vec![s.clone()],
        _ => Vec::new(),
    }
}

/// Stateless table-driven provider-identity → MXCP-scope translator.
pub struct ScopeMapper {
    rules: Vec<ScopeRule>,
}

impl ScopeMapper {
    pub fn new(rules: Vec<ScopeRule>) -> Self {
        Self { rules }
    }

    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Translate `(provider_scopes_granted, raw_profile)` into the gateway
    /// scope set a [`crate::model::UserContext`] is built from. Evaluation
    /// is set-valued: every matching rule contributes its right-hand set,
    /// unioned.
    pub fn map(&self, provider_scopes_granted: &HashSet<String>, raw_profile: &serde_json::Value) -> HashSet<String> {
        let mut out = HashSet::new();
        for rule in &self.rules {
            match rule {
                ScopeRule::Scopes { provider_scope, mxcp_scopes } => {
                    if provider_scopes_granted.contains(provider_scope) {
                        out.extend(mxcp_scopes.iter().cloned());
                    }
                }
                ScopeRule::Groups { source_path, group, mxcp_scopes } => {
                    if strings_at_path(raw_profile, source_path).iter().any(|g| g == group) {
                        out.extend(mxcp_scopes.iter().cloned());
                    }
                }
                ScopeRule::Roles { source_path, role, mxcp_scopes } => {
                    if strings_at_path(raw_profile, source_path).iter().any(|r| r == role) {
                        out.extend(mxcp_scopes.iter().cloned());
                    }
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn unmapped_scope_grants_nothing() {
        let mapper = ScopeMapper::new(vec![ScopeRule::Scopes {
            provider_scope: "calendar.readonly".to_string(),
            mxcp_scopes: vec!["calendar.read".to_string()],
        }]);
        let granted: HashSet<String> = ["profile".to_string()].into_iter().collect();
        assert!(mapper.map(&granted, &Value::Null).is_empty());
    }

    #[test]
    fn mapped_scope_expands_to_multiple() {
        let mapper = ScopeMapper::new(vec![ScopeRule::Scopes {
            provider_scope: "admin".to_string(),
            mxcp_scopes: vec!["calendar.read".to_string(), "calendar.write".to_string()],
        }]);
        let granted: HashSet<String> = ["admin".to_string()].into_iter().collect();
        let mapped = mapper.map(&granted, &Value::Null);
        assert!(mapped.contains("calendar.read"));
        assert!(mapped.contains("calendar.write"));
    }

    #[test]
    fn group_rule_reads_nested_profile_path() {
        let mapper = ScopeMapper::new(vec![ScopeRule::Groups {
            source_path: "identities.groups".to_string(),
            group: "finance-admins".to_string(),
            mxcp_scopes: vec!["finance.write".to_string()],
        }]);
        let profile = json!({"identities": {"groups": ["finance-admins", "eng"]}});
        let mapped = mapper.map(&HashSet::new(), &profile);
        assert_eq!(mapped, ["finance.write".to_string()].into_iter().collect());
    }

    #[test]
    fn role_rule_with_no_match_at_path_grants_nothing() {
        let mapper = ScopeMapper::new(vec![ScopeRule::Roles {
            source_path: "roles".to_string(),
            role: "owner".to_string(),
            mxcp_scopes: vec!["admin".to_string()],
        }]);
        let profile = json!({"roles": ["viewer"]});
        assert!(mapper.map(&HashSet::new(), &profile).is_empty());
    }
}
