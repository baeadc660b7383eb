//! TOML-driven partial evaluator.
//!
//! `TomlPartialEngine` loads a `PartialPolicyConfig` from a TOML string or
//! file and implements the `PartialEvaluator` trait from rowguard-core.
//!
//! Evaluation algorithm:
//!
//! 1. Iterate rules in declaration order.
//! 2. For the first rule whose `policy` pattern matches the request path:
//!    a. Verify the caller holds every permission in `required_permissions`
//!       (read from `input.auth.permissions`). If any is missing → deny
//!       (empty formula), whatever the rule's verdict.
//!    b. `grant` → unconditional formula, `deny` → empty formula,
//!       `partial` → the rule's queries with placeholders substituted and
//!       known input folded away.
//! 3. If no rule matched → `RowguardError::PolicyUndefined`.

use std::{path::Path, time::Instant};

use serde_json::Value;
use tracing::{debug, warn};

use rowguard_contracts::{
    error::{RowguardError, RowguardResult},
    formula::PartialFormula,
    policy::{PartialRequest, PartialResponse},
};
use rowguard_core::traits::PartialEvaluator;
use rowguard_rego::text::parse_expr;

use crate::{
    residual::{resolve_path, substitute_placeholders, Residual},
    rule::{PartialPolicyConfig, PartialRule, RuleVerdict},
};

/// A `PartialEvaluator` that answers from rules declared in TOML.
///
/// ```rust,ignore
/// use rowguard_policy::TomlPartialEngine;
///
/// let engine = TomlPartialEngine::from_file(Path::new("policies/documents.toml"))?;
/// ```
#[derive(Debug)]
pub struct TomlPartialEngine {
    config: PartialPolicyConfig,
}

impl TomlPartialEngine {
    /// Parse `s` as TOML and build a `TomlPartialEngine`.
    ///
    /// Returns `RowguardError::ConfigError` if the TOML is malformed, does
    /// not match `PartialPolicyConfig`, or a rule's queries do not parse.
    pub fn from_toml_str(s: &str) -> RowguardResult<Self> {
        let config: PartialPolicyConfig =
            toml::from_str(s).map_err(|e| RowguardError::ConfigError {
                reason: format!("failed to parse policy TOML: {}", e),
            })?;
        Self::from_config(config)
    }

    /// Read the file at `path` and parse it as TOML rule configuration.
    pub fn from_file(path: &Path) -> RowguardResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| RowguardError::ConfigError {
            reason: format!("failed to read policy file '{}': {}", path.display(), e),
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn from_config(config: PartialPolicyConfig) -> RowguardResult<Self> {
        for rule in &config.rules {
            validate(rule)?;
        }
        Ok(Self { config })
    }

    pub fn rules(&self) -> &[PartialRule] {
        &self.config.rules
    }

    fn residual_formula(&self, rule: &PartialRule, request: &PartialRequest) -> RowguardResult<PartialFormula> {
        let residual = Residual::new(&request.unknowns, &request.input);
        let mut conjunctions = Vec::with_capacity(rule.queries.len());

        'queries: for (index, query) in rule.queries.iter().enumerate() {
            let mut exprs = Vec::with_capacity(query.len());
            for text in query {
                let Some(text) = substitute_placeholders(text, |path| {
                    resolve_path(&request.input, path).cloned()
                }) else {
                    debug!(
                        rule_id = %rule.id,
                        query = index,
                        "query reads undefined input; skipping"
                    );
                    continue 'queries;
                };
                let expr = parse_expr(&text).map_err(|e| RowguardError::PolicyEvaluation {
                    reason: format!("rule '{}' query {}: {}", rule.id, index, e),
                })?;
                exprs.push(expr);
            }
            if let Some(conjunction) = residual.conjunction(exprs) {
                conjunctions.push(conjunction);
            }
        }
        Ok(PartialFormula::new(conjunctions))
    }
}

/// Reject rules whose meaning would be surprising at evaluation time.
fn validate(rule: &PartialRule) -> RowguardResult<()> {
    let config_error = |reason: String| RowguardError::ConfigError {
        reason: format!("rule '{}': {}", rule.id, reason),
    };
    match rule.verdict {
        RuleVerdict::Partial if rule.queries.is_empty() => {
            return Err(config_error("verdict 'partial' requires at least one query".to_string()))
        }
        RuleVerdict::Grant | RuleVerdict::Deny if !rule.queries.is_empty() => {
            return Err(config_error("queries are only allowed with verdict 'partial'".to_string()))
        }
        _ => {}
    }
    for query in &rule.queries {
        for text in query {
            let sample = substitute_placeholders(text, |_| Some(Value::Null)).unwrap_or_default();
            parse_expr(&sample).map_err(|e| config_error(format!("query [{text}]: {e}")))?;
        }
    }
    Ok(())
}

fn permissions(input: &Value) -> Vec<&str> {
    resolve_path(input, "auth.permissions")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default()
}

impl PartialEvaluator for TomlPartialEngine {
    fn partial(&self, request: &PartialRequest) -> RowguardResult<PartialResponse> {
        let started = Instant::now();
        debug!(
            policy = %request.policy_path,
            unknowns = request.unknowns.len(),
            "evaluating partial policy"
        );

        let Some(rule) = self.config.rules.iter().find(|r| r.matches(&request.policy_path)) else {
            warn!(policy = %request.policy_path, "no rule matched; policy undefined");
            return Err(RowguardError::PolicyUndefined {
                policy_path: request.policy_path.clone(),
            });
        };

        debug!(rule_id = %rule.id, policy = %request.policy_path, "rule matched");

        let held = permissions(&request.input);
        let missing = rule
            .required_permissions
            .iter()
            .find(|p| !held.contains(&p.as_str()));

        let formula = if let Some(missing) = missing {
            warn!(
                rule_id = %rule.id,
                permission = %missing,
                "matched rule requires a permission the caller does not hold"
            );
            PartialFormula::denied()
        } else {
            match rule.verdict {
                RuleVerdict::Grant => PartialFormula::unconditional(),
                RuleVerdict::Deny => PartialFormula::denied(),
                RuleVerdict::Partial => self.residual_formula(rule, request)?,
            }
        };

        if let Some(timeout) = request.timeout {
            if started.elapsed() > timeout {
                return Err(RowguardError::PolicyTimeout {
                    policy_path: request.policy_path.clone(),
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                });
            }
        }

        let response = PartialResponse::new(formula);
        debug!(
            decision_id = %response.decision_id,
            formula = %response.formula,
            "partial evaluation complete"
        );
        Ok(response)
    }
}
