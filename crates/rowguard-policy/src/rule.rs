//! Partial-evaluation rule types and configuration schema.
//!
//! A `PartialPolicyConfig` is deserialized from TOML and holds an ordered
//! list of `PartialRule`s. Rules are evaluated in declaration order and the
//! first rule matching the requested policy path wins. If no rule matches,
//! the policy is undefined, which callers enforce as deny.

use serde::{Deserialize, Serialize};

/// What a matching rule answers.
///
/// ```toml
/// verdict = "grant"    # unconditional, no predicate
/// verdict = "deny"     # nothing satisfies the policy
/// verdict = "partial"  # residual `queries` over the unknowns
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuleVerdict {
    Grant,
    Deny,
    Partial,
}

/// A single rule loaded from TOML.
///
/// `policy` is matched against the request's policy path. `"*"` matches any
/// path and a trailing `.*` matches every path under that package, e.g.
/// `data.resource.document.*`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartialRule {
    /// Stable identifier used in logs and error messages.
    pub id: String,

    #[serde(default)]
    pub description: String,

    pub policy: String,

    /// Permissions the caller must hold (`input.auth.permissions`). A missing
    /// one turns any verdict into deny.
    #[serde(default)]
    pub required_permissions: Vec<String>,

    pub verdict: RuleVerdict,

    /// For `partial`: a disjunction of conjunctions in the compact text
    /// syntax. `$input.<path>` placeholders are replaced with values from the
    /// request input before parsing.
    #[serde(default)]
    pub queries: Vec<Vec<String>>,
}

impl PartialRule {
    /// Return true if this rule answers `policy_path`.
    pub fn matches(&self, policy_path: &str) -> bool {
        if self.policy == "*" {
            return true;
        }
        match self.policy.strip_suffix(".*") {
            Some(package) => policy_path
                .strip_prefix(package)
                .is_some_and(|rest| rest.starts_with('.')),
            None => self.policy == policy_path,
        }
    }
}

/// The top-level structure deserialized from a TOML rule file.
///
/// ```toml
/// [[rules]]
/// id = "tenant-read"
/// description = "Members read documents of their own tenant"
/// policy = "data.resource.document.filter_read"
/// required_permissions = ["VIEW"]
/// verdict = "partial"
/// queries = [["input.resource.tenant_id = $input.auth.tenant_id"]]
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PartialPolicyConfig {
    /// Ordered list of rules. First match wins.
    #[serde(default)]
    pub rules: Vec<PartialRule>,
}
