//! Operations, identity facts, and the partial-evaluation contract.
//!
//! The policy engine is a black box: it receives a `PartialRequest` and
//! returns a `PartialResponse` whose formula is expressed over the request's
//! `unknowns`. rowguard never evaluates policy itself.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::formula::PartialFormula;

/// The CRUD operation a statement performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Read,
    /// Serialized as `write` in policy input, matching policy naming.
    #[serde(rename = "write")]
    Update,
    Delete,
}

impl Operation {
    pub const ALL: [Operation; 4] = [
        Operation::Create,
        Operation::Read,
        Operation::Update,
        Operation::Delete,
    ];

    /// Name used in `opa` tags, e.g. `update:-`.
    pub fn tag_name(self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Read => "read",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }

    /// Name used in policy paths and in `input.resource.op`.
    pub fn policy_name(self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Read => "read",
            Operation::Update => "write",
            Operation::Delete => "delete",
        }
    }

    pub fn from_tag_name(name: &str) -> Option<Self> {
        Operation::ALL.into_iter().find(|op| op.tag_name() == name)
    }
}

/// Already-resolved identity facts, serialized under `input.auth`.
///
/// Tenancy and session handling live elsewhere; whatever they computed is
/// passed in here verbatim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthContext {
    pub username: String,
    pub permissions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub accessible_tenants: Vec<String>,
}

impl AuthContext {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            ..Self::default()
        }
    }

    pub fn with_permissions<I, S>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.permissions = permissions.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        let tenant_id = tenant_id.into();
        if !self.accessible_tenants.contains(&tenant_id) {
            self.accessible_tenants.push(tenant_id.clone());
        }
        self.tenant_id = Some(tenant_id);
        self
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }
}

/// A partial-evaluation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartialRequest {
    /// Fully qualified policy query, e.g. `data.resource.document.filter_read`.
    pub policy_path: String,
    /// Reference prefixes left unresolved, e.g. `input.resource.tenant_id`.
    pub unknowns: Vec<String>,
    /// The input document with every known fact.
    pub input: Value,
    /// Caller deadline. Engines that block must honor it.
    #[serde(skip)]
    pub timeout: Option<Duration>,
}

/// A successful partial evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialResponse {
    /// Engine-side decision identifier, carried into logs.
    pub decision_id: String,
    pub formula: PartialFormula,
}

impl PartialResponse {
    /// Wrap a formula with a freshly generated decision id.
    pub fn new(formula: PartialFormula) -> Self {
        Self {
            decision_id: uuid::Uuid::new_v4().to_string(),
            formula,
        }
    }
}
