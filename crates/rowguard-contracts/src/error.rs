//! Error types for the rowguard compilation pipeline.
//!
//! All fallible operations return `RowguardResult<T>`. Variants carry enough
//! context to tell a policy/tag mismatch apart from an engine outage, but
//! every one of them is deny-equivalent to the caller: nothing here ever
//! means "apply no filter".

use thiserror::Error;

/// The unified error type for rowguard.
#[derive(Debug, Error)]
pub enum RowguardError {
    /// Partial evaluation returned an empty disjunction: no value of the
    /// unknowns can satisfy the policy.
    #[error("policy queries cannot be resolved: access denied regardless of unknown values")]
    QueriesNotResolved,

    /// An expression has a shape the translator refuses to guess about
    /// (wrong arity, builtin call, bare term, unresolvable value).
    #[error("unsupported operation: {reason}")]
    UnsupportedOperation { reason: String },

    /// A reference could not be mapped onto a model field.
    #[error("unable to resolve field for reference [{reference}]: {reason}")]
    FieldResolution { reference: String, reason: String },

    /// A policy-supplied value could not be converted to the field's native type.
    #[error("cannot convert {value_type} value to {field_type} for field '{field}': {reason}")]
    TypeCoercion {
        field: String,
        field_type: String,
        value_type: String,
        reason: String,
    },

    /// A model's declarative policy configuration is invalid.
    #[error(transparent)]
    Metadata(#[from] MetadataError),

    /// The filtering decision denied the statement.
    #[error("access denied: {reason}")]
    AccessDenied { reason: String },

    /// The policy engine has no rule at the requested path.
    #[error("policy '{policy_path}' is undefined")]
    PolicyUndefined { policy_path: String },

    /// The policy engine failed while evaluating.
    #[error("policy evaluation failed: {reason}")]
    PolicyEvaluation { reason: String },

    /// The policy engine did not answer within the caller's deadline.
    #[error("policy '{policy_path}' timed out after {timeout_ms}ms")]
    PolicyTimeout { policy_path: String, timeout_ms: u64 },

    /// The API was used in a way the filter cannot enforce (e.g. batch update).
    #[error("unsupported usage: {reason}")]
    UnsupportedUsage { reason: String },

    /// A required configuration value is missing or invalid.
    #[error("configuration error: {reason}")]
    ConfigError { reason: String },

    /// Engine output or expression text could not be parsed.
    #[error("parse error: {reason}")]
    ParseError { reason: String },
}

impl RowguardError {
    /// True for errors that are a policy *decision* (deny) rather than a
    /// malfunction. Both must be enforced as deny; this only picks the log level.
    pub fn is_deny(&self) -> bool {
        matches!(
            self,
            RowguardError::QueriesNotResolved
                | RowguardError::AccessDenied { .. }
                | RowguardError::PolicyUndefined { .. }
        )
    }

    pub fn unsupported(reason: impl Into<String>) -> Self {
        RowguardError::UnsupportedOperation {
            reason: reason.into(),
        }
    }

    pub fn parse(reason: impl Into<String>) -> Self {
        RowguardError::ParseError {
            reason: reason.into(),
        }
    }
}

/// Developer configuration mistakes found while building model metadata.
///
/// Raised the first time a model type is used (or at registration), never
/// deferred and never skipped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MetadataError {
    #[error("policy marker not found in model [{model}]: a 'FilteredModel' embed or 'Filter' field with an 'opa' tag is required")]
    MarkerNotFound { model: String },

    #[error("'opa' tag on the policy marker of model [{model}] must define a resource type ('type:<resource_type>')")]
    ResourceTypeMissing { model: String },

    #[error("invalid 'opa' tag on {model}.{field}: {reason}")]
    InvalidTag {
        model: String,
        field: String,
        reason: String,
    },

    #[error("invalid 'opa' tag on {model}.{field}: 'field' or 'input' is required")]
    InputFieldMissing { model: String, field: String },

    #[error("'opa' tag cannot be used on single primary key {model}.{field}")]
    PrimaryKeyTagged { model: String, field: String },
}

/// Convenience alias used throughout the rowguard crates.
pub type RowguardResult<T> = Result<T, RowguardError>;
