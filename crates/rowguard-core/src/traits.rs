//! Core trait definitions for the rowguard pipeline.
//!
//! Two seams define the trust boundary:
//!
//! - `PartialEvaluator`: the external policy engine (black box)
//! - `Translator`:       a target expression language (SQL, debug strings, ...)
//!
//! The translator core in `crate::translate` sits between them and never
//! depends on either side's concrete types.

use std::sync::Arc;

use serde_json::Value;

use rowguard_contracts::{
    error::RowguardResult,
    formula::Reference,
    operator::Operator,
    policy::{PartialRequest, PartialResponse},
};

/// A backend that knows how to express translated nodes.
///
/// Implementations must be pure with respect to translation state: the same
/// inputs always produce the same node, and no method observes another
/// call's output except through its arguments.
pub trait Translator {
    /// The backend's node type, e.g. a SQL predicate tree.
    type Output;

    /// Logical negation of `node`.
    ///
    /// Backends should prefer flipping the comparison operator
    /// (`=` → `!=`, `<` → `>=`, `in` → `not in`) over wrapping in a NOT.
    fn negate(&self, node: Self::Output) -> Self::Output;

    /// Conjunction of two or more nodes, in the given order.
    fn and(&self, nodes: Vec<Self::Output>) -> Self::Output;

    /// Disjunction of two or more nodes, in the given order.
    fn or(&self, nodes: Vec<Self::Output>) -> Self::Output;

    /// `reference op value`.
    ///
    /// Resolves `reference` to a backend-native location and coerces `value`
    /// to that location's type. Unknown references and failed coercions are
    /// errors, never silently dropped or truncated.
    fn comparison(
        &self,
        op: &Operator,
        reference: &Reference,
        value: &Value,
    ) -> RowguardResult<Self::Output>;
}

/// The policy engine's partial-evaluation entry point.
///
/// The call may block (network or in-process). Implementations must honor
/// `PartialRequest::timeout` when set, and report "no such policy" as
/// `RowguardError::PolicyUndefined` so it can be logged apart from failures.
/// Every error is treated as deny by callers.
pub trait PartialEvaluator: Send + Sync {
    fn partial(&self, request: &PartialRequest) -> RowguardResult<PartialResponse>;
}

impl<T: PartialEvaluator + ?Sized> PartialEvaluator for Arc<T> {
    fn partial(&self, request: &PartialRequest) -> RowguardResult<PartialResponse> {
        (**self).partial(request)
    }
}

impl<T: PartialEvaluator + ?Sized> PartialEvaluator for Box<T> {
    fn partial(&self, request: &PartialRequest) -> RowguardResult<PartialResponse> {
        (**self).partial(request)
    }
}
