//! Comparison operators as they appear in partial-evaluation results.
//!
//! The engine names builtins by reference (`eq`, `neq`, `lt`, ...). Two
//! operators are synthetic and live in the `internal` namespace: `In`, which
//! the translator substitutes when a reference is not ground, and `NotIn`,
//! which only backends produce when negating `In`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Namespace of engine-internal and synthetic operators.
pub const INTERNAL_NAMESPACE: &str = "internal";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    /// Unification `=` (engine name `eq`).
    Eq,
    /// Comparison `==` (engine name `equal`).
    Equal,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    /// Synthetic: the reference (a collection) contains the value.
    In,
    /// Synthetic: complement of `In`.
    NotIn,
    /// Any other builtin, kept by name so it can be reported.
    Other(String),
}

impl Operator {
    /// Resolve an engine builtin name, e.g. `"neq"` or `"internal.member_2"`.
    ///
    /// Only builtins are decoded. `internal.in` and `internal.not_in` stay
    /// `Other`, so engine output can never carry the synthetic operators.
    pub fn from_name(name: &str) -> Self {
        match name {
            "eq" => Operator::Eq,
            "equal" => Operator::Equal,
            "neq" => Operator::Neq,
            "lt" => Operator::Lt,
            "lte" => Operator::Lte,
            "gt" => Operator::Gt,
            "gte" => Operator::Gte,
            other => Operator::Other(other.to_string()),
        }
    }

    /// Resolve an infix symbol as written in policy text, e.g. `"!="`.
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        let op = match symbol {
            "=" => Operator::Eq,
            "==" => Operator::Equal,
            "!=" => Operator::Neq,
            "<" => Operator::Lt,
            "<=" => Operator::Lte,
            ">" => Operator::Gt,
            ">=" => Operator::Gte,
            _ => return None,
        };
        Some(op)
    }

    /// The engine builtin name.
    pub fn name(&self) -> &str {
        match self {
            Operator::Eq => "eq",
            Operator::Equal => "equal",
            Operator::Neq => "neq",
            Operator::Lt => "lt",
            Operator::Lte => "lte",
            Operator::Gt => "gt",
            Operator::Gte => "gte",
            Operator::In => "internal.in",
            Operator::NotIn => "internal.not_in",
            Operator::Other(name) => name,
        }
    }

    /// Infix rendering used by diagnostic output.
    pub fn symbol(&self) -> &str {
        match self {
            Operator::Eq | Operator::Equal => "=",
            Operator::Neq => "!=",
            Operator::Lt => "<",
            Operator::Lte => "<=",
            Operator::Gt => ">",
            Operator::Gte => ">=",
            Operator::In => "in",
            Operator::NotIn => "not in",
            Operator::Other(name) => name,
        }
    }

    /// True for `=` and `==`, which carry the same meaning once translated.
    pub fn is_equality(&self) -> bool {
        matches!(self, Operator::Eq | Operator::Equal)
    }

    /// True for operators in the `internal` namespace that did not come from
    /// the translator itself (e.g. `internal.member_2` from `x in coll`).
    pub fn is_internal(&self) -> bool {
        match self {
            Operator::Other(name) => {
                name == INTERNAL_NAMESPACE || name.starts_with("internal.")
            }
            _ => false,
        }
    }

    /// True for the operators a backend must support in `comparison`.
    pub fn is_comparison(&self) -> bool {
        !matches!(self, Operator::Other(_))
    }

    /// The logical complement, so `not (x op v)` can be written `x op' v`.
    /// Returns `None` for operators with no known complement.
    pub fn complement(&self) -> Option<Operator> {
        let op = match self {
            Operator::Eq | Operator::Equal => Operator::Neq,
            Operator::Neq => Operator::Eq,
            Operator::Lt => Operator::Gte,
            Operator::Lte => Operator::Gt,
            Operator::Gt => Operator::Lte,
            Operator::Gte => Operator::Lt,
            Operator::In => Operator::NotIn,
            Operator::NotIn => Operator::In,
            Operator::Other(_) => return None,
        };
        Some(op)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}
