//! The partial-evaluation formula: a disjunction of conjunctions of
//! expressions over unknown references.
//!
//! These types are the only view of the policy engine's AST the rest of
//! rowguard sees. Adapters (see `rowguard-rego`) decode the engine's own
//! representation into them.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::{RowguardError, RowguardResult},
    operator::Operator,
};

// ── Reference ────────────────────────────────────────────────────────────────

/// One step of a reference path after its head variable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RefSegment {
    /// Object key, e.g. `resource` in `input.resource`.
    Key(String),
    /// Array index, e.g. `[0]`.
    Index(i64),
    /// Unbound variable, e.g. `_` in `input.list[_]`. Makes the reference non-ground.
    Var(String),
}

/// A dotted path into the input document, e.g. `input.resource.tenant_id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reference {
    pub head: String,
    pub path: Vec<RefSegment>,
}

impl Reference {
    pub fn new(head: impl Into<String>, path: Vec<RefSegment>) -> Self {
        Self {
            head: head.into(),
            path,
        }
    }

    /// Build a ground reference from dotted text with plain keys only.
    pub fn from_path(path: &str) -> Self {
        let mut parts = path.split('.');
        let head = parts.next().unwrap_or_default().to_string();
        Self {
            head,
            path: parts.map(|p| RefSegment::Key(p.to_string())).collect(),
        }
    }

    /// A reference is ground when every segment is known.
    pub fn is_ground(&self) -> bool {
        !self.path.iter().any(|s| matches!(s, RefSegment::Var(_)))
    }

    /// The longest ground prefix: everything before the first variable segment.
    pub fn ground_prefix(&self) -> Reference {
        let path = self
            .path
            .iter()
            .take_while(|s| !matches!(s, RefSegment::Var(_)))
            .cloned()
            .collect();
        Reference {
            head: self.head.clone(),
            path,
        }
    }

    /// True if `prefix` has the same head and its segments lead this path.
    pub fn has_prefix(&self, prefix: &Reference) -> bool {
        self.head == prefix.head
            && self.path.len() >= prefix.path.len()
            && self.path[..prefix.path.len()] == prefix.path[..]
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.head)?;
        for segment in &self.path {
            match segment {
                RefSegment::Key(k) if is_identifier(k) => write!(f, ".{k}")?,
                RefSegment::Key(k) => write!(f, "[{}]", Value::String(k.clone()))?,
                RefSegment::Index(i) => write!(f, "[{i}]")?,
                RefSegment::Var(v) => write!(f, "[{v}]")?,
            }
        }
        Ok(())
    }
}

// ── Term ─────────────────────────────────────────────────────────────────────

/// An operand inside an expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Term {
    Ref(Reference),
    Var(String),
    /// null, boolean, number or string.
    Scalar(Value),
    Array(Vec<Term>),
    Set(Vec<Term>),
    Object(Vec<(Term, Term)>),
    /// Result of a function call the engine could not evaluate.
    Call(Operator, Vec<Term>),
}

impl Term {
    pub fn string(s: impl Into<String>) -> Self {
        Term::Scalar(Value::String(s.into()))
    }

    /// Convert a ground term into a plain JSON value.
    ///
    /// Fails for references, variables and calls at any depth: their values
    /// are only known to the engine.
    pub fn to_value(&self) -> RowguardResult<Value> {
        match self {
            Term::Scalar(v) => Ok(v.clone()),
            Term::Array(items) | Term::Set(items) => items
                .iter()
                .map(Term::to_value)
                .collect::<RowguardResult<Vec<_>>>()
                .map(Value::Array),
            Term::Object(pairs) => {
                let mut map = serde_json::Map::with_capacity(pairs.len());
                for (k, v) in pairs {
                    let key = match k.to_value()? {
                        Value::String(s) => s,
                        other => other.to_string(),
                    };
                    map.insert(key, v.to_value()?);
                }
                Ok(Value::Object(map))
            }
            Term::Ref(r) => Err(RowguardError::unsupported(format!(
                "unable to resolve value [{r}]: resolving references is not supported"
            ))),
            Term::Var(v) => Err(RowguardError::unsupported(format!(
                "unable to resolve value [{v}]: unbound variable"
            ))),
            Term::Call(op, _) => Err(RowguardError::unsupported(format!(
                "unable to resolve value [{self}]: result of '{}' is unknown",
                op.name()
            ))),
        }
    }
}

fn write_joined<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Ref(r) => write!(f, "{r}"),
            Term::Var(v) => f.write_str(v),
            Term::Scalar(v) => write!(f, "{v}"),
            Term::Array(items) => {
                f.write_str("[")?;
                write_joined(f, items)?;
                f.write_str("]")
            }
            Term::Set(items) if items.is_empty() => f.write_str("set()"),
            Term::Set(items) => {
                f.write_str("{")?;
                write_joined(f, items)?;
                f.write_str("}")
            }
            Term::Object(pairs) => {
                f.write_str("{")?;
                for (i, (k, v)) in pairs.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                f.write_str("}")
            }
            Term::Call(op, args) => {
                write!(f, "{}(", op.name())?;
                write_joined(f, args)?;
                f.write_str(")")
            }
        }
    }
}

// ── Expr ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExprBody {
    /// `operator(operands...)`; infix comparisons are calls with two operands.
    Call {
        operator: Operator,
        operands: Vec<Term>,
    },
    /// A bare term, e.g. a rule reference the engine could not expand.
    Term(Term),
}

/// One expression of a conjunction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expr {
    pub negated: bool,
    pub body: ExprBody,
}

impl Expr {
    pub fn call(operator: Operator, operands: Vec<Term>) -> Self {
        Self {
            negated: false,
            body: ExprBody::Call { operator, operands },
        }
    }

    /// `reference op value` with a ground JSON value.
    pub fn compare(reference: Reference, operator: Operator, value: Value) -> Self {
        Self::call(operator, vec![Term::Ref(reference), Term::Scalar(value)])
    }

    pub fn term(term: Term) -> Self {
        Self {
            negated: false,
            body: ExprBody::Term(term),
        }
    }

    pub fn negate(mut self) -> Self {
        self.negated = !self.negated;
        self
    }

    pub fn operator(&self) -> Option<&Operator> {
        match &self.body {
            ExprBody::Call { operator, .. } => Some(operator),
            ExprBody::Term(_) => None,
        }
    }

    pub fn operands(&self) -> &[Term] {
        match &self.body {
            ExprBody::Call { operands, .. } => operands,
            ExprBody::Term(_) => &[],
        }
    }

    /// Canonical text used as the expression's identity during normalization.
    pub fn key(&self) -> String {
        self.to_string()
    }
}

fn infix(op: &Operator) -> Option<&'static str> {
    let s = match op {
        Operator::Eq => "=",
        Operator::Equal => "==",
        Operator::Neq => "!=",
        Operator::Lt => "<",
        Operator::Lte => "<=",
        Operator::Gt => ">",
        Operator::Gte => ">=",
        _ => return None,
    };
    Some(s)
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negated {
            f.write_str("not ")?;
        }
        match &self.body {
            ExprBody::Call { operator, operands } => match (infix(operator), operands.as_slice()) {
                (Some(sym), [lhs, rhs]) => write!(f, "{lhs} {sym} {rhs}"),
                _ => {
                    write!(f, "{}(", operator.name())?;
                    write_joined(f, operands)?;
                    f.write_str(")")
                }
            },
            ExprBody::Term(t) => write!(f, "{t}"),
        }
    }
}

// ── Conjunction / PartialFormula ─────────────────────────────────────────────

/// Expressions that must all hold. An empty conjunction is always true.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Conjunction(pub Vec<Expr>);

impl Conjunction {
    pub fn new(exprs: Vec<Expr>) -> Self {
        Self(exprs)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Expr> {
        self.0.iter()
    }

    /// Order-sensitive identity of the whole conjunction.
    pub fn key(&self) -> String {
        self.0.iter().map(Expr::key).collect::<Vec<_>>().join("; ")
    }
}

impl fmt::Display for Conjunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("true");
        }
        for (i, e) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{e}")?;
        }
        Ok(())
    }
}

/// The result of a partial evaluation: a disjunction of conjunctions.
///
/// The two degenerate shapes are easy to swap by mistake:
/// - no conjunctions at all: nothing can satisfy the policy (deny);
/// - at least one empty conjunction: the policy holds for any unknowns (grant).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartialFormula(pub Vec<Conjunction>);

impl PartialFormula {
    pub fn new(conjunctions: Vec<Conjunction>) -> Self {
        Self(conjunctions)
    }

    /// The always-deny formula.
    pub fn denied() -> Self {
        Self(Vec::new())
    }

    /// The always-grant formula.
    pub fn unconditional() -> Self {
        Self(vec![Conjunction::default()])
    }

    pub fn is_denied(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_unconditional(&self) -> bool {
        self.0.iter().any(Conjunction::is_empty)
    }

    pub fn conjunctions(&self) -> &[Conjunction] {
        &self.0
    }
}

impl fmt::Display for PartialFormula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("false");
        }
        for (i, c) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" OR ")?;
            }
            write!(f, "{{{c}}}")?;
        }
        Ok(())
    }
}
