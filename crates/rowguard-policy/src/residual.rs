//! Residual computation for `partial` rules.
//!
//! A rule's query text may mention both unknown references (left in the
//! formula for the translator) and known input (`input.auth.*`, resource
//! fields supplied for create). Known parts are evaluated here, the way a
//! partial evaluator would:
//!
//! - an expression that evaluates to true is dropped from its conjunction;
//! - one that evaluates to false, or reads undefined input, drops the whole
//!   conjunction;
//! - anything touching an unknown, a variable or a call is kept as is.
//!
//! A conjunction whose expressions all fold to true becomes empty, which is
//! an unconditional grant.

use std::cmp::Ordering;

use serde_json::Value;

use rowguard_contracts::{
    formula::{Conjunction, Expr, ExprBody, RefSegment, Reference, Term},
    operator::Operator,
};

const PLACEHOLDER: &str = "$input";

/// Walk a dotted `path` into `value`. Null counts as absent.
pub fn resolve_path<'v>(value: &'v Value, path: &str) -> Option<&'v Value> {
    let mut current = value;
    for segment in path.split('.').filter(|s| !s.is_empty()) {
        let next = match current {
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => current.get(segment),
        };
        match next {
            Some(v) if !v.is_null() => current = v,
            _ => return None,
        }
    }
    Some(current)
}

/// Replace every `$input.<path>` with the JSON encoding of the value `lookup`
/// returns for `<path>`. Returns `None` if any lookup is undefined.
pub fn substitute_placeholders<F>(text: &str, mut lookup: F) -> Option<String>
where
    F: FnMut(&str) -> Option<Value>,
{
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find(PLACEHOLDER) {
        out.push_str(&rest[..start]);
        let after = &rest[start + PLACEHOLDER.len()..];
        let len = after
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '.'))
            .unwrap_or(after.len());
        let path = after[..len].trim_matches('.');
        out.push_str(&lookup(path)?.to_string());
        rest = &after[len..];
    }
    out.push_str(rest);
    Some(out)
}

enum Folded {
    True,
    False,
    Residual,
}

/// Folds known input out of parsed rule queries.
pub struct Residual<'a> {
    unknowns: Vec<Reference>,
    input: &'a Value,
}

impl<'a> Residual<'a> {
    pub fn new(unknowns: &[String], input: &'a Value) -> Self {
        Self {
            unknowns: unknowns.iter().map(|u| Reference::from_path(u)).collect(),
            input,
        }
    }

    /// Fold one conjunction. `None` means it can never hold.
    pub fn conjunction(&self, exprs: Vec<Expr>) -> Option<Conjunction> {
        let mut kept = Vec::with_capacity(exprs.len());
        for expr in exprs {
            match self.fold(&expr) {
                Folded::True => {}
                Folded::False => return None,
                Folded::Residual => kept.push(expr),
            }
        }
        Some(Conjunction::new(kept))
    }

    fn is_unknown(&self, reference: &Reference) -> bool {
        self.unknowns.iter().any(|u| reference.has_prefix(u))
    }

    fn fold(&self, expr: &Expr) -> Folded {
        let holds = match &expr.body {
            ExprBody::Term(term) => match self.values(term) {
                Some(values) => values.iter().any(|v| *v != Value::Bool(false)),
                None => return Folded::Residual,
            },
            ExprBody::Call { operator, operands } => {
                let [lhs, rhs] = operands.as_slice() else {
                    return Folded::Residual;
                };
                if !operator.is_comparison() || matches!(operator, Operator::In | Operator::NotIn) {
                    return Folded::Residual;
                }
                let (Some(left), Some(right)) = (self.values(lhs), self.values(rhs)) else {
                    return Folded::Residual;
                };
                left.iter()
                    .any(|l| right.iter().any(|r| compare(operator, l, r)))
            }
        };
        if holds != expr.negated {
            Folded::True
        } else {
            Folded::False
        }
    }

    /// Every value a known term can take. `None` when the term is not known.
    fn values(&self, term: &Term) -> Option<Vec<Value>> {
        match term {
            Term::Ref(r) if r.head == "input" && !self.is_unknown(r) => Some(self.lookup(r)),
            Term::Ref(_) | Term::Var(_) | Term::Call(..) => None,
            other => other.to_value().ok().map(|v| vec![v]),
        }
    }

    /// Values under `reference`; a variable segment ranges over all elements.
    fn lookup(&self, reference: &Reference) -> Vec<Value> {
        let mut current: Vec<&Value> = vec![self.input];
        for segment in &reference.path {
            current = current
                .into_iter()
                .flat_map(|v| -> Vec<&Value> {
                    match segment {
                        RefSegment::Key(k) => v.get(k.as_str()).into_iter().collect(),
                        RefSegment::Index(i) => usize::try_from(*i)
                            .ok()
                            .and_then(|i| v.get(i))
                            .into_iter()
                            .collect(),
                        RefSegment::Var(_) => match v {
                            Value::Array(items) => items.iter().collect(),
                            Value::Object(map) => map.values().collect(),
                            _ => Vec::new(),
                        },
                    }
                })
                .collect();
        }
        current.into_iter().filter(|v| !v.is_null()).cloned().collect()
    }
}

fn compare(op: &Operator, left: &Value, right: &Value) -> bool {
    let ordering = match (left, right) {
        (Value::Number(l), Value::Number(r)) => match (l.as_f64(), r.as_f64()) {
            (Some(l), Some(r)) => l.partial_cmp(&r),
            _ => None,
        },
        (Value::String(l), Value::String(r)) => Some(l.cmp(r)),
        (l, r) if l == r => Some(Ordering::Equal),
        _ => None,
    };
    match op {
        Operator::Eq | Operator::Equal => ordering == Some(Ordering::Equal),
        Operator::Neq => ordering != Some(Ordering::Equal),
        Operator::Lt => ordering == Some(Ordering::Less),
        Operator::Lte => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
        Operator::Gt => ordering == Some(Ordering::Greater),
        Operator::Gte => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
        _ => false,
    }
}
