//! A diagnostic backend that renders translated formulas as readable text.
//!
//! Useful for logs and for checking what a policy compiles to without a
//! database schema. References are kept verbatim; values are printed as JSON.

use std::fmt;

use serde_json::Value;

use rowguard_contracts::{
    error::RowguardResult, formula::PartialFormula, formula::Reference, operator::Operator,
};

use crate::{
    traits::Translator,
    translate::{translate, Compiled},
};

/// A node produced by `DebugTranslator`.
#[derive(Debug, Clone, PartialEq)]
pub enum DebugExpr {
    Comparison {
        reference: String,
        op: Operator,
        value: Value,
    },
    And(Vec<DebugExpr>),
    Or(Vec<DebugExpr>),
    /// Only produced when an operator has no complement.
    Not(Box<DebugExpr>),
}

impl fmt::Display for DebugExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DebugExpr::Comparison { reference, op, value } => {
                write!(f, "{reference} {} {value}", op.symbol())
            }
            DebugExpr::And(nodes) => write_group(f, nodes, " AND "),
            DebugExpr::Or(nodes) => write_group(f, nodes, " OR "),
            DebugExpr::Not(node) => write!(f, "NOT ({node})"),
        }
    }
}

fn write_group(f: &mut fmt::Formatter<'_>, nodes: &[DebugExpr], sep: &str) -> fmt::Result {
    f.write_str("(")?;
    for (i, node) in nodes.iter().enumerate() {
        if i > 0 {
            f.write_str(sep)?;
        }
        write!(f, "{node}")?;
    }
    f.write_str(")")
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DebugTranslator;

impl DebugTranslator {
    pub fn new() -> Self {
        Self
    }

    /// Translate and render in one step. An unconditional grant renders as `TRUE`.
    pub fn render(&self, formula: &PartialFormula) -> RowguardResult<String> {
        Ok(match translate(formula, self)? {
            Compiled::Unrestricted => "TRUE".to_string(),
            Compiled::Predicate(expr) => expr.to_string(),
        })
    }
}

impl Translator for DebugTranslator {
    type Output = DebugExpr;

    fn negate(&self, node: DebugExpr) -> DebugExpr {
        match node {
            DebugExpr::Comparison { reference, op, value } => match op.complement() {
                Some(op) => DebugExpr::Comparison { reference, op, value },
                None => DebugExpr::Not(Box::new(DebugExpr::Comparison { reference, op, value })),
            },
            DebugExpr::And(nodes) => {
                DebugExpr::Or(nodes.into_iter().map(|n| self.negate(n)).collect())
            }
            DebugExpr::Or(nodes) => {
                DebugExpr::And(nodes.into_iter().map(|n| self.negate(n)).collect())
            }
            DebugExpr::Not(inner) => *inner,
        }
    }

    fn and(&self, nodes: Vec<DebugExpr>) -> DebugExpr {
        DebugExpr::And(nodes)
    }

    fn or(&self, nodes: Vec<DebugExpr>) -> DebugExpr {
        DebugExpr::Or(nodes)
    }

    fn comparison(
        &self,
        op: &Operator,
        reference: &Reference,
        value: &Value,
    ) -> RowguardResult<DebugExpr> {
        Ok(DebugExpr::Comparison {
            reference: reference.to_string(),
            op: op.clone(),
            value: value.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use rowguard_contracts::operator::Operator;

    use crate::traits::Translator;

    use super::{DebugExpr, DebugTranslator};

    fn cmp(reference: &str, op: Operator, value: serde_json::Value) -> DebugExpr {
        DebugExpr::Comparison {
            reference: reference.to_string(),
            op,
            value,
        }
    }

    #[test]
    fn renders_comparisons_and_groups() {
        let t = DebugTranslator::new();
        let node = t.or(vec![
            cmp("input.single", Operator::Eq, json!("target")),
            t.and(vec![
                cmp("input.list", Operator::In, json!("a")),
                cmp("input.count", Operator::Gt, json!(3)),
            ]),
        ]);
        assert_eq!(
            node.to_string(),
            r#"(input.single = "target" OR (input.list in "a" AND input.count > 3))"#
        );
    }

    #[test]
    fn negation_flips_operators_and_applies_de_morgan() {
        let t = DebugTranslator::new();
        let node = t.and(vec![
            cmp("input.a", Operator::Eq, json!(1)),
            cmp("input.b", Operator::Lt, json!(2)),
        ]);
        assert_eq!(
            t.negate(node),
            DebugExpr::Or(vec![
                cmp("input.a", Operator::Neq, json!(1)),
                cmp("input.b", Operator::Gte, json!(2)),
            ])
        );
    }

    #[test]
    fn negation_twice_restores_node() {
        let t = DebugTranslator::new();
        let node = t.or(vec![
            cmp("input.a", Operator::Neq, json!("x")),
            cmp("input.b", Operator::NotIn, json!("y")),
        ]);
        assert_eq!(t.negate(t.negate(node.clone())), node);
    }

    #[test]
    fn operator_without_complement_is_wrapped() {
        let t = DebugTranslator::new();
        let node = cmp("input.a", Operator::Other("startswith".to_string()), json!("x"));
        let negated = t.negate(node.clone());
        assert!(matches!(negated, DebugExpr::Not(_)));
        assert_eq!(t.negate(negated), node);
    }
}
