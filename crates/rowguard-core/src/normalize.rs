//! Formula normalization.
//!
//! Partial evaluation often reaches the same rule through several paths and
//! returns syntactically distinct but logically duplicate branches. This
//! pass removes them before translation and recognizes the two degenerate
//! results:
//!
//! 1. No conjunctions → `Denied` (checked first).
//! 2. Any empty conjunction → `Unconditional`.
//! 3. Otherwise: duplicate expressions are dropped within each conjunction,
//!    contradictory conjunctions are dropped, then duplicate conjunctions are
//!    dropped. First-seen order is kept everywhere. If nothing survives the
//!    result is `Denied`.

use std::collections::{HashMap, HashSet};

use rowguard_contracts::{
    formula::{Conjunction, Expr, PartialFormula},
    operator::Operator,
};

use crate::translate::comparison_parts;

/// Outcome of normalizing a `PartialFormula`.
#[derive(Debug, Clone, PartialEq)]
pub enum Normalized {
    /// No value of the unknowns satisfies the policy.
    Denied,
    /// The policy holds regardless of the unknowns; no predicate is needed.
    Unconditional,
    /// Deduplicated, satisfiable-looking conjunctions, in input order.
    Conjunctions(Vec<Conjunction>),
}

impl Normalized {
    /// Turn the result back into a formula, e.g. to normalize it again.
    pub fn into_formula(self) -> PartialFormula {
        match self {
            Normalized::Denied => PartialFormula::denied(),
            Normalized::Unconditional => PartialFormula::unconditional(),
            Normalized::Conjunctions(c) => PartialFormula::new(c),
        }
    }
}

/// Normalize `formula`. The flag reports whether anything was removed.
pub fn normalize(formula: &PartialFormula) -> (Normalized, bool) {
    if formula.is_denied() {
        return (Normalized::Denied, false);
    }
    if formula.is_unconditional() {
        return (Normalized::Unconditional, formula.conjunctions().len() > 1);
    }

    let mut changed = false;
    let mut seen: HashSet<String> = HashSet::new();
    let mut kept = Vec::with_capacity(formula.conjunctions().len());

    for conjunction in formula.conjunctions() {
        let (exprs, deduped) = dedup_expressions(conjunction);
        changed |= deduped;

        if is_contradictory(&exprs) {
            changed = true;
            continue;
        }

        let normalized = Conjunction::new(exprs);
        if !seen.insert(normalized.key()) {
            changed = true;
            continue;
        }
        kept.push(normalized);
    }

    if kept.is_empty() {
        return (Normalized::Denied, true);
    }
    (Normalized::Conjunctions(kept), changed)
}

/// Drop repeated expressions, keeping the first occurrence of each.
pub fn dedup_expressions(conjunction: &Conjunction) -> (Vec<Expr>, bool) {
    let mut seen: HashSet<String> = HashSet::new();
    let exprs: Vec<Expr> = conjunction
        .iter()
        .filter(|e| seen.insert(e.key()))
        .cloned()
        .collect();
    let changed = exprs.len() != conjunction.len();
    (exprs, changed)
}

/// True if the conjunction pins a ground reference to two different values
/// (`x = a; x = b`) or both to and away from one value (`x = a; x != a`).
///
/// Only equality and inequality against resolvable values are considered;
/// anything else is left for the translator to judge.
pub fn is_contradictory(exprs: &[Expr]) -> bool {
    let mut equals: HashMap<String, String> = HashMap::new();
    let mut not_equals: HashMap<String, HashSet<String>> = HashMap::new();

    for expr in exprs {
        let Some((reference, value, op)) = comparison_parts(expr) else {
            continue;
        };
        if !reference.is_ground() {
            continue;
        }
        let excluded = match op {
            Operator::Eq | Operator::Equal => expr.negated,
            Operator::Neq => !expr.negated,
            _ => continue,
        };
        let Ok(value) = value.to_value() else {
            continue;
        };

        let ref_key = reference.to_string();
        let value_key = value.to_string();
        if excluded {
            not_equals
                .entry(ref_key.clone())
                .or_default()
                .insert(value_key);
        } else {
            if let Some(existing) = equals.get(&ref_key) {
                if *existing != value_key {
                    return true;
                }
            }
            equals.insert(ref_key.clone(), value_key);
        }

        if let (Some(eq), Some(neq)) = (equals.get(&ref_key), not_equals.get(&ref_key)) {
            if neq.contains(eq) {
                return true;
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use rowguard_contracts::{
        formula::{Conjunction, Expr, PartialFormula, RefSegment, Reference},
        operator::Operator,
    };

    use super::{normalize, Normalized};

    fn single(value: &str) -> Expr {
        Expr::compare(
            Reference::from_path("input.single"),
            Operator::Eq,
            json!(value),
        )
    }

    fn single_neq(value: &str) -> Expr {
        Expr::compare(
            Reference::from_path("input.single"),
            Operator::Neq,
            json!(value),
        )
    }

    fn list_contains(value: &str) -> Expr {
        let mut r = Reference::from_path("input.list");
        r.path.push(RefSegment::Var("_".to_string()));
        Expr::compare(r, Operator::Eq, json!(value))
    }

    fn formula(conjunctions: Vec<Vec<Expr>>) -> PartialFormula {
        PartialFormula::new(conjunctions.into_iter().map(Conjunction::new).collect())
    }

    fn conjunctions(n: Normalized) -> Vec<Conjunction> {
        match n {
            Normalized::Conjunctions(c) => c,
            other => panic!("expected conjunctions, got {:?}", other),
        }
    }

    // ── Degenerate shapes ────────────────────────────────────────────────────

    #[test]
    fn empty_formula_is_denied() {
        let (n, changed) = normalize(&PartialFormula::denied());
        assert_eq!(n, Normalized::Denied);
        assert!(!changed);
    }

    #[test]
    fn single_empty_conjunction_is_unconditional() {
        let (n, _) = normalize(&PartialFormula::unconditional());
        assert_eq!(n, Normalized::Unconditional);
    }

    #[test]
    fn empty_conjunction_anywhere_wins_over_other_branches() {
        let f = formula(vec![vec![single("target")], vec![]]);
        assert_eq!(normalize(&f).0, Normalized::Unconditional);
    }

    // ── Deduplication ────────────────────────────────────────────────────────

    #[test]
    fn duplicate_conjunctions_are_dropped() {
        let f = formula(vec![
            vec![single("target")],
            vec![single("target")],
            vec![list_contains("target")],
        ]);
        let (n, changed) = normalize(&f);
        assert!(changed);
        let c = conjunctions(n);
        assert_eq!(c.len(), 2);
        assert_eq!(c[0].0, vec![single("target")]);
        assert_eq!(c[1].0, vec![list_contains("target")]);
    }

    #[test]
    fn duplicate_expressions_are_dropped_in_order() {
        let f = formula(vec![vec![
            single("target"),
            list_contains("target"),
            single("target"),
        ]]);
        let c = conjunctions(normalize(&f).0);
        assert_eq!(c[0].0, vec![single("target"), list_contains("target")]);
    }

    #[test]
    fn conjunctions_equal_after_expression_dedup_collapse() {
        let f = formula(vec![
            vec![single("target"), single("target")],
            vec![single("target")],
        ]);
        let c = conjunctions(normalize(&f).0);
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn normalization_is_idempotent() {
        let f = formula(vec![
            vec![single("target"), list_contains("a"), single("target")],
            vec![list_contains("a")],
            vec![list_contains("a")],
        ]);
        let (once, _) = normalize(&f);
        let (twice, changed) = normalize(&once.clone().into_formula());
        assert_eq!(once, twice);
        assert!(!changed, "a normalized formula must not change again");
    }

    #[test]
    fn negation_is_part_of_expression_identity() {
        let f = formula(vec![vec![single("target"), single("other").negate()]]);
        let c = conjunctions(normalize(&f).0);
        assert_eq!(c[0].len(), 2);
    }

    // ── Contradictions ───────────────────────────────────────────────────────

    #[test]
    fn multiple_values_on_ground_reference_are_dropped() {
        let f = formula(vec![
            vec![single("target"), list_contains("target"), single("another")],
            vec![list_contains("target"), list_contains("another")],
        ]);
        let c = conjunctions(normalize(&f).0);
        assert_eq!(c.len(), 1);
        assert_eq!(
            c[0].0,
            vec![list_contains("target"), list_contains("another")],
            "membership on a non-ground reference may hold several values"
        );
    }

    #[test]
    fn equal_and_not_equal_same_value_is_dropped() {
        let f = formula(vec![
            vec![
                single("target"),
                list_contains("target"),
                single_neq("another"),
                single_neq("target"),
            ],
            vec![single("target"), list_contains("target"), single_neq("another")],
        ]);
        let c = conjunctions(normalize(&f).0);
        assert_eq!(c.len(), 1);
        assert_eq!(c[0].len(), 3);
    }

    #[test]
    fn negated_equality_counts_as_inequality() {
        let f = formula(vec![vec![single("target").negate(), single("target")]]);
        assert_eq!(normalize(&f).0, Normalized::Denied);
    }

    #[test]
    fn all_contradictory_branches_deny() {
        let f = formula(vec![
            vec![single("a"), single("b")],
            vec![single("c"), single_neq("c")],
        ]);
        let (n, changed) = normalize(&f);
        assert_eq!(n, Normalized::Denied);
        assert!(changed);
    }
}
