//! Backend-generic translation of a partial formula.
//!
//! The pipeline is:
//!
//!   PartialFormula → normalize → per-expression comparison → AND / OR → backend node
//!
//! An expression whose shape is not exactly `op(reference, value)` with a
//! supported operator is an error, never a silently dropped condition.

use serde_json::Value;
use tracing::debug;

use rowguard_contracts::{
    error::{RowguardError, RowguardResult},
    formula::{Conjunction, Expr, ExprBody, PartialFormula, Reference, Term},
    operator::Operator,
};

use crate::{
    normalize::{normalize, Normalized},
    traits::Translator,
};

/// Result of translating a formula that is not an outright deny.
#[derive(Debug, Clone, PartialEq)]
pub enum Compiled<E> {
    /// Unconditional grant: attach no predicate.
    Unrestricted,
    Predicate(E),
}

impl<E> Compiled<E> {
    pub fn is_unrestricted(&self) -> bool {
        matches!(self, Compiled::Unrestricted)
    }

    pub fn predicate(&self) -> Option<&E> {
        match self {
            Compiled::Unrestricted => None,
            Compiled::Predicate(e) => Some(e),
        }
    }

    pub fn into_predicate(self) -> Option<E> {
        match self {
            Compiled::Unrestricted => None,
            Compiled::Predicate(e) => Some(e),
        }
    }
}

/// Translate `formula` into a single backend node.
///
/// # Errors
///
/// - `QueriesNotResolved` when the formula (after normalization) has no
///   conjunctions. Callers must treat this as deny.
/// - `UnsupportedOperation` for any expression the translator will not express.
/// - Whatever the backend's `comparison` returns (field resolution, coercion).
pub fn translate<T: Translator>(
    formula: &PartialFormula,
    translator: &T,
) -> RowguardResult<Compiled<T::Output>> {
    let (normalized, changed) = normalize(formula);
    if changed {
        debug!(
            before = formula.conjunctions().len(),
            formula = %normalized.clone().into_formula(),
            "partial formula normalized"
        );
    }

    let conjunctions = match normalized {
        Normalized::Denied => return Err(RowguardError::QueriesNotResolved),
        Normalized::Unconditional => return Ok(Compiled::Unrestricted),
        Normalized::Conjunctions(c) => c,
    };

    let branches = conjunctions
        .iter()
        .map(|c| translate_conjunction(c, translator))
        .collect::<RowguardResult<Vec<_>>>()?;

    Ok(Compiled::Predicate(combine(branches, |nodes| {
        translator.or(nodes)
    })))
}

/// Translate one conjunction. A single expression is returned unwrapped.
pub fn translate_conjunction<T: Translator>(
    conjunction: &Conjunction,
    translator: &T,
) -> RowguardResult<T::Output> {
    if conjunction.is_empty() {
        return Err(RowguardError::unsupported(
            "an empty conjunction is an unconditional grant and has no predicate",
        ));
    }
    let nodes = conjunction
        .iter()
        .map(|e| translate_expression(e, translator))
        .collect::<RowguardResult<Vec<_>>>()?;
    Ok(combine(nodes, |nodes| translator.and(nodes)))
}

/// Translate one expression, applying its negation through the backend.
pub fn translate_expression<T: Translator>(
    expr: &Expr,
    translator: &T,
) -> RowguardResult<T::Output> {
    let node = match &expr.body {
        ExprBody::Call { operands, .. } if operands.len() == 2 => {
            translate_comparison(expr, translator)?
        }
        ExprBody::Call { operator, operands } => {
            return Err(RowguardError::unsupported(format!(
                "'{}' with {} operand(s) in [{expr}]: expected a two-operand comparison",
                operator.name(),
                operands.len()
            )))
        }
        ExprBody::Term(_) => {
            return Err(RowguardError::unsupported(format!(
                "bare term [{expr}] cannot be expressed as a comparison"
            )))
        }
    };

    Ok(if expr.negated {
        translator.negate(node)
    } else {
        node
    })
}

fn translate_comparison<T: Translator>(
    expr: &Expr,
    translator: &T,
) -> RowguardResult<T::Output> {
    let (reference, value, op) = comparison_parts(expr).ok_or_else(|| {
        RowguardError::unsupported(format!(
            "invalid operation format: expected \"op(Ref, Value)\", got [{expr}]"
        ))
    })?;

    if op.is_internal() || !op.is_comparison() {
        return Err(RowguardError::unsupported(format!(
            "operator '{}' in [{expr}]",
            op.name()
        )));
    }

    let value: Value = value.to_value()?;

    if reference.is_ground() {
        translator.comparison(op, reference, &value)
    } else {
        // `input.list[_] = v` means "some element of input.list equals v".
        translator.comparison(&Operator::In, &reference.ground_prefix(), &value)
    }
}

/// Split a two-operand call into its single reference, its other operand,
/// and its operator. `None` unless exactly one operand is a reference.
pub fn comparison_parts(expr: &Expr) -> Option<(&Reference, &Term, &Operator)> {
    let ExprBody::Call { operator, operands } = &expr.body else {
        return None;
    };
    match operands.as_slice() {
        [Term::Ref(_), Term::Ref(_)] => None,
        [Term::Ref(r), other] | [other, Term::Ref(r)] => Some((r, other, operator)),
        _ => None,
    }
}

fn combine<E>(mut nodes: Vec<E>, join: impl FnOnce(Vec<E>) -> E) -> E {
    if nodes.len() == 1 {
        if let Some(node) = nodes.pop() {
            return node;
        }
    }
    join(nodes)
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use rowguard_contracts::{
        error::{RowguardError, RowguardResult},
        formula::{Conjunction, Expr, PartialFormula, RefSegment, Reference, Term},
        operator::Operator,
    };

    use crate::{
        debug::{DebugExpr, DebugTranslator},
        traits::Translator,
    };

    use super::{translate, Compiled};

    fn single(op: Operator, value: Value) -> Expr {
        Expr::compare(Reference::from_path("input.single"), op, value)
    }

    fn list_contains(value: &str) -> Expr {
        let mut r = Reference::from_path("input.list");
        r.path.push(RefSegment::Var("_".to_string()));
        Expr::compare(r, Operator::Eq, json!(value))
    }

    fn formula(conjunctions: Vec<Vec<Expr>>) -> PartialFormula {
        PartialFormula::new(conjunctions.into_iter().map(Conjunction::new).collect())
    }

    fn render(f: &PartialFormula) -> RowguardResult<String> {
        DebugTranslator::new().render(f)
    }

    fn expect_unsupported(f: &PartialFormula) {
        match translate(f, &DebugTranslator::new()) {
            Err(RowguardError::UnsupportedOperation { .. }) => {}
            other => panic!("expected UnsupportedOperation, got {:?}", other),
        }
    }

    /// A backend whose comparisons always fail, like an unknown column.
    struct RejectingTranslator;

    impl Translator for RejectingTranslator {
        type Output = ();

        fn negate(&self, _node: ()) {}
        fn and(&self, _nodes: Vec<()>) {}
        fn or(&self, _nodes: Vec<()>) {}

        fn comparison(&self, _op: &Operator, reference: &Reference, _value: &Value) -> RowguardResult<()> {
            Err(RowguardError::FieldResolution {
                reference: reference.to_string(),
                reason: "no such field".to_string(),
            })
        }
    }

    // ── Grant / deny ─────────────────────────────────────────────────────────

    #[test]
    fn empty_formula_fails_with_queries_not_resolved() {
        let result = translate(&PartialFormula::denied(), &DebugTranslator::new());
        assert!(matches!(result, Err(RowguardError::QueriesNotResolved)));
    }

    #[test]
    fn empty_conjunction_is_unrestricted() {
        let result = translate(&PartialFormula::unconditional(), &DebugTranslator::new()).unwrap();
        assert!(result.is_unrestricted());
        assert_eq!(render(&PartialFormula::unconditional()).unwrap(), "TRUE");
    }

    #[test]
    fn contradictions_only_deny() {
        let f = formula(vec![vec![
            single(Operator::Eq, json!("a")),
            single(Operator::Eq, json!("b")),
        ]]);
        let result = translate(&f, &DebugTranslator::new());
        assert!(matches!(result, Err(RowguardError::QueriesNotResolved)));
    }

    // ── Shapes ───────────────────────────────────────────────────────────────

    #[test]
    fn single_expression_is_not_wrapped() {
        let f = formula(vec![vec![single(Operator::Eq, json!("target"))]]);
        assert_eq!(render(&f).unwrap(), r#"input.single = "target""#);
    }

    #[test]
    fn conjunctions_become_or_of_and() {
        let f = formula(vec![
            vec![single(Operator::Eq, json!("target")), list_contains("target")],
            vec![single(Operator::Neq, json!("other"))],
        ]);
        assert_eq!(
            render(&f).unwrap(),
            r#"((input.single = "target" AND input.list in "target") OR input.single != "other")"#
        );
    }

    #[test]
    fn value_on_the_left_is_accepted() {
        let f = formula(vec![vec![Expr::call(
            Operator::Eq,
            vec![Term::string("target"), Term::Ref(Reference::from_path("input.single"))],
        )]]);
        assert_eq!(render(&f).unwrap(), r#"input.single = "target""#);
    }

    #[test]
    fn non_ground_reference_becomes_membership() {
        let f = formula(vec![vec![list_contains("target")]]);
        let compiled = translate(&f, &DebugTranslator::new()).unwrap();
        assert_eq!(
            compiled.into_predicate(),
            Some(DebugExpr::Comparison {
                reference: "input.list".to_string(),
                op: Operator::In,
                value: json!("target"),
            })
        );
    }

    #[test]
    fn nested_collections_are_passed_as_values() {
        let f = formula(vec![vec![Expr::call(
            Operator::Eq,
            vec![
                Term::Ref(Reference::from_path("input.single")),
                Term::Object(vec![(
                    Term::string("foo"),
                    Term::Array(vec![Term::string("a"), Term::Scalar(json!(1))]),
                )]),
            ],
        )]]);
        assert_eq!(render(&f).unwrap(), r#"input.single = {"foo":["a",1]}"#);
    }

    // ── Negation ─────────────────────────────────────────────────────────────

    #[test]
    fn negated_expressions_flip_operators() {
        let f = formula(vec![vec![
            single(Operator::Eq, json!("target")).negate(),
            list_contains("target").negate(),
            single(Operator::Lt, json!(5)).negate(),
        ]]);
        assert_eq!(
            render(&f).unwrap(),
            r#"(input.single != "target" AND input.list not in "target" AND input.single >= 5)"#
        );
    }

    #[test]
    fn negation_matches_complement_for_every_operator() {
        let t = DebugTranslator::new();
        for op in [
            Operator::Eq,
            Operator::Equal,
            Operator::Neq,
            Operator::Lt,
            Operator::Lte,
            Operator::Gt,
            Operator::Gte,
        ] {
            let complement = op.complement().unwrap();
            let negated = formula(vec![vec![single(op.clone(), json!(5)).negate()]]);
            let direct = formula(vec![vec![single(complement, json!(5))]]);
            assert_eq!(
                translate(&negated, &t).unwrap(),
                translate(&direct, &t).unwrap(),
                "not ({op:?}) must translate like its complement"
            );
        }

        let negated = formula(vec![vec![list_contains("target").negate()]]);
        let direct = t
            .comparison(&Operator::NotIn, &Reference::from_path("input.list"), &json!("target"))
            .unwrap();
        assert_eq!(translate(&negated, &t).unwrap(), Compiled::Predicate(direct));
    }

    #[test]
    fn double_negation_restores_the_original() {
        let t = DebugTranslator::new();
        for op in [Operator::Neq, Operator::Lte, Operator::Gt] {
            let original = translate(&formula(vec![vec![single(op.clone(), json!(1))]]), &t)
                .unwrap()
                .into_predicate()
                .unwrap();
            assert_eq!(t.negate(t.negate(original.clone())), original, "{op:?}");
        }
    }

    // ── Duplication ──────────────────────────────────────────────────────────

    #[test]
    fn duplicated_formula_translates_identically() {
        let conjunctions = vec![
            vec![single(Operator::Eq, json!("target")), list_contains("target")],
            vec![single(Operator::Gte, json!(3)).negate()],
        ];
        let duplicated: Vec<Vec<Expr>> = conjunctions
            .iter()
            .flat_map(|c| {
                let doubled: Vec<Expr> = c.iter().flat_map(|e| [e.clone(), e.clone()]).collect();
                [doubled.clone(), doubled]
            })
            .collect();

        let t = DebugTranslator::new();
        assert_eq!(
            translate(&formula(duplicated), &t).unwrap(),
            translate(&formula(conjunctions), &t).unwrap()
        );
    }

    // ── Fail-closed shapes ───────────────────────────────────────────────────

    #[test]
    fn bare_term_is_unsupported() {
        let f = formula(vec![vec![Expr::term(Term::Ref(Reference::from_path("input.flag")))]]);
        expect_unsupported(&f);
    }

    #[test]
    fn wrong_arity_is_unsupported() {
        let f = formula(vec![vec![Expr::call(
            Operator::Other("substring".to_string()),
            vec![
                Term::Ref(Reference::from_path("input.single")),
                Term::Scalar(json!(2)),
                Term::Scalar(json!(3)),
            ],
        )]]);
        expect_unsupported(&f);
    }

    #[test]
    fn two_references_are_unsupported() {
        let f = formula(vec![vec![Expr::call(
            Operator::Eq,
            vec![
                Term::Ref(Reference::from_path("input.single")),
                Term::Ref(Reference::from_path("data.partial.default")),
            ],
        )]]);
        expect_unsupported(&f);
    }

    #[test]
    fn two_values_are_unsupported() {
        let f = formula(vec![vec![Expr::call(
            Operator::Eq,
            vec![Term::string("a"), Term::string("a")],
        )]]);
        expect_unsupported(&f);
    }

    #[test]
    fn internal_operator_is_unsupported() {
        let f = formula(vec![vec![Expr::call(
            Operator::from_name("internal.member_2"),
            vec![Term::Ref(Reference::from_path("input.single")), Term::string("a")],
        )]]);
        expect_unsupported(&f);
    }

    #[test]
    fn engine_cannot_name_synthetic_membership() {
        for name in ["internal.in", "internal.not_in"] {
            let f = formula(vec![vec![Expr::call(
                Operator::from_name(name),
                vec![Term::Ref(Reference::from_path("input.list")), Term::string("a")],
            )]]);
            expect_unsupported(&f);
        }
    }

    #[test]
    fn builtin_call_is_unsupported() {
        let f = formula(vec![vec![Expr::call(
            Operator::Other("startswith".to_string()),
            vec![Term::Ref(Reference::from_path("input.single")), Term::string("a")],
        )]]);
        expect_unsupported(&f);
    }

    #[test]
    fn unresolvable_value_is_unsupported() {
        let f = formula(vec![vec![Expr::call(
            Operator::Eq,
            vec![
                Term::Ref(Reference::from_path("input.single")),
                Term::Call(Operator::Other("data.test.call".to_string()), vec![]),
            ],
        )]]);
        expect_unsupported(&f);
    }

    #[test]
    fn one_bad_branch_fails_the_whole_formula() {
        let f = formula(vec![
            vec![single(Operator::Eq, json!("target"))],
            vec![Expr::term(Term::Ref(Reference::from_path("input.flag")))],
        ]);
        expect_unsupported(&f);
    }

    #[test]
    fn backend_errors_propagate() {
        let f = formula(vec![vec![single(Operator::Eq, json!("target"))]]);
        let result = translate(&f, &RejectingTranslator);
        assert!(matches!(result, Err(RowguardError::FieldResolution { .. })));
    }

    #[test]
    fn unrestricted_never_reaches_the_backend() {
        let result = translate(&PartialFormula::unconditional(), &RejectingTranslator).unwrap();
        assert_eq!(result, Compiled::Unrestricted);
    }
}
