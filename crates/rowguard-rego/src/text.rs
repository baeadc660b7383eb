//! Compact text syntax for partial-evaluation expressions.
//!
//! Used by the TOML engine's rule files and by tests. One expression is
//!
//! ```text
//! [not] term                  e.g. input.flag
//! [not] term op term          e.g. input.list[_] = "target"
//! [not] name(term, ...)       e.g. internal.member_2("a", input.list)
//! ```
//!
//! where `op` is one of `= == != < <= > >=` and a term is a JSON literal,
//! an array `[..]`, an object `{k: v, ..}`, a set `{a, b}` or `set()`, a call,
//! a reference (`input.map["map-key"][_]`) or a bare variable. Conjunctions
//! separate expressions with `;`.

use pest::iterators::{Pair, Pairs};
use pest::Parser;
use pest_derive::Parser;
use serde_json::{Number, Value};

use rowguard_contracts::{
    error::{RowguardError, RowguardResult},
    formula::{Conjunction, Expr, ExprBody, PartialFormula, RefSegment, Reference, Term},
    operator::Operator,
};

/// Heads that always denote a document reference, even without a path.
const ROOT_DOCUMENTS: [&str; 2] = ["input", "data"];

#[derive(Parser)]
#[grammar = "text.pest"]
struct ExprParser;

fn parse_rule(rule: Rule, text: &str) -> RowguardResult<Pair<'_, Rule>> {
    ExprParser::parse(rule, text)
        .map_err(|e| {
            RowguardError::parse(format!("invalid expression [{text}]: {}", e.variant.message()))
        })?
        .next()
        .ok_or_else(|| RowguardError::parse(format!("nothing parsed from [{text}]")))
}

fn child<'i>(pairs: &mut Pairs<'i, Rule>, what: &str) -> RowguardResult<Pair<'i, Rule>> {
    pairs
        .next()
        .ok_or_else(|| RowguardError::parse(format!("expected {what}")))
}

fn build_expr(pair: Pair<'_, Rule>) -> RowguardResult<Expr> {
    let mut negated = false;
    let mut body = None;
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::negation => negated = true,
            Rule::body => body = Some(inner),
            _ => {}
        }
    }
    let mut parts = body
        .ok_or_else(|| RowguardError::parse("expression has no body"))?
        .into_inner();

    let lhs = build_term(child(&mut parts, "a term")?)?;
    let body = match parts.next() {
        Some(symbol) => {
            let operator = Operator::from_symbol(symbol.as_str()).ok_or_else(|| {
                RowguardError::parse(format!("unknown operator '{}'", symbol.as_str()))
            })?;
            let rhs = build_term(child(&mut parts, "a term after the operator")?)?;
            ExprBody::Call {
                operator,
                operands: vec![lhs, rhs],
            }
        }
        None => match lhs {
            Term::Call(operator, operands) => ExprBody::Call { operator, operands },
            term => ExprBody::Term(term),
        },
    };
    Ok(Expr { negated, body })
}

fn build_term(pair: Pair<'_, Rule>) -> RowguardResult<Term> {
    match pair.as_rule() {
        Rule::string => Ok(Term::Scalar(Value::String(decode_string(pair.as_str())?))),
        Rule::number => Ok(Term::Scalar(Value::Number(decode_number(pair.as_str())?))),
        Rule::boolean => Ok(Term::Scalar(Value::Bool(pair.as_str() == "true"))),
        Rule::null => Ok(Term::Scalar(Value::Null)),
        Rule::array => Ok(Term::Array(build_terms(pair.into_inner())?)),
        Rule::set => Ok(Term::Set(build_terms(pair.into_inner())?)),
        Rule::object => pair
            .into_inner()
            .map(|entry| {
                let mut kv = entry.into_inner();
                let key = build_term(child(&mut kv, "an object key")?)?;
                let value = build_term(child(&mut kv, "an object value")?)?;
                Ok((key, value))
            })
            .collect::<RowguardResult<Vec<_>>>()
            .map(Term::Object),
        Rule::call => build_call(pair),
        Rule::reference => build_reference(pair),
        other => Err(RowguardError::parse(format!(
            "expected a term, found {other:?} '{}'",
            pair.as_str()
        ))),
    }
}

fn build_terms(pairs: Pairs<'_, Rule>) -> RowguardResult<Vec<Term>> {
    pairs.map(build_term).collect()
}

fn build_call(pair: Pair<'_, Rule>) -> RowguardResult<Term> {
    let mut inner = pair.into_inner();
    let name = child(&mut inner, "a function name")?.as_str().to_string();
    let args = build_terms(inner)?;
    if name == "set" && args.is_empty() {
        return Ok(Term::Set(Vec::new()));
    }
    Ok(Term::Call(Operator::from_name(&name), args))
}

fn build_reference(pair: Pair<'_, Rule>) -> RowguardResult<Term> {
    let mut inner = pair.into_inner();
    let head = child(&mut inner, "a reference head")?.as_str().to_string();
    let path = inner.map(build_segment).collect::<RowguardResult<Vec<_>>>()?;

    if path.is_empty() && !ROOT_DOCUMENTS.contains(&head.as_str()) {
        return Ok(Term::Var(head));
    }
    Ok(Term::Ref(Reference::new(head, path)))
}

fn build_segment(pair: Pair<'_, Rule>) -> RowguardResult<RefSegment> {
    let rule = pair.as_rule();
    let inner = child(&mut pair.into_inner(), "a reference segment")?;
    let segment = match (rule, inner.as_rule()) {
        (Rule::key_segment, _) => RefSegment::Key(inner.as_str().to_string()),
        (_, Rule::string) => RefSegment::Key(decode_string(inner.as_str())?),
        (_, Rule::ident) => RefSegment::Var(inner.as_str().to_string()),
        (_, Rule::number) => {
            let n = decode_number(inner.as_str())?;
            n.as_i64().map(RefSegment::Index).ok_or_else(|| {
                RowguardError::parse(format!("reference index {n} is not an integer"))
            })?
        }
        (_, other) => {
            return Err(RowguardError::parse(format!(
                "unsupported reference segment {other:?}"
            )))
        }
    };
    Ok(segment)
}

/// String literals use JSON escapes.
fn decode_string(literal: &str) -> RowguardResult<String> {
    serde_json::from_str(literal)
        .map_err(|e| RowguardError::parse(format!("invalid string {literal}: {e}")))
}

fn decode_number(literal: &str) -> RowguardResult<Number> {
    literal
        .parse::<Number>()
        .map_err(|e| RowguardError::parse(format!("invalid number {literal}: {e}")))
}

/// Parse a single expression. Trailing input is an error.
pub fn parse_expr(text: &str) -> RowguardResult<Expr> {
    let mut inner = parse_rule(Rule::expr_text, text)?.into_inner();
    build_expr(child(&mut inner, "an expression")?)
}

/// Parse `;`-separated expressions. Blank text is the empty (always true) conjunction.
pub fn parse_conjunction(text: &str) -> RowguardResult<Conjunction> {
    parse_rule(Rule::conjunction, text)?
        .into_inner()
        .filter(|pair| pair.as_rule() == Rule::expr)
        .map(build_expr)
        .collect::<RowguardResult<Vec<_>>>()
        .map(Conjunction::new)
}

/// Parse a formula given as conjunctions of expression strings.
pub fn parse_formula<Q, E>(queries: Q) -> RowguardResult<PartialFormula>
where
    Q: IntoIterator,
    Q::Item: IntoIterator<Item = E>,
    E: AsRef<str>,
{
    queries
        .into_iter()
        .map(|query| {
            query
                .into_iter()
                .map(|e| parse_expr(e.as_ref()))
                .collect::<RowguardResult<Vec<_>>>()
                .map(Conjunction::new)
        })
        .collect::<RowguardResult<Vec<_>>>()
        .map(PartialFormula::new)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use rowguard_contracts::{
        error::RowguardError,
        formula::{ExprBody, RefSegment, Reference, Term},
        operator::Operator,
    };

    use super::{parse_conjunction, parse_expr, parse_formula};

    fn operands(text: &str) -> Vec<Term> {
        parse_expr(text).unwrap().operands().to_vec()
    }

    // ── Comparisons ──────────────────────────────────────────────────────────

    #[test]
    fn parses_equality_against_string() {
        let e = parse_expr(r#"input.single = "target""#).unwrap();
        assert!(!e.negated);
        assert_eq!(e.operator(), Some(&Operator::Eq));
        assert_eq!(
            e.operands(),
            &[
                Term::Ref(Reference::from_path("input.single")),
                Term::string("target")
            ]
        );
    }

    #[test]
    fn parses_every_comparison_symbol() {
        for (symbol, op) in [
            ("=", Operator::Eq),
            ("==", Operator::Equal),
            ("!=", Operator::Neq),
            ("<", Operator::Lt),
            ("<=", Operator::Lte),
            (">", Operator::Gt),
            (">=", Operator::Gte),
        ] {
            let e = parse_expr(&format!("input.single {symbol} 0")).unwrap();
            assert_eq!(e.operator(), Some(&op), "symbol {symbol}");
        }
    }

    #[test]
    fn parses_negation() {
        let e = parse_expr(r#"not input.single = "target""#).unwrap();
        assert!(e.negated);
        assert_eq!(e.to_string(), r#"not input.single = "target""#);
    }

    #[test]
    fn parses_bracketed_keys_and_variables() {
        let ops = operands(r#"input.map_list["map-key"][_] = "target""#);
        assert_eq!(
            ops[0],
            Term::Ref(Reference::new(
                "input",
                vec![
                    RefSegment::Key("map_list".to_string()),
                    RefSegment::Key("map-key".to_string()),
                    RefSegment::Var("_".to_string()),
                ]
            ))
        );
        let ops = operands("input.list[0] = 1");
        assert_eq!(
            ops[0],
            Term::Ref(Reference::new(
                "input",
                vec![RefSegment::Key("list".to_string()), RefSegment::Index(0)]
            ))
        );
    }

    #[test]
    fn parses_literals_and_collections() {
        assert_eq!(operands("input.a = -1.5")[1], Term::Scalar(json!(-1.5)));
        assert_eq!(operands("input.a = true")[1], Term::Scalar(json!(true)));
        assert_eq!(operands("input.a = null")[1], Term::Scalar(json!(null)));
        assert_eq!(
            operands(r#"input.a = {"foo": ["a", 1]}"#)[1].to_value().unwrap(),
            json!({"foo": ["a", 1]})
        );
        assert_eq!(
            operands(r#"input.a = {"x", "y"}"#)[1],
            Term::Set(vec![Term::string("x"), Term::string("y")])
        );
        assert_eq!(operands("input.a = set()")[1], Term::Set(vec![]));
        assert_eq!(operands("input.a = x")[1], Term::Var("x".to_string()));
    }

    #[test]
    fn string_escapes_are_decoded() {
        assert_eq!(
            operands(r#"input.a = "say \"hi\"""#)[1],
            Term::string(r#"say "hi""#)
        );
    }

    #[test]
    fn keyword_prefixes_stay_identifiers() {
        let e = parse_expr("not notable = nullable").unwrap();
        assert!(e.negated);
        assert_eq!(
            e.operands(),
            &[Term::Var("notable".to_string()), Term::Var("nullable".to_string())]
        );
        assert!(!parse_expr("notable = 1").unwrap().negated);
    }

    #[test]
    fn compact_json_without_spaces() {
        assert_eq!(
            operands(r#"input.a={"k":[1,2.5e3],"n":null}"#)[1].to_value().unwrap(),
            json!({"k": [1, 2500.0], "n": null})
        );
    }

    // ── Calls and bare terms ─────────────────────────────────────────────────

    #[test]
    fn parses_dotted_function_call() {
        let e = parse_expr(r#"internal.member_2("a", input.list)"#).unwrap();
        assert!(e.operator().unwrap().is_internal());
        assert_eq!(e.operands().len(), 2);
    }

    #[test]
    fn call_on_one_side_of_comparison_stays_a_term() {
        let e = parse_expr("count(input.list) > 3").unwrap();
        assert_eq!(e.operator(), Some(&Operator::Gt));
        assert!(matches!(e.operands()[0], Term::Call(..)));
    }

    #[test]
    fn bare_reference_is_a_term_expression() {
        let e = parse_expr("input.flag").unwrap();
        assert!(matches!(e.body, ExprBody::Term(Term::Ref(_))));
    }

    // ── Conjunctions / formulas ──────────────────────────────────────────────

    #[test]
    fn conjunction_splits_on_semicolons() {
        let c = parse_conjunction(r#"input.a = 1; not input.b = "x""#).unwrap();
        assert_eq!(c.len(), 2);
        assert!(c.0[1].negated);
        assert!(parse_conjunction("   ").unwrap().is_empty());
    }

    #[test]
    fn display_output_parses_back() {
        let text = r#"not input.map["map-key"][_] != {"a": [1, 2]}"#;
        let e = parse_expr(text).unwrap();
        assert_eq!(parse_expr(&e.to_string()).unwrap(), e);
    }

    #[test]
    fn formula_from_nested_lists() {
        let f = parse_formula(vec![vec!["input.a = 1", "input.b = 2"], vec![]]).unwrap();
        assert_eq!(f.conjunctions().len(), 2);
        assert!(f.is_unconditional());

        let denied = parse_formula(Vec::<Vec<&str>>::new()).unwrap();
        assert!(denied.is_denied());
    }

    // ── Errors ───────────────────────────────────────────────────────────────

    #[test]
    fn malformed_text_is_a_parse_error() {
        for text in [
            "input.a = ",
            r#"input.a = "open"#,
            "input.a = 1 2",
            "input.a[",
            "input.a = #",
            "input.list[_](1)",
        ] {
            assert!(
                matches!(parse_expr(text), Err(RowguardError::ParseError { .. })),
                "expected a parse error for [{text}]"
            );
        }
    }
}
