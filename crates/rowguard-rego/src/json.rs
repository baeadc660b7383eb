//! Decoder for the policy engine's compile (partial evaluation) response.
//!
//! Accepted documents:
//!
//! ```text
//! {"result": {"queries": [[expr, ...], ...]}}
//! {"queries": [[expr, ...], ...]}
//! [[expr, ...], ...]
//! ```
//!
//! A missing `result` or missing `queries` means nothing can satisfy the
//! policy and decodes to the denied (empty) formula. An empty query inside
//! `queries` is an unconditional grant. Each expression is
//! `{"index": n, "negated": bool, "terms": ...}` where `terms` is either an
//! operator call (`[operator_ref, operand, ...]`) or a single term.

use serde::Deserialize;
use serde_json::{Number, Value};
use tracing::debug;

use rowguard_contracts::{
    error::{RowguardError, RowguardResult},
    formula::{Conjunction, Expr, ExprBody, PartialFormula, RefSegment, Reference, Term},
    operator::Operator,
};

#[derive(Debug, Deserialize)]
struct RawExpr {
    #[serde(default)]
    index: usize,
    #[serde(default)]
    negated: bool,
    terms: RawTerms,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawTerms {
    Call(Vec<RawTerm>),
    Single(RawTerm),
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
enum RawTerm {
    Null,
    Boolean(bool),
    Number(Number),
    String(String),
    Var(String),
    Ref(Vec<RawTerm>),
    Array(Vec<RawTerm>),
    Set(Vec<RawTerm>),
    Object(Vec<(RawTerm, RawTerm)>),
    Call(Vec<RawTerm>),
}

/// Decode a compile response from text.
pub fn parse_compile_response(text: &str) -> RowguardResult<PartialFormula> {
    let doc: Value = serde_json::from_str(text)
        .map_err(|e| RowguardError::parse(format!("compile response is not valid JSON: {e}")))?;
    parse_compile_value(&doc)
}

/// Decode an already-parsed compile response.
pub fn parse_compile_value(doc: &Value) -> RowguardResult<PartialFormula> {
    let queries = match doc {
        Value::Array(_) => Some(doc),
        Value::Object(map) => match map.get("result") {
            Some(Value::Object(result)) => result.get("queries"),
            Some(Value::Null) | None => map.get("queries"),
            Some(other) => {
                return Err(RowguardError::parse(format!(
                    "'result' must be an object, got {other}"
                )))
            }
        },
        other => {
            return Err(RowguardError::parse(format!(
                "compile response must be an object or an array, got {other}"
            )))
        }
    };

    let Some(queries) = queries.filter(|q| !q.is_null()) else {
        debug!("compile response has no queries, policy cannot be satisfied");
        return Ok(PartialFormula::denied());
    };

    let raw: Vec<Vec<RawExpr>> = Vec::<Vec<RawExpr>>::deserialize(queries)
        .map_err(|e| RowguardError::parse(format!("malformed queries: {e}")))?;

    let conjunctions = raw
        .into_iter()
        .map(decode_query)
        .collect::<RowguardResult<Vec<_>>>()?;

    debug!(queries = conjunctions.len(), "compile response decoded");
    Ok(PartialFormula::new(conjunctions))
}

fn decode_query(mut exprs: Vec<RawExpr>) -> RowguardResult<Conjunction> {
    exprs.sort_by_key(|e| e.index);
    exprs
        .into_iter()
        .map(decode_expr)
        .collect::<RowguardResult<Vec<_>>>()
        .map(Conjunction::new)
}

fn decode_expr(raw: RawExpr) -> RowguardResult<Expr> {
    let body = match raw.terms {
        RawTerms::Single(term) => ExprBody::Term(decode_term(term)?),
        RawTerms::Call(terms) => {
            let mut terms = terms.into_iter();
            let operator = match terms.next() {
                Some(op) => decode_operator(op)?,
                None => return Err(RowguardError::parse("expression has no terms")),
            };
            let operands = terms.map(decode_term).collect::<RowguardResult<Vec<_>>>()?;
            ExprBody::Call { operator, operands }
        }
    };
    Ok(Expr {
        negated: raw.negated,
        body,
    })
}

/// Operators are references like `eq` or `internal.member_2`.
fn decode_operator(term: RawTerm) -> RowguardResult<Operator> {
    let parts = match term {
        RawTerm::Ref(parts) => parts,
        other => {
            return Err(RowguardError::parse(format!(
                "operator must be a reference, got {other:?}"
            )))
        }
    };
    let names = parts
        .into_iter()
        .map(|part| match part {
            RawTerm::Var(s) | RawTerm::String(s) => Ok(s),
            other => Err(RowguardError::parse(format!(
                "unexpected operator segment {other:?}"
            ))),
        })
        .collect::<RowguardResult<Vec<_>>>()?;
    if names.is_empty() {
        return Err(RowguardError::parse("operator reference is empty"));
    }
    Ok(Operator::from_name(&names.join(".")))
}

fn decode_term(term: RawTerm) -> RowguardResult<Term> {
    Ok(match term {
        RawTerm::Null => Term::Scalar(Value::Null),
        RawTerm::Boolean(b) => Term::Scalar(Value::Bool(b)),
        RawTerm::Number(n) => Term::Scalar(Value::Number(n)),
        RawTerm::String(s) => Term::Scalar(Value::String(s)),
        RawTerm::Var(v) => Term::Var(v),
        RawTerm::Ref(parts) => Term::Ref(decode_ref(parts)?),
        RawTerm::Array(items) => Term::Array(decode_terms(items)?),
        RawTerm::Set(items) => Term::Set(decode_terms(items)?),
        RawTerm::Object(pairs) => Term::Object(
            pairs
                .into_iter()
                .map(|(k, v)| Ok((decode_term(k)?, decode_term(v)?)))
                .collect::<RowguardResult<Vec<_>>>()?,
        ),
        RawTerm::Call(parts) => {
            let mut parts = parts.into_iter();
            let operator = match parts.next() {
                Some(op) => decode_operator(op)?,
                None => return Err(RowguardError::parse("call has no operator")),
            };
            Term::Call(operator, decode_terms(parts.collect())?)
        }
    })
}

fn decode_terms(items: Vec<RawTerm>) -> RowguardResult<Vec<Term>> {
    items.into_iter().map(decode_term).collect()
}

fn decode_ref(parts: Vec<RawTerm>) -> RowguardResult<Reference> {
    let mut parts = parts.into_iter();
    let head = match parts.next() {
        Some(RawTerm::Var(head)) => head,
        Some(other) => {
            return Err(RowguardError::parse(format!(
                "reference must start with a variable, got {other:?}"
            )))
        }
        None => return Err(RowguardError::parse("reference is empty")),
    };
    let path = parts
        .map(|part| match part {
            RawTerm::String(s) => Ok(RefSegment::Key(s)),
            RawTerm::Var(v) => Ok(RefSegment::Var(v)),
            RawTerm::Number(n) => n.as_i64().map(RefSegment::Index).ok_or_else(|| {
                RowguardError::parse(format!("reference index {n} is not an integer"))
            }),
            other => Err(RowguardError::parse(format!(
                "unsupported reference segment {other:?}"
            ))),
        })
        .collect::<RowguardResult<Vec<_>>>()?;
    Ok(Reference::new(head, path))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use rowguard_contracts::{
        error::RowguardError,
        formula::{ExprBody, RefSegment, Term},
        operator::Operator,
    };

    use super::{parse_compile_response, parse_compile_value};

    fn var(v: &str) -> serde_json::Value {
        json!({"type": "var", "value": v})
    }

    fn string(v: &str) -> serde_json::Value {
        json!({"type": "string", "value": v})
    }

    fn input_ref(path: &[serde_json::Value]) -> serde_json::Value {
        let mut parts = vec![var("input")];
        parts.extend(path.iter().cloned());
        json!({"type": "ref", "value": parts})
    }

    fn eq_expr(index: usize, lhs: serde_json::Value, rhs: serde_json::Value) -> serde_json::Value {
        json!({
            "index": index,
            "terms": [{"type": "ref", "value": [var("eq")]}, lhs, rhs]
        })
    }

    // ── Degenerate responses ─────────────────────────────────────────────────

    #[test]
    fn missing_result_is_denied() {
        assert!(parse_compile_response("{}").unwrap().is_denied());
        assert!(parse_compile_response(r#"{"result": {}}"#).unwrap().is_denied());
        assert!(parse_compile_response(r#"{"result": null}"#).unwrap().is_denied());
    }

    #[test]
    fn empty_query_is_unconditional() {
        let f = parse_compile_response(r#"{"result": {"queries": [[]]}}"#).unwrap();
        assert!(f.is_unconditional());
    }

    #[test]
    fn empty_queries_list_is_denied_not_granted() {
        let f = parse_compile_response(r#"{"result": {"queries": []}}"#).unwrap();
        assert!(f.is_denied());
        assert!(!f.is_unconditional());
    }

    // ── Expressions ──────────────────────────────────────────────────────────

    #[test]
    fn decodes_equality_with_ground_and_variable_refs() {
        let doc = json!({"result": {"queries": [[
            eq_expr(1, input_ref(&[string("list"), var("$01")]), string("target")),
            eq_expr(0, input_ref(&[string("single")]), string("target")),
        ]]}});
        let f = parse_compile_value(&doc).unwrap();
        let exprs = &f.conjunctions()[0].0;
        assert_eq!(exprs[0].to_string(), r#"input.single = "target""#);
        assert_eq!(exprs[1].to_string(), r#"input.list[$01] = "target""#);
        assert_eq!(
            exprs[1].operands()[0],
            Term::Ref(rowguard_contracts::formula::Reference::new(
                "input",
                vec![
                    RefSegment::Key("list".to_string()),
                    RefSegment::Var("$01".to_string())
                ]
            ))
        );
    }

    #[test]
    fn decodes_negation_and_dotted_operators() {
        let doc = json!([[{
            "index": 0,
            "negated": true,
            "terms": [
                {"type": "ref", "value": [var("internal"), string("member_2")]},
                string("a"),
                input_ref(&[string("list")])
            ]
        }]]);
        let f = parse_compile_value(&doc).unwrap();
        let expr = &f.conjunctions()[0].0[0];
        assert!(expr.negated);
        assert_eq!(expr.operator(), Some(&Operator::Other("internal.member_2".to_string())));
        assert!(expr.operator().unwrap().is_internal());
    }

    #[test]
    fn decodes_collections_and_calls() {
        let doc = json!({"queries": [[eq_expr(
            0,
            input_ref(&[string("single")]),
            json!({"type": "object", "value": [[
                string("foo"),
                {"type": "array", "value": [string("a"), {"type": "number", "value": 1}]}
            ]]})
        ), {
            "index": 1,
            "terms": {"type": "call", "value": [
                {"type": "ref", "value": [var("data"), string("test"), string("call")]}
            ]}
        }]]});
        let f = parse_compile_value(&doc).unwrap();
        let exprs = &f.conjunctions()[0].0;
        assert_eq!(exprs[0].operands()[1].to_value().unwrap(), json!({"foo": ["a", 1]}));
        match &exprs[1].body {
            ExprBody::Term(Term::Call(op, args)) => {
                assert_eq!(op.name(), "data.test.call");
                assert!(args.is_empty());
            }
            other => panic!("expected a bare call term, got {:?}", other),
        }
    }

    #[test]
    fn decodes_null_and_set_terms() {
        let doc = json!([[eq_expr(
            0,
            input_ref(&[string("single")]),
            json!({"type": "set", "value": [{"type": "null"}, {"type": "boolean", "value": true}]})
        )]]);
        let f = parse_compile_value(&doc).unwrap();
        assert_eq!(f.conjunctions()[0].0[0].operands()[1].to_value().unwrap(), json!([null, true]));
    }

    // ── Errors ───────────────────────────────────────────────────────────────

    #[test]
    fn invalid_json_is_a_parse_error() {
        assert!(matches!(
            parse_compile_response("{not json"),
            Err(RowguardError::ParseError { .. })
        ));
    }

    #[test]
    fn unknown_term_type_is_a_parse_error() {
        let doc = json!([[eq_expr(0, input_ref(&[string("x")]), json!({"type": "closure", "value": 1}))]]);
        assert!(matches!(parse_compile_value(&doc), Err(RowguardError::ParseError { .. })));
    }

    #[test]
    fn reference_must_start_with_variable() {
        let doc = json!([[eq_expr(0, json!({"type": "ref", "value": [string("input")]}), string("x"))]]);
        assert!(matches!(parse_compile_value(&doc), Err(RowguardError::ParseError { .. })));
    }
}
