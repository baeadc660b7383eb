//! SQL predicate backend.
//!
//! `SqlTranslator` implements `Translator` over one model's `Metadata`:
//! references are resolved to qualified columns and policy values are
//! coerced to the column's `FieldType` before they reach the statement.

use std::fmt;

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use rowguard_contracts::{
    error::{RowguardError, RowguardResult},
    formula::{RefSegment, Reference},
    operator::Operator,
};
use rowguard_core::traits::Translator;

use crate::metadata::{FieldType, Metadata, TaggedField};

const RESOURCE_ROOT: &str = "resource";

// ── Values and columns ───────────────────────────────────────────────────────

/// A statement parameter in its column's native type.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Uuid(Uuid),
    UuidArray(Vec<Uuid>),
    TextArray(Vec<String>),
    Timestamp(DateTime<Utc>),
    Json(Value),
}

fn quote_literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

impl fmt::Display for SqlValue {
    /// Inlined literal, for diagnostics only.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => f.write_str("NULL"),
            SqlValue::Text(s) => f.write_str(&quote_literal(s)),
            SqlValue::Integer(i) => write!(f, "{i}"),
            SqlValue::Float(x) => write!(f, "{x}"),
            SqlValue::Boolean(b) => f.write_str(if *b { "TRUE" } else { "FALSE" }),
            SqlValue::Uuid(u) => f.write_str(&quote_literal(&u.to_string())),
            SqlValue::UuidArray(items) => {
                let items: Vec<String> = items.iter().map(|u| quote_literal(&u.to_string())).collect();
                write!(f, "ARRAY[{}]::uuid[]", items.join(", "))
            }
            SqlValue::TextArray(items) => {
                let items: Vec<String> = items.iter().map(|s| quote_literal(s)).collect();
                write!(f, "ARRAY[{}]::text[]", items.join(", "))
            }
            SqlValue::Timestamp(t) => f.write_str(&quote_literal(&t.to_rfc3339())),
            SqlValue::Json(v) => write!(f, "{}::jsonb", quote_literal(&v.to_string())),
        }
    }
}

/// One step into a JSON column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JsonStep {
    Key(String),
    Index(i64),
}

/// A table-qualified column, optionally descending into JSON.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub table: String,
    pub name: String,
    pub json_path: Vec<JsonStep>,
    pub quoted: bool,
}

impl Column {
    fn ident(&self, name: &str) -> String {
        if self.quoted {
            format!("\"{}\"", name.replace('"', "\"\""))
        } else {
            name.to_string()
        }
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.ident(&self.table), self.ident(&self.name))?;
        for step in &self.json_path {
            match step {
                JsonStep::Key(k) => write!(f, " -> {}", quote_literal(k))?,
                JsonStep::Index(i) => write!(f, " -> {i}")?,
            }
        }
        Ok(())
    }
}

// ── Predicate ────────────────────────────────────────────────────────────────

/// A WHERE-clause fragment.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// `column op value`. Equality against `Null` renders `IS [NOT] NULL`.
    Compare {
        column: Column,
        op: Operator,
        value: SqlValue,
    },
    /// `column @> value`: the array or JSON column contains the value.
    Contains { column: Column, value: SqlValue },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
    /// Matches nothing. Attached to denied statements.
    False,
}

fn sql_operator(op: &Operator) -> &str {
    match op {
        Operator::Neq => "<>",
        other => other.symbol(),
    }
}

impl Predicate {
    /// Render with positional parameters (`$1`, `$2`, ...).
    pub fn to_sql(&self) -> (String, Vec<SqlValue>) {
        let mut sql = String::new();
        let mut params = Vec::new();
        self.render(&mut sql, &mut |value: &SqlValue, out: &mut String| {
            params.push(value.clone());
            out.push_str(&format!("${}", params.len()));
        });
        (sql, params)
    }

    fn render<F>(&self, out: &mut String, param: &mut F)
    where
        F: FnMut(&SqlValue, &mut String),
    {
        match self {
            Predicate::Compare { column, op, value: SqlValue::Null } => {
                let test = if matches!(op, Operator::Neq) { "IS NOT NULL" } else { "IS NULL" };
                out.push_str(&format!("{column} {test}"));
            }
            Predicate::Compare { column, op, value } => {
                out.push_str(&format!("{column} {} ", sql_operator(op)));
                param(value, out);
            }
            Predicate::Contains { column, value } => {
                out.push_str(&format!("{column} @> "));
                param(value, out);
            }
            Predicate::And(nodes) | Predicate::Or(nodes) => {
                let joiner = if matches!(self, Predicate::And(_)) { " AND " } else { " OR " };
                out.push('(');
                for (i, node) in nodes.iter().enumerate() {
                    if i > 0 {
                        out.push_str(joiner);
                    }
                    node.render(out, param);
                }
                out.push(')');
            }
            Predicate::Not(inner) => {
                out.push_str("NOT (");
                inner.render(out, param);
                out.push(')');
            }
            Predicate::False => out.push_str("FALSE"),
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        self.render(&mut out, &mut |value: &SqlValue, out: &mut String| {
            out.push_str(&value.to_string());
        });
        f.write_str(&out)
    }
}

// ── Translator ───────────────────────────────────────────────────────────────

/// Translates formulas over `input.resource.*` into predicates on one model.
#[derive(Debug, Clone)]
pub struct SqlTranslator<'m> {
    metadata: &'m Metadata,
    quote_identifiers: bool,
}

impl<'m> SqlTranslator<'m> {
    pub fn new(metadata: &'m Metadata) -> Self {
        Self {
            metadata,
            quote_identifiers: true,
        }
    }

    pub fn quote_identifiers(mut self, quote: bool) -> Self {
        self.quote_identifiers = quote;
        self
    }

    /// Map a ground reference onto a field and the column expression for it.
    pub fn resolve(&self, reference: &Reference) -> RowguardResult<(&'m TaggedField, Column)> {
        let field_error = |reason: String| RowguardError::FieldResolution {
            reference: reference.to_string(),
            reason,
        };

        if reference.head != "input" {
            return Err(field_error("reference must start with 'input.resource'".to_string()));
        }
        let segments = match reference.path.split_first() {
            Some((RefSegment::Key(root), rest)) if root == RESOURCE_ROOT => rest,
            _ => return Err(field_error("reference must start with 'input.resource'".to_string())),
        };

        let keys: Vec<&str> = segments
            .iter()
            .map_while(|s| match s {
                RefSegment::Key(k) => Some(k.as_str()),
                _ => None,
            })
            .collect();

        let (field, used) = (1..=keys.len())
            .rev()
            .find_map(|n| self.metadata.field(&keys[..n].join(".")).map(|f| (f, n)))
            .ok_or_else(|| {
                field_error(format!(
                    "no tagged field of model [{}] matches",
                    self.metadata.model
                ))
            })?;

        let remainder = &segments[used..];
        if !remainder.is_empty() && field.field_type != FieldType::Json {
            return Err(field_error(format!(
                "field '{}' is {} and has no nested attributes",
                field.input_field, field.field_type
            )));
        }
        let json_path = remainder
            .iter()
            .map(|s| match s {
                RefSegment::Key(k) => Ok(JsonStep::Key(k.clone())),
                RefSegment::Index(i) => Ok(JsonStep::Index(*i)),
                RefSegment::Var(v) => Err(field_error(format!("unexpected variable '{v}'"))),
            })
            .collect::<RowguardResult<Vec<_>>>()?;

        Ok((
            field,
            Column {
                table: field.table.clone(),
                name: field.column.clone(),
                json_path,
                quoted: self.quote_identifiers,
            },
        ))
    }
}

impl Translator for SqlTranslator<'_> {
    type Output = Predicate;

    fn negate(&self, node: Predicate) -> Predicate {
        match node {
            Predicate::Compare { column, op, value } => match op.complement() {
                Some(op) => Predicate::Compare { column, op, value },
                None => Predicate::Not(Box::new(Predicate::Compare { column, op, value })),
            },
            Predicate::Not(inner) => *inner,
            other => Predicate::Not(Box::new(other)),
        }
    }

    fn and(&self, nodes: Vec<Predicate>) -> Predicate {
        Predicate::And(nodes)
    }

    fn or(&self, nodes: Vec<Predicate>) -> Predicate {
        Predicate::Or(nodes)
    }

    fn comparison(&self, op: &Operator, reference: &Reference, value: &Value) -> RowguardResult<Predicate> {
        let (field, column) = self.resolve(reference)?;
        // A JSON sub-path compares JSON values whatever the column holds.
        let field_type = if column.json_path.is_empty() {
            field.field_type
        } else {
            FieldType::Json
        };

        match op {
            Operator::In | Operator::NotIn => {
                let value = coerce_member(field, field_type, value)?;
                let contains = Predicate::Contains { column, value };
                Ok(if matches!(op, Operator::NotIn) {
                    Predicate::Not(Box::new(contains))
                } else {
                    contains
                })
            }
            op => {
                let value = coerce(field, field_type, value)?;
                if value == SqlValue::Null && !matches!(op, Operator::Eq | Operator::Equal | Operator::Neq) {
                    return Err(coercion_error(field, field_type, &Value::Null, "null is only comparable for equality"));
                }
                Ok(Predicate::Compare {
                    column,
                    op: op.clone(),
                    value,
                })
            }
        }
    }
}

// ── Coercion ─────────────────────────────────────────────────────────────────

fn value_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn coercion_error(field: &TaggedField, field_type: FieldType, value: &Value, reason: &str) -> RowguardError {
    RowguardError::TypeCoercion {
        field: field.input_field.clone(),
        field_type: field_type.name().to_string(),
        value_type: value_type(value).to_string(),
        reason: reason.to_string(),
    }
}

/// Convert a policy value to the native type of `field_type`.
pub fn coerce(field: &TaggedField, field_type: FieldType, value: &Value) -> RowguardResult<SqlValue> {
    let fail = |reason: &str| coercion_error(field, field_type, value, reason);

    if value.is_null() && field_type != FieldType::Json {
        return Ok(SqlValue::Null);
    }

    match field_type {
        FieldType::String => value
            .as_str()
            .map(|s| SqlValue::Text(s.to_string()))
            .ok_or_else(|| fail("expected a string")),
        FieldType::Integer => integer(value).map(SqlValue::Integer).map_err(|r| fail(r)),
        FieldType::Float => value
            .as_f64()
            .map(SqlValue::Float)
            .ok_or_else(|| fail("expected a number")),
        FieldType::Boolean => value
            .as_bool()
            .map(SqlValue::Boolean)
            .ok_or_else(|| fail("expected a boolean")),
        FieldType::Uuid => uuid(value).map(SqlValue::Uuid).map_err(|r| fail(r)),
        FieldType::UuidArray => value
            .as_array()
            .ok_or("expected an array")
            .and_then(|items| items.iter().map(uuid).collect::<Result<Vec<_>, _>>())
            .map(SqlValue::UuidArray)
            .map_err(|r| fail(r)),
        FieldType::StringArray => value
            .as_array()
            .ok_or("expected an array")
            .and_then(|items| {
                items
                    .iter()
                    .map(|v| v.as_str().map(str::to_string).ok_or("expected an array of strings"))
                    .collect::<Result<Vec<_>, _>>()
            })
            .map(SqlValue::TextArray)
            .map_err(|r| fail(r)),
        FieldType::Timestamp => timestamp(value).map(SqlValue::Timestamp).map_err(|r| fail(r)),
        FieldType::Json => Ok(SqlValue::Json(value.clone())),
    }
}

/// Convert a membership operand: the value is an element of the column.
fn coerce_member(field: &TaggedField, field_type: FieldType, value: &Value) -> RowguardResult<SqlValue> {
    match field_type {
        FieldType::UuidArray | FieldType::StringArray => {
            if value.is_array() {
                return Err(coercion_error(field, field_type, value, "membership expects a single element"));
            }
            coerce(field, field_type, &Value::Array(vec![value.clone()]))
        }
        FieldType::Json => Ok(SqlValue::Json(Value::Array(vec![value.clone()]))),
        _ => Err(coercion_error(
            field,
            field_type,
            value,
            "membership requires an array or json column",
        )),
    }
}

fn integer(value: &Value) -> Result<i64, &'static str> {
    let Value::Number(n) = value else {
        return Err("expected an integer");
    };
    if let Some(i) = n.as_i64() {
        return Ok(i);
    }
    match n.as_f64() {
        // `i64::MAX as f64` rounds up to 2^63, so the upper bound is exclusive.
        Some(x) if x.fract() == 0.0 && x >= i64::MIN as f64 && x < -(i64::MIN as f64) => Ok(x as i64),
        Some(x) if x.fract() != 0.0 => Err("fractional value would be truncated"),
        _ => Err("integer out of range"),
    }
}

fn uuid(value: &Value) -> Result<Uuid, &'static str> {
    value
        .as_str()
        .ok_or("expected a uuid string")
        .and_then(|s| Uuid::parse_str(s).map_err(|_| "invalid uuid"))
}

fn timestamp(value: &Value) -> Result<DateTime<Utc>, &'static str> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .ok_or("expected whole seconds since the epoch"),
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|_| "expected an RFC 3339 timestamp"),
        _ => Err("expected epoch seconds or an RFC 3339 string"),
    }
}
