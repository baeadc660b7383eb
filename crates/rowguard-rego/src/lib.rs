//! # rowguard-rego
//!
//! Decodes the policy engine's partial-evaluation output into
//! `rowguard_contracts::formula` types. Two input forms are supported:
//!
//! - `json`: the engine's compile response (`{"result": {"queries": ...}}`)
//! - `text`: a compact expression syntax for rule files and tests
//!
//! Neither decoder interprets the formula. Deciding what an expression means
//! is the translator's job.

pub mod json;
pub mod text;

pub use json::{parse_compile_response, parse_compile_value};
pub use text::{parse_conjunction, parse_expr, parse_formula};
