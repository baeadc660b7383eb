//! # rowguard-policy
//!
//! A TOML-driven, deny-by-default partial evaluator.
//!
//! ## Overview
//!
//! This crate provides [`TomlPartialEngine`], which implements the
//! [`PartialEvaluator`](rowguard_core::traits::PartialEvaluator) trait. Rules
//! are declared in a TOML file, matched against the requested policy path in
//! order, and the first match wins. If no rule matches, the policy is
//! undefined and callers deny.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use std::path::Path;
//! use rowguard_policy::TomlPartialEngine;
//!
//! let engine = TomlPartialEngine::from_file(Path::new("policies/documents.toml"))?;
//! // Pass `engine` to `rowguard_data::PolicyFilter::new(...)`.
//! ```
//!
//! ## Queries
//!
//! `partial` rules list their residual formula in the compact expression
//! syntax of `rowguard_rego::text`. Known input is folded away before the
//! formula is returned, so the same rule serves filtering (resource fields
//! unknown) and create checks (resource fields known).

pub mod engine;
pub mod residual;
pub mod rule;

pub use engine::TomlPartialEngine;
pub use rule::{PartialPolicyConfig, PartialRule, RuleVerdict};

// ── Tests ─────────────────────────────────────────────────────────────────────
