//! # rowguard-contracts
//!
//! Shared types and errors for the rowguard policy-query compiler.
//!
//! All crates in the workspace import from here. No business logic lives in
//! this crate, only data definitions, renderings and error types.

pub mod error;
pub mod formula;
pub mod operator;
pub mod policy;
pub mod resource;
