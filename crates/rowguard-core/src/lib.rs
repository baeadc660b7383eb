//! # rowguard-core
//!
//! Turns a partial-evaluation result into a backend predicate.
//!
//! This crate provides:
//! - The two seams (`Translator`, `PartialEvaluator`)
//! - Formula normalization (`normalize`)
//! - The backend-generic translator (`translate`)
//! - A diagnostic text backend (`DebugTranslator`)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rowguard_core::{translate, Compiled, DebugTranslator};
//!
//! match translate(&formula, &DebugTranslator::new())? {
//!     Compiled::Unrestricted => println!("no filter"),
//!     Compiled::Predicate(p) => println!("WHERE {p}"),
//! }
//! ```

pub mod debug;
pub mod normalize;
pub mod traits;
pub mod translate;

pub use debug::{DebugExpr, DebugTranslator};
pub use normalize::{normalize, Normalized};
pub use translate::{translate, translate_conjunction, Compiled};
