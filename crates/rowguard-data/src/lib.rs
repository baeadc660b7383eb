//! # rowguard-data
//!
//! Connects policy filtering to data statements.
//!
//! - `metadata`: declarative model schemas, `opa` tags, the metadata cache
//! - `sql`: the `Predicate` tree and `SqlTranslator` backend
//! - `filter`: `PolicyFilter`, the per-statement filtering lifecycle
//! - `values`: resource values sent into write policies
//!
//! ## Usage
//!
//! ```rust,ignore
//! let filter = PolicyFilter::new(engine, FilterConfig::default());
//! MetadataCache::global().register::<Document>()?;
//!
//! let mut stmt = Statement::read();
//! match filter.apply::<Document>(&mut stmt, &FilterContext::new(auth))? {
//!     FilterOutcome::Denied { reason } => return Err(not_found(reason)),
//!     _ => run(stmt.where_predicate()),
//! }
//! ```

pub mod config;
pub mod filter;
pub mod metadata;
pub mod sql;
pub mod tag;
pub mod values;

pub use config::FilterConfig;
pub use filter::{FilterContext, FilterOutcome, FilterScope, FilterState, PolicyFilter, Record, Statement};
pub use metadata::{
    FieldDef, FieldType, MarkerDef, Metadata, MetadataCache, ModelSchema, PolicyModel, RelationDef,
    TaggedField,
};
pub use sql::{Predicate, SqlTranslator, SqlValue};
pub use values::resolve_resource;

// ── Tests ─────────────────────────────────────────────────────────────────────
