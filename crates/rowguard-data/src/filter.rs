//! Statement-level policy filtering.
//!
//! `PolicyFilter::apply` runs once per statement:
//!
//! ```text
//! Unfiltered → MetadataResolved → PartialEvaluationRequested
//!            → { Denied | Normalized } → { NoPredicateAttached | PredicateAttached }
//! ```
//!
//! or `Unfiltered → Skipped` when the model or the call scope opts out.
//!
//! Read, update and delete statements receive the translated predicate on
//! their WHERE clause. Create statements are checked record by record
//! against the `allow_create` policy with every resource field known.
//! A denied statement carries a `FALSE` predicate and a reason; it is never
//! left unfiltered. A denied create is an `Err` and also drops its records.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use rowguard_contracts::{
    error::{RowguardError, RowguardResult},
    policy::{AuthContext, Operation, PartialRequest},
    resource::ResourceValues,
};
use rowguard_core::{traits::PartialEvaluator, translate, Compiled};

use crate::{
    config::FilterConfig,
    metadata::{Metadata, MetadataCache, PolicyModel},
    sql::{Predicate, SqlTranslator},
    values::{values_from_object, values_from_value},
};

// ── Statement ────────────────────────────────────────────────────────────────

/// Where a statement is in the filtering lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterState {
    #[default]
    Unfiltered,
    MetadataResolved,
    PartialEvaluationRequested,
    Denied,
    Normalized,
    NoPredicateAttached,
    PredicateAttached,
    Skipped,
}

/// A record written by a create or update statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    /// A serialized model.
    Model(Value),
    /// A raw map keyed by field or column name.
    Map(Map<String, Value>),
}

impl Record {
    pub fn from_model<T: Serialize + ?Sized>(model: &T) -> RowguardResult<Self> {
        serde_json::to_value(model)
            .map(Record::Model)
            .map_err(|e| RowguardError::UnsupportedUsage {
                reason: format!("record could not be serialized: {}", e),
            })
    }

    fn values(&self, metadata: &Metadata) -> RowguardResult<ResourceValues> {
        match self {
            Record::Model(value) => values_from_value(metadata, value),
            Record::Map(map) => Ok(values_from_object(metadata, map)),
        }
    }
}

/// The parts of an outgoing statement the filter reads and amends.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub operation: Operation,
    /// AND-ed WHERE conditions.
    pub where_clauses: Vec<Predicate>,
    pub records: Vec<Record>,
    pub state: FilterState,
    /// Set when the policy denied the statement.
    pub denied: Option<String>,
}

impl Statement {
    pub fn new(operation: Operation) -> Self {
        Self {
            operation,
            where_clauses: Vec::new(),
            records: Vec::new(),
            state: FilterState::Unfiltered,
            denied: None,
        }
    }

    pub fn read() -> Self {
        Self::new(Operation::Read)
    }

    pub fn delete() -> Self {
        Self::new(Operation::Delete)
    }

    pub fn update(record: Record) -> Self {
        Self::new(Operation::Update).with_record(record)
    }

    pub fn create(records: Vec<Record>) -> Self {
        Self {
            records,
            ..Self::new(Operation::Create)
        }
    }

    pub fn with_record(mut self, record: Record) -> Self {
        self.records.push(record);
        self
    }

    pub fn with_where(mut self, clause: Predicate) -> Self {
        self.where_clauses.push(clause);
        self
    }

    pub fn is_denied(&self) -> bool {
        self.denied.is_some()
    }

    /// The full WHERE condition, if any.
    pub fn where_predicate(&self) -> Option<Predicate> {
        match self.where_clauses.as_slice() {
            [] => None,
            [single] => Some(single.clone()),
            many => Some(Predicate::And(many.to_vec())),
        }
    }

    /// Attach `predicate`, grouping existing clauses so their ORs stay inside.
    fn attach(&mut self, predicate: Predicate) {
        if self.where_clauses.is_empty() {
            self.where_clauses.push(predicate);
            return;
        }
        let existing = std::mem::take(&mut self.where_clauses);
        self.where_clauses
            .push(Predicate::And(vec![Predicate::And(existing), predicate]));
    }
}

// ── Scope ────────────────────────────────────────────────────────────────────

/// Per-call filtering options. Nothing here is global.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterScope {
    skip: bool,
    only: Option<Vec<Operation>>,
    policies: HashMap<Operation, String>,
    extra: Map<String, Value>,
}

impl FilterScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply no filtering at all.
    pub fn skip() -> Self {
        Self {
            skip: true,
            ..Self::default()
        }
    }

    /// Filter exactly these operations, whatever the model's tag says.
    pub fn only<I: IntoIterator<Item = Operation>>(ops: I) -> Self {
        Self {
            only: Some(ops.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Use `query` (dots or slashes, `data.` optional) for `op`.
    pub fn with_policy(mut self, op: Operation, query: impl Into<String>) -> Self {
        self.policies.insert(op, query.into());
        self
    }

    /// Extra fact placed under `input.resource`.
    pub fn with_extra_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    pub fn is_skip(&self) -> bool {
        self.skip
    }

    fn is_enabled(&self, metadata: &Metadata, op: Operation) -> bool {
        match &self.only {
            Some(ops) => ops.contains(&op),
            None => metadata.is_enabled(op),
        }
    }
}

/// Who is asking, and how.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterContext {
    pub auth: AuthContext,
    pub scope: FilterScope,
}

impl FilterContext {
    pub fn new(auth: AuthContext) -> Self {
        Self {
            auth,
            scope: FilterScope::default(),
        }
    }

    pub fn with_scope(mut self, scope: FilterScope) -> Self {
        self.scope = scope;
        self
    }
}

/// What `apply` did to the statement.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterOutcome {
    Skipped,
    /// The policy grants unconditionally; nothing was attached.
    Unrestricted,
    Filtered(Predicate),
    /// `FALSE` was attached; the statement yields no rows.
    Denied { reason: String },
}

// ── Filter ───────────────────────────────────────────────────────────────────

/// Amends statements with the predicate their policy requires.
pub struct PolicyFilter<E> {
    engine: E,
    config: FilterConfig,
}

impl<E: PartialEvaluator> PolicyFilter<E> {
    pub fn new(engine: E, config: FilterConfig) -> Self {
        Self { engine, config }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    /// Filter `statement` for model `M`.
    ///
    /// Read, update and delete denials are an `Ok(FilterOutcome::Denied)`.
    /// A denied create, and any other failure, is returned as `Err` after the
    /// statement has been poisoned with `FALSE`.
    pub fn apply<M: PolicyModel>(
        &self,
        statement: &mut Statement,
        ctx: &FilterContext,
    ) -> RowguardResult<FilterOutcome> {
        match self.run::<M>(statement, ctx) {
            Ok(outcome) => Ok(outcome),
            Err(e) if e.is_deny() && statement.operation == Operation::Create => {
                warn!(reason = %e, "create denied by policy");
                deny(statement, e.to_string());
                Err(e)
            }
            Err(e) if e.is_deny() => {
                let reason = e.to_string();
                warn!(op = ?statement.operation, %reason, "statement denied by policy");
                deny(statement, reason.clone());
                Ok(FilterOutcome::Denied { reason })
            }
            Err(e) => {
                warn!(op = ?statement.operation, error = %e, "policy filtering failed");
                deny(statement, e.to_string());
                Err(e)
            }
        }
    }

    fn run<M: PolicyModel>(
        &self,
        statement: &mut Statement,
        ctx: &FilterContext,
    ) -> RowguardResult<FilterOutcome> {
        let op = statement.operation;
        if ctx.scope.is_skip() {
            transition(statement, FilterState::Skipped);
            return Ok(FilterOutcome::Skipped);
        }

        let metadata = MetadataCache::global().resolve::<M>()?;
        if !ctx.scope.is_enabled(&metadata, op) {
            debug!(model = %metadata.model, op = ?op, "filtering disabled for operation");
            transition(statement, FilterState::Skipped);
            return Ok(FilterOutcome::Skipped);
        }
        transition(statement, FilterState::MetadataResolved);

        let policy_path = self.policy_path(&metadata, op, &ctx.scope);
        match op {
            Operation::Create => self.check_create(statement, &metadata, ctx, &policy_path),
            _ => self.filter(statement, &metadata, ctx, &policy_path),
        }
    }

    fn filter(
        &self,
        statement: &mut Statement,
        metadata: &Metadata,
        ctx: &FilterContext,
        policy_path: &str,
    ) -> RowguardResult<FilterOutcome> {
        let op = statement.operation;
        let mut resource = self.resource_input(metadata, op, &ctx.scope);
        if op == Operation::Update {
            let delta = match statement.records.as_slice() {
                [record] => record.values(metadata)?,
                [] => {
                    return Err(RowguardError::UnsupportedUsage {
                        reason: "unable to resolve delta in 'update' operation: no record".to_string(),
                    })
                }
                _ => {
                    return Err(RowguardError::UnsupportedUsage {
                        reason: "batch update is not supported".to_string(),
                    })
                }
            };
            resource.insert("delta".to_string(), Value::Object(delta.into_map()));
        }

        let request = PartialRequest {
            policy_path: policy_path.to_string(),
            unknowns: metadata.unknowns(),
            input: json!({ "auth": ctx.auth, "resource": resource }),
            timeout: Some(self.config.timeout()),
        };
        transition(statement, FilterState::PartialEvaluationRequested);
        let response = self.engine.partial(&request)?;
        debug!(
            decision_id = %response.decision_id,
            policy = %policy_path,
            formula = %response.formula,
            "partial evaluation returned"
        );

        let translator = SqlTranslator::new(metadata).quote_identifiers(self.config.quote_identifiers);
        let compiled = translate(&response.formula, &translator)?;
        transition(statement, FilterState::Normalized);

        match compiled {
            Compiled::Unrestricted => {
                transition(statement, FilterState::NoPredicateAttached);
                Ok(FilterOutcome::Unrestricted)
            }
            Compiled::Predicate(predicate) => {
                statement.attach(predicate.clone());
                transition(statement, FilterState::PredicateAttached);
                Ok(FilterOutcome::Filtered(predicate))
            }
        }
    }

    fn check_create(
        &self,
        statement: &mut Statement,
        metadata: &Metadata,
        ctx: &FilterContext,
        policy_path: &str,
    ) -> RowguardResult<FilterOutcome> {
        if statement.records.is_empty() {
            return Err(RowguardError::UnsupportedUsage {
                reason: "create statement has no record to check".to_string(),
            });
        }

        let mut requests = Vec::with_capacity(statement.records.len());
        for record in &statement.records {
            let mut resource = self.resource_input(metadata, Operation::Create, &ctx.scope);
            resource.extend(record.values(metadata)?.into_map());
            requests.push(PartialRequest {
                policy_path: policy_path.to_string(),
                unknowns: Vec::new(),
                input: json!({ "auth": ctx.auth, "resource": resource }),
                timeout: Some(self.config.timeout()),
            });
        }

        transition(statement, FilterState::PartialEvaluationRequested);
        for (index, request) in requests.iter().enumerate() {
            let response = self.engine.partial(request)?;
            debug!(
                decision_id = %response.decision_id,
                policy = %policy_path,
                record = index,
                allowed = response.formula.is_unconditional(),
                "create check returned"
            );
            if !response.formula.is_unconditional() {
                return Err(RowguardError::AccessDenied {
                    reason: format!("record {index} may not be created under '{policy_path}'"),
                });
            }
        }

        transition(statement, FilterState::Normalized);
        transition(statement, FilterState::NoPredicateAttached);
        Ok(FilterOutcome::Unrestricted)
    }

    /// `input.resource` without the record values.
    fn resource_input(&self, metadata: &Metadata, op: Operation, scope: &FilterScope) -> Map<String, Value> {
        let mut resource = Map::new();
        resource.insert("type".to_string(), Value::String(metadata.resource_type.clone()));
        resource.insert("op".to_string(), Value::String(op.policy_name().to_string()));
        for (k, v) in &scope.extra {
            resource.insert(k.clone(), v.clone());
        }
        resource
    }

    /// Per-call override, else `data.<package>.<policy>`.
    pub fn policy_path(&self, metadata: &Metadata, op: Operation, scope: &FilterScope) -> String {
        if let Some(query) = scope.policies.get(&op) {
            let query = query.replace('/', ".");
            let query = query.trim_matches('.');
            return if query.starts_with("data.") {
                query.to_string()
            } else {
                format!("data.{query}")
            };
        }
        let package = metadata
            .package
            .clone()
            .unwrap_or_else(|| self.config.default_package(&metadata.resource_type));
        let policy = metadata
            .policy_name(op)
            .map(str::to_string)
            .unwrap_or_else(|| self.config.default_policy(op));
        format!("data.{package}.{policy}")
    }
}

fn transition(statement: &mut Statement, next: FilterState) {
    debug!(op = ?statement.operation, from = ?statement.state, to = ?next, "filter state");
    statement.state = next;
}

fn deny(statement: &mut Statement, reason: String) {
    if statement.operation == Operation::Create {
        statement.records.clear();
    }
    statement.attach(Predicate::False);
    statement.denied = Some(reason);
    transition(statement, FilterState::Denied);
}
