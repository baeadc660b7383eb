//! Demo scenarios: one `Document` model filtered under `policies/documents.toml`.

use serde::Serialize;

use rowguard_contracts::{
    error::RowguardResult,
    policy::{AuthContext, Operation},
};
use rowguard_data::{
    FieldDef, FieldType, FilterConfig, FilterContext, FilterOutcome, FilterScope, MarkerDef,
    ModelSchema, PolicyFilter, PolicyModel, Record, Statement,
};
use rowguard_policy::TomlPartialEngine;

const DOCUMENT_POLICY: &str = include_str!("../policies/documents.toml");

// ── Model ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct Document {
    pub id: String,
    pub tenant_id: String,
    pub owner_id: String,
    pub shared: bool,
    pub labels: Vec<String>,
    pub pages: i64,
}

impl PolicyModel for Document {
    fn schema() -> ModelSchema {
        ModelSchema::new("Document", "documents")
            .marker(MarkerDef::embedded("FilteredModel", "type:document"))
            .field(FieldDef::new("id", "id", FieldType::String).primary_key())
            .field(FieldDef::new("tenant_id", "tenant_id", FieldType::String).tag("field:tenant_id"))
            .field(FieldDef::new("owner_id", "owner_id", FieldType::String).tag("field:owner_id"))
            .field(FieldDef::new("shared", "is_shared", FieldType::Boolean).tag("field:shared"))
            .field(FieldDef::new("labels", "labels", FieldType::StringArray).tag("field:labels"))
            .field(FieldDef::new("pages", "page_count", FieldType::Integer).tag("field:pages"))
    }
}

fn document(tenant: &str, owner: &str) -> Document {
    Document {
        id: "D-100".to_string(),
        tenant_id: tenant.to_string(),
        owner_id: owner.to_string(),
        shared: false,
        labels: vec!["draft".to_string()],
        pages: 3,
    }
}

fn alice() -> AuthContext {
    AuthContext::new("alice")
        .with_user_id("U1")
        .with_tenant("T1")
        .with_permissions(["VIEW", "EDIT"])
}

fn filter() -> RowguardResult<PolicyFilter<TomlPartialEngine>> {
    Ok(PolicyFilter::new(
        TomlPartialEngine::from_toml_str(DOCUMENT_POLICY)?,
        FilterConfig::default(),
    ))
}

fn report(label: &str, statement: &Statement, result: &RowguardResult<FilterOutcome>) {
    println!("  {label}");
    println!("    state   : {:?}", statement.state);
    match result {
        Ok(FilterOutcome::Skipped) => println!("    outcome : skipped"),
        Ok(FilterOutcome::Unrestricted) => println!("    outcome : allowed, no predicate"),
        Ok(FilterOutcome::Filtered(_)) => println!("    outcome : filtered"),
        Ok(FilterOutcome::Denied { reason }) => println!("    outcome : denied ({reason})"),
        Err(e) => println!("    outcome : rejected ({e})"),
    }
    if statement.operation == Operation::Create {
        println!("    records : {}", statement.records.len());
    }
    if let Some(predicate) = statement.where_predicate() {
        let (sql, params) = predicate.to_sql();
        println!("    WHERE   : {predicate}");
        println!("    SQL     : {sql}");
        if !params.is_empty() {
            let params: Vec<String> = params.iter().map(ToString::to_string).collect();
            println!("    params  : [{}]", params.join(", "));
        }
    }
    println!();
}

// ── Scenarios ─────────────────────────────────────────────────────────────────

/// Reads: tenant members, a caller without VIEW, and a skipped scope.
pub fn run_read() -> RowguardResult<()> {
    println!("Scenario: read");
    let filter = filter()?;

    let mut stmt = Statement::read();
    let result = filter.apply::<Document>(&mut stmt, &FilterContext::new(alice()));
    report("alice (tenant T1, VIEW)", &stmt, &result);

    let guest = AuthContext::new("guest").with_tenant("T1");
    let mut stmt = Statement::read();
    let result = filter.apply::<Document>(&mut stmt, &FilterContext::new(guest));
    report("guest (no VIEW)", &stmt, &result);

    let mut stmt = Statement::read();
    let ctx = FilterContext::new(alice()).with_scope(FilterScope::skip());
    let result = filter.apply::<Document>(&mut stmt, &ctx);
    report("alice with a skip scope", &stmt, &result);
    Ok(())
}

/// Updates: the delta must stay in the caller's tenant.
pub fn run_update() -> RowguardResult<()> {
    println!("Scenario: update");
    let filter = filter()?;
    let ctx = FilterContext::new(alice());

    let mut stmt = Statement::update(Record::from_model(&document("T1", "U1"))?);
    let result = filter.apply::<Document>(&mut stmt, &ctx);
    report("edit within tenant T1", &stmt, &result);

    let mut stmt = Statement::update(Record::from_model(&document("T2", "U1"))?);
    let result = filter.apply::<Document>(&mut stmt, &ctx);
    report("move to tenant T2", &stmt, &result);
    Ok(())
}

/// Creates and deletes: whole-statement decisions.
pub fn run_create_delete() -> RowguardResult<()> {
    println!("Scenario: create and delete");
    let filter = filter()?;
    let ctx = FilterContext::new(alice());

    let mut stmt = Statement::create(vec![Record::from_model(&document("T1", "U1"))?]);
    let result = filter.apply::<Document>(&mut stmt, &ctx);
    report("create in tenant T1", &stmt, &result);

    let mut stmt = Statement::create(vec![Record::from_model(&document("T2", "U1"))?]);
    let result = filter.apply::<Document>(&mut stmt, &ctx);
    report("create in tenant T2", &stmt, &result);

    let mut stmt = Statement::new(Operation::Delete);
    let result = filter.apply::<Document>(&mut stmt, &ctx);
    report("delete without ADMIN", &stmt, &result);

    let admin = AuthContext::new("root").with_permissions(["ADMIN"]);
    let mut stmt = Statement::delete();
    let result = filter.apply::<Document>(&mut stmt, &FilterContext::new(admin));
    report("delete as ADMIN", &stmt, &result);
    Ok(())
}
