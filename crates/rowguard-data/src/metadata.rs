//! Model metadata: which policy governs a model and how policy input fields
//! map onto columns.
//!
//! Models describe themselves through `PolicyModel::schema()`, a declarative
//! builder standing in for struct tags:
//!
//! ```rust,ignore
//! impl PolicyModel for Document {
//!     fn schema() -> ModelSchema {
//!         ModelSchema::new("Document", "documents")
//!             .marker(MarkerDef::embedded("FilteredModel", "type:document"))
//!             .field(FieldDef::new("id", "id", FieldType::Uuid).primary_key())
//!             .field(FieldDef::new("tenant_id", "tenant_id", FieldType::Uuid).tag("field:tenant_id"))
//!             .relation(RelationDef::new::<Owner>("owner").tag("field:owner"))
//!     }
//! }
//! ```
//!
//! `Metadata` is built once per model type and cached for the process
//! lifetime in `MetadataCache::global()`.

use std::{
    any::TypeId,
    collections::{BTreeMap, HashMap, HashSet},
    fmt,
    sync::Arc,
};

use dashmap::DashMap;
use once_cell::sync::Lazy;
use tracing::{debug, info};

use rowguard_contracts::{
    error::{MetadataError, RowguardResult},
    policy::Operation,
};

use crate::tag::{OpaTag, OperationPolicy};

// ── Schema declaration ───────────────────────────────────────────────────────

/// A model that can be filtered by policy.
pub trait PolicyModel: 'static {
    fn schema() -> ModelSchema;
}

/// Native type of a column, used to coerce policy values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Integer,
    Float,
    Boolean,
    Uuid,
    UuidArray,
    StringArray,
    Timestamp,
    Json,
}

impl FieldType {
    pub fn name(self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Integer => "integer",
            FieldType::Float => "float",
            FieldType::Boolean => "boolean",
            FieldType::Uuid => "uuid",
            FieldType::UuidArray => "uuid[]",
            FieldType::StringArray => "text[]",
            FieldType::Timestamp => "timestamp",
            FieldType::Json => "jsonb",
        }
    }

    pub fn is_array(self) -> bool {
        matches!(self, FieldType::UuidArray | FieldType::StringArray)
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone)]
pub struct FieldDef {
    pub name: String,
    pub column: String,
    pub field_type: FieldType,
    pub tag: Option<String>,
    pub primary_key: bool,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, column: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            column: column.into(),
            field_type,
            tag: None,
            primary_key: false,
        }
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }
}

/// A relationship to another model. Only tagged relations are traversed.
#[derive(Clone)]
pub struct RelationDef {
    pub name: String,
    pub tag: Option<String>,
    target: TypeId,
    schema: fn() -> ModelSchema,
}

impl RelationDef {
    pub fn new<M: PolicyModel>(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tag: None,
            target: TypeId::of::<M>(),
            schema: M::schema,
        }
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }
}

impl fmt::Debug for RelationDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelationDef")
            .field("name", &self.name)
            .field("tag", &self.tag)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerKind {
    /// An embedded `FilteredModel`.
    Embedded,
    /// A named `Filter` field.
    Field,
}

/// The policy marker carrying the model-level `opa` tag.
#[derive(Debug, Clone)]
pub struct MarkerDef {
    pub kind: MarkerKind,
    pub name: String,
    pub tag: String,
}

impl MarkerDef {
    pub fn embedded(name: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            kind: MarkerKind::Embedded,
            name: name.into(),
            tag: tag.into(),
        }
    }

    pub fn field(name: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            kind: MarkerKind::Field,
            name: name.into(),
            tag: tag.into(),
        }
    }
}

/// Declarative description of one model type.
///
/// Embedded schemas contribute their fields, relations and marker to the
/// embedding model, which keeps its own table.
#[derive(Debug, Clone)]
pub struct ModelSchema {
    pub name: String,
    pub table: String,
    pub marker: Option<MarkerDef>,
    pub fields: Vec<FieldDef>,
    pub relations: Vec<RelationDef>,
    pub embedded: Vec<ModelSchema>,
}

impl ModelSchema {
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            marker: None,
            fields: Vec::new(),
            relations: Vec::new(),
            embedded: Vec::new(),
        }
    }

    pub fn marker(mut self, marker: MarkerDef) -> Self {
        self.marker = Some(marker);
        self
    }

    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    pub fn relation(mut self, relation: RelationDef) -> Self {
        self.relations.push(relation);
        self
    }

    pub fn embed(mut self, schema: ModelSchema) -> Self {
        self.embedded.push(schema);
        self
    }

    /// Depth-first: own marker, then embedded ones in declaration order.
    fn find_marker(&self) -> Option<&MarkerDef> {
        self.marker
            .as_ref()
            .or_else(|| self.embedded.iter().find_map(ModelSchema::find_marker))
    }

    /// Own fields followed by promoted fields of embedded schemas.
    pub fn all_fields(&self) -> Vec<&FieldDef> {
        let mut out: Vec<&FieldDef> = self.fields.iter().collect();
        for e in &self.embedded {
            out.extend(e.all_fields());
        }
        out
    }

    fn all_relations(&self) -> Vec<&RelationDef> {
        let mut out: Vec<&RelationDef> = self.relations.iter().collect();
        for e in &self.embedded {
            out.extend(e.all_relations());
        }
        out
    }
}

// ── Metadata ─────────────────────────────────────────────────────────────────

/// A model field reachable from the policy input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedField {
    /// Model field name.
    pub name: String,
    /// Full policy input name, e.g. `owner.name` for a related field.
    pub input_field: String,
    pub table: String,
    pub column: String,
    pub field_type: FieldType,
    /// Input names of the relations traversed to reach this field.
    pub relation_path: Vec<String>,
}

impl TaggedField {
    pub fn is_relation_field(&self) -> bool {
        !self.relation_path.is_empty()
    }
}

/// Immutable, resolved policy metadata of one model type.
#[derive(Debug, Clone, PartialEq)]
pub struct Metadata {
    pub model: String,
    pub table: String,
    pub resource_type: String,
    pub package: Option<String>,
    pub policies: HashMap<Operation, OperationPolicy>,
    /// Keyed by full policy input name, sorted for deterministic unknowns.
    pub fields: BTreeMap<String, TaggedField>,
}

impl Metadata {
    /// Build metadata from a schema, validating every tag.
    pub fn build(schema: &ModelSchema) -> Result<Self, MetadataError> {
        let marker = schema.find_marker().ok_or_else(|| MetadataError::MarkerNotFound {
            model: schema.name.clone(),
        })?;
        let tag = OpaTag::parse(&marker.tag).map_err(|reason| MetadataError::InvalidTag {
            model: schema.name.clone(),
            field: marker.name.clone(),
            reason,
        })?;
        let resource_type = tag
            .resource_type
            .clone()
            .ok_or_else(|| MetadataError::ResourceTypeMissing {
                model: schema.name.clone(),
            })?;

        let mut fields = BTreeMap::new();
        collect_fields(schema, &[], &mut fields)?;
        let mut visited = HashSet::new();
        for relation in schema.all_relations() {
            collect_relation(relation, &schema.name, Vec::new(), &mut visited, &mut fields)?;
        }

        Ok(Self {
            model: schema.name.clone(),
            table: schema.table.clone(),
            resource_type,
            package: tag.package,
            policies: tag.policies,
            fields,
        })
    }

    pub fn field(&self, input_field: &str) -> Option<&TaggedField> {
        self.fields.get(input_field)
    }

    pub fn is_enabled(&self, op: Operation) -> bool {
        self.policies.get(&op) != Some(&OperationPolicy::Disabled)
    }

    pub fn policy_name(&self, op: Operation) -> Option<&str> {
        match self.policies.get(&op) {
            Some(OperationPolicy::Named(name)) => Some(name.as_str()),
            _ => None,
        }
    }

    /// `input.resource.<field>` for every tagged field.
    pub fn unknowns(&self) -> Vec<String> {
        self.fields
            .keys()
            .map(|k| format!("input.resource.{k}"))
            .collect()
    }
}

fn parse_field_tag(model: &str, field: &str, tag: &str) -> Result<String, MetadataError> {
    let parsed = OpaTag::parse(tag).map_err(|reason| MetadataError::InvalidTag {
        model: model.to_string(),
        field: field.to_string(),
        reason,
    })?;
    parsed
        .input_field
        .ok_or_else(|| MetadataError::InputFieldMissing {
            model: model.to_string(),
            field: field.to_string(),
        })
}

fn collect_fields(
    schema: &ModelSchema,
    relation_path: &[String],
    dest: &mut BTreeMap<String, TaggedField>,
) -> Result<(), MetadataError> {
    let fields = schema.all_fields();
    let primary_keys = fields.iter().filter(|f| f.primary_key).count();

    for field in fields {
        let Some(tag) = &field.tag else {
            continue;
        };
        if field.primary_key && primary_keys == 1 {
            return Err(MetadataError::PrimaryKeyTagged {
                model: schema.name.clone(),
                field: field.name.clone(),
            });
        }
        let input = parse_field_tag(&schema.name, &field.name, tag)?;
        let input_field = if relation_path.is_empty() {
            input
        } else {
            format!("{}.{}", relation_path.join("."), input)
        };
        dest.insert(
            input_field.clone(),
            TaggedField {
                name: field.name.clone(),
                input_field,
                table: schema.table.clone(),
                column: field.column.clone(),
                field_type: field.field_type,
                relation_path: relation_path.to_vec(),
            },
        );
    }
    Ok(())
}

fn collect_relation(
    relation: &RelationDef,
    owner: &str,
    mut path: Vec<String>,
    visited: &mut HashSet<TypeId>,
    dest: &mut BTreeMap<String, TaggedField>,
) -> Result<(), MetadataError> {
    let Some(tag) = &relation.tag else {
        return Ok(());
    };
    if !visited.insert(relation.target) {
        return Ok(());
    }
    path.push(parse_field_tag(owner, &relation.name, tag)?);

    let related = (relation.schema)();
    collect_fields(&related, &path, dest)?;
    for nested in related.all_relations() {
        collect_relation(nested, &related.name, path.clone(), visited, dest)?;
    }
    Ok(())
}

// ── Cache ────────────────────────────────────────────────────────────────────

static GLOBAL: Lazy<MetadataCache> = Lazy::new(MetadataCache::new);

/// Concurrent, read-mostly cache of `Metadata` keyed by model type.
///
/// Concurrent first builds of the same type may both run; the first insert
/// wins and the others are discarded.
#[derive(Debug, Default)]
pub struct MetadataCache {
    entries: DashMap<TypeId, Arc<Metadata>>,
}

impl MetadataCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// The process-wide cache.
    pub fn global() -> &'static MetadataCache {
        &GLOBAL
    }

    /// Cached metadata of `M`, building it on first use.
    pub fn resolve<M: PolicyModel>(&self) -> RowguardResult<Arc<Metadata>> {
        let key = TypeId::of::<M>();
        if let Some(found) = self.entries.get(&key) {
            return Ok(Arc::clone(found.value()));
        }

        let schema = M::schema();
        debug!(model = %schema.name, "building model metadata");
        let built = Arc::new(Metadata::build(&schema)?);

        let entry = self.entries.entry(key).or_insert(built);
        info!(
            model = %entry.model,
            resource_type = %entry.resource_type,
            fields = entry.fields.len(),
            "model metadata cached"
        );
        Ok(Arc::clone(entry.value()))
    }

    /// Build and cache `M` now so configuration errors surface at startup.
    pub fn register<M: PolicyModel>(&self) -> RowguardResult<()> {
        self.resolve::<M>().map(|_| ())
    }

    pub fn contains<M: PolicyModel>(&self) -> bool {
        self.entries.contains_key(&TypeId::of::<M>())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
