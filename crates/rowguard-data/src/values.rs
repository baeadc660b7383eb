//! Extracting the policy-relevant values of a record.

use serde::Serialize;
use serde_json::{Map, Value};

use rowguard_contracts::{
    error::{RowguardError, RowguardResult},
    resource::ResourceValues,
};

use crate::metadata::{Metadata, MetadataCache, PolicyModel};

/// Values of the model's own tagged fields, keyed by input name.
///
/// `object` may be keyed by field name or by column name; relation fields
/// are never read from a record.
pub fn values_from_object(metadata: &Metadata, object: &Map<String, Value>) -> ResourceValues {
    let mut values = ResourceValues::new();
    for field in metadata.fields.values().filter(|f| !f.is_relation_field()) {
        if let Some(value) = object.get(&field.name).or_else(|| object.get(&field.column)) {
            values.insert(field.input_field.clone(), value.clone());
        }
    }
    values
}

/// Serialize `record` and extract its resource values.
pub fn values_from_record<T: Serialize + ?Sized>(
    metadata: &Metadata,
    record: &T,
) -> RowguardResult<ResourceValues> {
    let value = serde_json::to_value(record).map_err(|e| RowguardError::UnsupportedUsage {
        reason: format!("model [{}] could not be serialized: {}", metadata.model, e),
    })?;
    values_from_value(metadata, &value)
}

pub fn values_from_value(metadata: &Metadata, value: &Value) -> RowguardResult<ResourceValues> {
    match value {
        Value::Object(object) => Ok(values_from_object(metadata, object)),
        other => Err(RowguardError::UnsupportedUsage {
            reason: format!(
                "model [{}] must serialize to an object, got {}",
                metadata.model,
                type_name(other)
            ),
        }),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Resource type and values of `model`, for checks outside a statement.
pub fn resolve_resource<M>(model: &M) -> RowguardResult<(String, ResourceValues)>
where
    M: PolicyModel + Serialize,
{
    let metadata = MetadataCache::global().resolve::<M>()?;
    let values = values_from_record(&metadata, model)?;
    Ok((metadata.resource_type.clone(), values))
}

#[cfg(test)]
mod tests {
    use serde::Serialize;
    use serde_json::json;

    use rowguard_contracts::error::RowguardError;

    use super::{resolve_resource, values_from_value};
    use crate::metadata::{FieldDef, FieldType, MarkerDef, Metadata, ModelSchema, PolicyModel};

    #[derive(Serialize)]
    struct Invoice {
        id: u32,
        tenant_id: String,
        amount: i64,
        paid: bool,
    }

    impl PolicyModel for Invoice {
        fn schema() -> ModelSchema {
            ModelSchema::new("Invoice", "invoices")
                .marker(MarkerDef::field("Filter", "type:invoice"))
                .field(FieldDef::new("id", "id", FieldType::Integer).primary_key())
                .field(FieldDef::new("tenant_id", "tenant", FieldType::String).tag("field:tenant"))
                .field(FieldDef::new("amount", "amount_cents", FieldType::Integer).tag("input:amount"))
                .field(FieldDef::new("paid", "paid", FieldType::Boolean).tag("field:paid"))
        }
    }

    #[test]
    fn resolves_type_and_non_zero_values() {
        let invoice = Invoice {
            id: 9,
            tenant_id: "T1".into(),
            amount: 1200,
            paid: false,
        };
        let (resource_type, values) = resolve_resource(&invoice).unwrap();
        assert_eq!(resource_type, "invoice");
        assert_eq!(values.get("tenant"), Some(&json!("T1")));
        assert_eq!(values.get("amount"), Some(&json!(1200)));
        assert_eq!(values.get("paid"), None, "zero values are omitted");
        assert_eq!(values.len(), 2, "untagged fields are omitted");
    }

    #[test]
    fn maps_may_be_keyed_by_column() {
        let md = Metadata::build(&Invoice::schema()).unwrap();
        let values = values_from_value(&md, &json!({"tenant": "T2", "amount_cents": 5})).unwrap();
        assert_eq!(values.get("tenant"), Some(&json!("T2")));
        assert_eq!(values.get("amount"), Some(&json!(5)));
    }

    #[test]
    fn non_object_records_are_rejected() {
        let md = Metadata::build(&Invoice::schema()).unwrap();
        assert!(matches!(
            values_from_value(&md, &json!([1, 2])),
            Err(RowguardError::UnsupportedUsage { .. })
        ));
    }
}
