//! The `opa` tag grammar.
//!
//! ```text
//! type:<resource_type>, package:<policy_package>, field:<input_name>, input:<input_name>,
//! create:<policy|->, read:<policy|->, update:<policy|->, delete:<policy|->
//! ```
//!
//! Pairs are comma separated; only the first `:` splits key from value.
//! `field` and `input` are aliases. An operation set to `-` disables
//! filtering for that operation; an omitted operation uses the default
//! policy name.

use std::collections::HashMap;

use rowguard_contracts::policy::Operation;

pub const TAG_DELIMITER: char = ',';
pub const TAG_ASSIGNMENT: char = ':';
pub const TAG_VALUE_IGNORE: &str = "-";

/// Per-operation override declared on the policy marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationPolicy {
    /// `<op>:-`
    Disabled,
    /// `<op>:<policy_name>`
    Named(String),
}

/// A parsed `opa` tag. Which keys are meaningful depends on where the tag
/// sits: markers use `type`, `package` and operations; fields and relations
/// use `field`/`input`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpaTag {
    pub input_field: Option<String>,
    pub resource_type: Option<String>,
    pub package: Option<String>,
    pub policies: HashMap<Operation, OperationPolicy>,
}

impl OpaTag {
    /// Parse tag text. Errors are plain reasons; callers attach model and field.
    pub fn parse(text: &str) -> Result<Self, String> {
        let mut tag = OpaTag::default();
        for term in text.split(TAG_DELIMITER) {
            let term = term.trim();
            if term.is_empty() {
                continue;
            }
            let Some((key, value)) = term.split_once(TAG_ASSIGNMENT) else {
                return Err(format!(
                    "invalid 'opa' tag format, expect \"key:value\", but got \"{term}\""
                ));
            };
            let key = key.trim();
            let value = value.trim();
            let owned = (!value.is_empty()).then(|| value.to_string());
            match key {
                "field" | "input" => tag.input_field = owned,
                "type" => tag.resource_type = owned,
                "package" => tag.package = owned,
                other => {
                    let Some(op) = Operation::from_tag_name(other) else {
                        return Err(format!("unrecognized key \"{other}\""));
                    };
                    let policy = match value {
                        TAG_VALUE_IGNORE => OperationPolicy::Disabled,
                        "" => {
                            return Err(format!(
                                "invalid policy for '{other}', expect {other}:<policy_name> or {other}:-"
                            ))
                        }
                        name => OperationPolicy::Named(name.to_string()),
                    };
                    tag.policies.insert(op, policy);
                }
            }
        }
        Ok(tag)
    }

    pub fn is_enabled(&self, op: Operation) -> bool {
        self.policies.get(&op) != Some(&OperationPolicy::Disabled)
    }

    /// Explicit policy name for `op`, if one was declared.
    pub fn policy_name(&self, op: Operation) -> Option<&str> {
        match self.policies.get(&op) {
            Some(OperationPolicy::Named(name)) => Some(name.as_str()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use rowguard_contracts::policy::Operation;

    use super::{OpaTag, OperationPolicy};

    #[test]
    fn parses_marker_tag() {
        let tag = OpaTag::parse("type:document, package:docs.v1, read:-, update:can_edit").unwrap();
        assert_eq!(tag.resource_type.as_deref(), Some("document"));
        assert_eq!(tag.package.as_deref(), Some("docs.v1"));
        assert!(!tag.is_enabled(Operation::Read));
        assert!(tag.is_enabled(Operation::Delete));
        assert_eq!(tag.policy_name(Operation::Update), Some("can_edit"));
        assert_eq!(tag.policies.get(&Operation::Read), Some(&OperationPolicy::Disabled));
    }

    #[test]
    fn field_and_input_are_aliases() {
        assert_eq!(
            OpaTag::parse("field:tenant_id").unwrap().input_field,
            OpaTag::parse(" input : tenant_id ").unwrap().input_field
        );
    }

    #[test]
    fn only_first_colon_splits() {
        let tag = OpaTag::parse("read:pkg:policy").unwrap();
        assert_eq!(tag.policy_name(Operation::Read), Some("pkg:policy"));
    }

    #[test]
    fn empty_terms_are_ignored() {
        let tag = OpaTag::parse(" , type:doc,, ").unwrap();
        assert_eq!(tag.resource_type.as_deref(), Some("doc"));
    }

    #[test]
    fn rejects_malformed_pairs_and_unknown_keys() {
        assert!(OpaTag::parse("type").unwrap_err().contains("key:value"));
        assert!(OpaTag::parse("colour:red").unwrap_err().contains("colour"));
        assert!(OpaTag::parse("write:x").is_err(), "policy names are not tag keys");
        assert!(OpaTag::parse("read:").is_err());
    }
}
