//! Filter configuration, loaded from TOML.
//!
//! ```toml
//! package_prefix = "resource"
//! partial_policy_template = "filter_{op}"
//! allow_policy_template = "allow_{op}"
//! timeout_ms = 5000
//! quote_identifiers = true
//! ```
//!
//! Every key is optional.

use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use rowguard_contracts::{
    error::{RowguardError, RowguardResult},
    policy::Operation,
};

const OP_PLACEHOLDER: &str = "{op}";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FilterConfig {
    /// Package used when a model's tag does not name one: `<prefix>.<type>`.
    pub package_prefix: String,
    /// Rule name for read/update/delete filters.
    pub partial_policy_template: String,
    /// Rule name for create checks.
    pub allow_policy_template: String,
    /// Engine deadline per evaluation.
    pub timeout_ms: u64,
    pub quote_identifiers: bool,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            package_prefix: "resource".to_string(),
            partial_policy_template: "filter_{op}".to_string(),
            allow_policy_template: "allow_{op}".to_string(),
            timeout_ms: 5000,
            quote_identifiers: true,
        }
    }
}

impl FilterConfig {
    pub fn from_toml_str(s: &str) -> RowguardResult<Self> {
        let config: FilterConfig = toml::from_str(s).map_err(|e| RowguardError::ConfigError {
            reason: format!("failed to parse filter TOML: {}", e),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> RowguardResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| RowguardError::ConfigError {
            reason: format!("failed to read filter config '{}': {}", path.display(), e),
        })?;
        Self::from_toml_str(&contents)
    }

    fn validate(&self) -> RowguardResult<()> {
        for (key, template) in [
            ("partial_policy_template", &self.partial_policy_template),
            ("allow_policy_template", &self.allow_policy_template),
        ] {
            if template.trim().is_empty() {
                return Err(RowguardError::ConfigError {
                    reason: format!("'{key}' must not be empty"),
                });
            }
        }
        if self.timeout_ms == 0 {
            return Err(RowguardError::ConfigError {
                reason: "'timeout_ms' must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Default rule name for `op`: `filter_read`, `filter_write`, `allow_create`, ...
    pub fn default_policy(&self, op: Operation) -> String {
        let template = match op {
            Operation::Create => &self.allow_policy_template,
            _ => &self.partial_policy_template,
        };
        template.replace(OP_PLACEHOLDER, op.policy_name())
    }

    pub fn default_package(&self, resource_type: &str) -> String {
        if self.package_prefix.is_empty() {
            resource_type.to_string()
        } else {
            format!("{}.{}", self.package_prefix, resource_type)
        }
    }
}

#[cfg(test)]
mod tests {
    use rowguard_contracts::{error::RowguardError, policy::Operation};

    use super::FilterConfig;

    #[test]
    fn defaults() {
        let c = FilterConfig::from_toml_str("").unwrap();
        assert_eq!(c, FilterConfig::default());
        assert_eq!(c.default_policy(Operation::Read), "filter_read");
        assert_eq!(c.default_policy(Operation::Update), "filter_write");
        assert_eq!(c.default_policy(Operation::Create), "allow_create");
        assert_eq!(c.default_package("document"), "resource.document");
        assert_eq!(c.timeout().as_millis(), 5000);
    }

    #[test]
    fn overrides() {
        let c = FilterConfig::from_toml_str(
            r#"
            package_prefix = ""
            partial_policy_template = "{op}_filter"
            timeout_ms = 250
            quote_identifiers = false
            "#,
        )
        .unwrap();
        assert_eq!(c.default_policy(Operation::Delete), "delete_filter");
        assert_eq!(c.default_package("document"), "document");
        assert!(!c.quote_identifiers);
    }

    #[test]
    fn rejects_unknown_keys_and_bad_values() {
        for toml in ["package = \"x\"", "timeout_ms = 0", "allow_policy_template = \" \""] {
            match FilterConfig::from_toml_str(toml) {
                Err(RowguardError::ConfigError { .. }) => {}
                other => panic!("expected ConfigError for {toml:?}, got {:?}", other),
            }
        }
    }
}
