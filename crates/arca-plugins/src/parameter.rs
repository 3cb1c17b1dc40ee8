use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PluginError, PluginResult};

/// Value type of a plugin parameter.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "allowed", rename_all = "snake_case")]
pub enum ParameterKind {
    String,
    Boolean,
    Integer,
    /// Non-negative integer, such as a size or a count.
    Count,
    /// One of a fixed set of values.
    Enum(Vec<String>),
}

/// One entry of a plugin's parameter schema.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginParameter {
    pub name: String,
    pub kind: ParameterKind,
    pub mandatory: bool,
    pub default: Option<String>,
    pub description: String,
}

impl PluginParameter {
    pub fn new(name: impl Into<String>, kind: ParameterKind) -> Self {
        Self {
            name: name.into(),
            kind,
            mandatory: false,
            default: None,
            description: String::new(),
        }
    }

    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }

    pub fn with_default(mut self, value: impl Into<String>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn described(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Check a raw value against the declared kind.
    pub fn check(&self, value: &str) -> PluginResult<()> {
        let valid = match &self.kind {
            ParameterKind::String => true,
            ParameterKind::Boolean => value.parse::<bool>().is_ok(),
            ParameterKind::Integer => value.parse::<i64>().is_ok(),
            ParameterKind::Count => value.parse::<u64>().is_ok(),
            ParameterKind::Enum(allowed) => allowed.iter().any(|a| a == value),
        };
        if valid {
            Ok(())
        } else {
            Err(PluginError::InvalidParameter(format!(
                "{} = {value:?} is not a valid {:?}",
                self.name, self.kind
            )))
        }
    }
}

/// Parameter values validated against a schema, defaults filled in.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParameterValues {
    values: BTreeMap<String, String>,
}

impl ParameterValues {
    /// Validate raw values against `schema`.
    ///
    /// Missing values take their declared default. A mandatory parameter
    /// with neither a value nor a default is an error. Keys not in the
    /// schema are ignored.
    pub fn resolve(schema: &[PluginParameter], raw: &BTreeMap<String, String>) -> PluginResult<Self> {
        let mut values = BTreeMap::new();
        for parameter in schema {
            match raw.get(&parameter.name).or(parameter.default.as_ref()) {
                Some(value) => {
                    parameter.check(value)?;
                    values.insert(parameter.name.clone(), value.clone());
                }
                None if parameter.mandatory => {
                    return Err(PluginError::InvalidParameter(format!(
                        "missing mandatory parameter {}",
                        parameter.name
                    )));
                }
                None => {}
            }
        }
        for key in raw.keys().filter(|k| !schema.iter().any(|p| &p.name == *k)) {
            debug!(parameter = %key, "ignoring unknown plugin parameter");
        }
        Ok(Self { values })
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Value of a boolean parameter; absent reads as `false`.
    pub fn get_bool(&self, name: &str) -> bool {
        self.get(name).and_then(|v| v.parse().ok()).unwrap_or(false)
    }

    pub fn get_u64(&self, name: &str) -> Option<u64> {
        self.get(name).and_then(|v| v.parse().ok())
    }

    pub fn as_map(&self) -> &BTreeMap<String, String> {
        &self.values
    }
}
