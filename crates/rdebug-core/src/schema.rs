//! # Configuration Schema
//!
//! A small JSON schema describing the configuration keys a host accepts:
//!
//! ```json
//! {
//!   "properties": {
//!     "stopOnEntry":   { "type": "boolean", "default": false },
//!     "consoleCoding": { "type": "string", "enum": ["utf8", "ansi", "none"], "default": "utf8" }
//!   }
//! }
//! ```
//!
//! Only `type`, `enum` and `default` are interpreted. Defaults form the
//! lowest configuration layer.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{DebuggerError, Result};

/// JSON value kinds a property may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind
{
    Boolean,
    String,
    Number,
    Integer,
    Array,
    Object,
    Null,
}

impl ValueKind
{
    /// Does `value` have this kind?
    #[must_use]
    pub fn accepts(self, value: &Value) -> bool
    {
        match self {
            Self::Boolean => value.is_boolean(),
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
            Self::Null => value.is_null(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum KindList
{
    One(ValueKind),
    Many(Vec<ValueKind>),
}

/// Declaration of one configuration key.
#[derive(Debug, Clone, Deserialize)]
pub struct Property
{
    #[serde(rename = "type", default)]
    kinds: Option<KindList>,
    #[serde(rename = "enum", default)]
    allowed: Option<Vec<Value>>,
    #[serde(default)]
    default: Option<Value>,
}

impl Property
{
    fn check(&self, key: &str, value: &Value) -> std::result::Result<(), String>
    {
        let type_ok = match &self.kinds {
            None => true,
            Some(KindList::One(kind)) => kind.accepts(value),
            Some(KindList::Many(kinds)) => kinds.iter().any(|k| k.accepts(value)),
        };
        if !type_ok {
            return Err(format!("`{key}` has the wrong type: {value}"));
        }
        if let Some(allowed) = &self.allowed {
            if !allowed.contains(value) {
                return Err(format!("`{key}` must be one of {}", Value::Array(allowed.clone())));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
struct SchemaFile
{
    #[serde(default)]
    properties: BTreeMap<String, Property>,
}

/// Loaded schema.
#[derive(Debug, Clone, Default)]
pub struct Schema
{
    properties: BTreeMap<String, Property>,
}

impl Schema
{
    /// Parse a schema document.
    ///
    /// ## Errors
    ///
    /// [`DebuggerError::Schema`] if the text is not a schema object.
    pub fn parse(text: &str) -> Result<Self>
    {
        let file: SchemaFile = serde_json::from_str(text).map_err(|e| DebuggerError::Schema(e.to_string()))?;
        let schema = Self {
            properties: file.properties,
        };
        for (key, property) in &schema.properties {
            if let Some(default) = &property.default {
                property.check(key, default).map_err(DebuggerError::Schema)?;
            }
        }
        Ok(schema)
    }

    /// Read and parse a schema file.
    ///
    /// ## Errors
    ///
    /// [`DebuggerError::Io`] if the file cannot be read,
    /// [`DebuggerError::Schema`] if it does not parse.
    pub fn open(path: &Path) -> Result<Self>
    {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Default values declared by the schema.
    #[must_use]
    pub fn defaults(&self) -> Map<String, Value>
    {
        self.properties
            .iter()
            .filter_map(|(key, p)| p.default.clone().map(|d| (key.clone(), d)))
            .collect()
    }

    /// Is `key` declared?
    #[must_use]
    pub fn knows(&self, key: &str) -> bool
    {
        self.properties.contains_key(key)
    }

    /// Check every declared key present in `config`. Unknown keys pass.
    ///
    /// ## Errors
    ///
    /// A description of the first offending key.
    pub fn validate(&self, config: &Map<String, Value>) -> std::result::Result<(), String>
    {
        for (key, value) in config {
            if let Some(property) = self.properties.get(key) {
                property.check(key, value)?;
            }
        }
        Ok(())
    }
}
