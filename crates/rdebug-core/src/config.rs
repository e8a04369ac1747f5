//! # Layered Configuration
//!
//! Configuration is a stack of JSON objects:
//!
//! | level | set by                               |
//! |-------|--------------------------------------|
//! | 0     | the host (`set_config(0, ...)`)      |
//! | 1     | `launch` / `attach` arguments        |
//! | 2     | client overrides                     |
//!
//! Below level 0 sit the defaults of the loaded schema. A lookup returns
//! the value from the highest layer that defines the key.
//!
//! Setting a level replaces that level wholesale. Rejected text leaves every
//! layer untouched.

use serde_json::{Map, Value};

use crate::error::{DebuggerError, Result};
use crate::schema::Schema;
use crate::types::{ConsoleCoding, ExceptionKind};

/// Number of configuration levels.
pub const LEVELS: usize = 3;

/// Well-known keys.
pub mod keys
{
    pub const STOP_ON_ENTRY: &str = "stopOnEntry";
    pub const CONSOLE_CODING: &str = "consoleCoding";
    pub const EXCEPTION_FILTERS: &str = "exceptionFilters";
    pub const SOURCE_CODING: &str = "sourceCoding";
    pub const SKIP_FILES: &str = "skipFiles";
}

/// Layered configuration store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Config
{
    defaults: Map<String, Value>,
    levels: [Map<String, Value>; LEVELS],
    /// Effective non-empty `skipFiles`, refreshed whenever a layer changes.
    skip_prefixes: Vec<String>,
}

impl Config
{
    /// Empty configuration.
    #[must_use]
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Replace level `level` with the JSON object in `text`.
    ///
    /// ## Errors
    ///
    /// [`DebuggerError::Config`] if the level is out of range, the text is
    /// not a JSON object, a well-known key has the wrong shape or `schema`
    /// rejects a value. Nothing changes on error.
    pub fn set(&mut self, level: usize, text: &str, schema: Option<&Schema>) -> Result<()>
    {
        let value: Value = serde_json::from_str(text).map_err(|e| DebuggerError::Config(e.to_string()))?;
        let Value::Object(map) = value else {
            return Err(DebuggerError::Config("configuration must be a JSON object".to_string()));
        };
        self.set_map(level, map, schema)
    }

    /// Replace level `level` with an already parsed object.
    ///
    /// ## Errors
    ///
    /// Same as [`Config::set`].
    pub fn set_map(&mut self, level: usize, map: Map<String, Value>, schema: Option<&Schema>) -> Result<()>
    {
        if level >= LEVELS {
            return Err(DebuggerError::Config(format!(
                "level {level} out of range (0..{LEVELS})"
            )));
        }
        validate_known_keys(&map).map_err(DebuggerError::Config)?;
        if let Some(schema) = schema {
            schema.validate(&map).map_err(DebuggerError::Config)?;
        }
        self.levels[level] = map;
        self.refresh();
        Ok(())
    }

    /// Install schema defaults as the lowest layer.
    pub fn set_defaults(&mut self, defaults: Map<String, Value>)
    {
        self.defaults = defaults;
        self.refresh();
    }

    /// Clear one level (e.g. the client's overrides on disconnect).
    pub fn clear_level(&mut self, level: usize)
    {
        if let Some(map) = self.levels.get_mut(level) {
            map.clear();
        }
        self.refresh();
    }

    fn refresh(&mut self)
    {
        let mut prefixes = string_list(self.get(keys::SKIP_FILES));
        prefixes.retain(|prefix| !prefix.is_empty());
        self.skip_prefixes = prefixes;
    }

    /// Effective value of `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value>
    {
        self.levels
            .iter()
            .rev()
            .find_map(|level| level.get(key))
            .or_else(|| self.defaults.get(key))
    }

    /// Raw contents of one level.
    #[must_use]
    pub fn level(&self, level: usize) -> Option<&Map<String, Value>>
    {
        self.levels.get(level)
    }

    /// `stopOnEntry`, default `false`.
    #[must_use]
    pub fn stop_on_entry(&self) -> bool
    {
        self.get(keys::STOP_ON_ENTRY)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// `consoleCoding`, default UTF-8.
    #[must_use]
    pub fn console_coding(&self) -> ConsoleCoding
    {
        self.get(keys::CONSOLE_CODING)
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok())
            .unwrap_or_default()
    }

    /// `sourceCoding`, if set.
    #[must_use]
    pub fn source_coding(&self) -> Option<&str>
    {
        self.get(keys::SOURCE_CODING).and_then(Value::as_str)
    }

    /// `exceptionFilters`: unknown names are skipped.
    #[must_use]
    pub fn exception_filters(&self) -> Vec<ExceptionKind>
    {
        string_list(self.get(keys::EXCEPTION_FILTERS))
            .iter()
            .filter_map(|s| s.parse().ok())
            .collect()
    }

    /// `skipFiles`: source path prefixes never stopped in. Empty entries
    /// are dropped.
    #[must_use]
    pub fn skip_files(&self) -> &[String]
    {
        &self.skip_prefixes
    }
}

fn string_list(value: Option<&Value>) -> Vec<String>
{
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn validate_known_keys(map: &Map<String, Value>) -> std::result::Result<(), String>
{
    if let Some(v) = map.get(keys::STOP_ON_ENTRY) {
        if !v.is_boolean() {
            return Err(format!("`{}` must be a boolean", keys::STOP_ON_ENTRY));
        }
    }
    if let Some(v) = map.get(keys::CONSOLE_CODING) {
        let coding = v
            .as_str()
            .ok_or_else(|| format!("`{}` must be a string", keys::CONSOLE_CODING))?;
        coding.parse::<ConsoleCoding>()?;
    }
    if let Some(v) = map.get(keys::SOURCE_CODING) {
        if !v.is_string() {
            return Err(format!("`{}` must be a string", keys::SOURCE_CODING));
        }
    }
    for key in [keys::EXCEPTION_FILTERS, keys::SKIP_FILES] {
        if let Some(v) = map.get(key) {
            let ok = v
                .as_array()
                .is_some_and(|items| items.iter().all(Value::is_string));
            if !ok {
                return Err(format!("`{key}` must be an array of strings"));
            }
        }
    }
    Ok(())
}
