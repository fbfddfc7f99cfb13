//! Built-in plugins and the name-based plugin registry.
//!
//! Plugins are resolved once per run from configuration. An unknown name is a
//! configuration error, never a silent no-op.

pub mod evaluators;
pub mod executors;
pub mod registry;
pub mod strategies;

use std::path::Path;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Arguments handed to a plugin factory.
#[derive(Debug, Clone, Copy)]
pub struct PluginArgs<'a> {
    /// Instance name (evaluators) or plugin name.
    pub name: &'a str,
    /// Plugin-specific options from the config table.
    pub options: &'a Value,
    /// Directory relative paths in options resolve against.
    pub base_dir: &'a Path,
}

impl PluginArgs<'_> {
    /// Deserialize the options table into a typed struct.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T> {
        let options = if self.options.is_null() {
            Value::Object(serde_json::Map::new())
        } else {
            self.options.clone()
        };
        serde_json::from_value(options).with_context(|| format!("parse options for {}", self.name))
    }
}
