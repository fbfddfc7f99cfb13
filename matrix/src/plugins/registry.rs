//! Name -> capability mapping for executors, evaluators, strategies and data
//! sources.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;

use crate::core::evaluate::Evaluator;
use crate::core::execute::Executor;
use crate::core::select::SelectionStrategy;
use crate::error::EngineError;
use crate::io::dataset::{self, DataSource};
use crate::plugins::{PluginArgs, evaluators, executors, strategies};

pub type Factory<T> = Arc<dyn Fn(&PluginArgs<'_>) -> Result<Arc<T>> + Send + Sync>;

/// Registered plugin factories, keyed by plugin name.
#[derive(Clone, Default)]
pub struct Registry {
    executors: BTreeMap<String, Factory<dyn Executor>>,
    evaluators: BTreeMap<String, Factory<dyn Evaluator>>,
    strategies: BTreeMap<String, Factory<dyn SelectionStrategy>>,
    sources: BTreeMap<String, Factory<dyn DataSource>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with every built-in plugin.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_executor("echo", executors::echo_factory);
        registry.register_executor("template", executors::template_factory);
        registry.register_executor("command", executors::command_factory);
        registry.register_evaluator("exact_match", evaluators::exact_match_factory);
        registry.register_evaluator("regex_match", evaluators::regex_match_factory);
        registry.register_evaluator("json_schema", evaluators::json_schema_factory);
        registry.register_evaluator("length", evaluators::length_factory);
        registry.register_strategy("weighted_sum", strategies::weighted_sum_factory);
        registry.register_strategy("pass_rate", strategies::pass_rate_factory);
        registry.register_source("inline", dataset::inline_factory);
        registry.register_source("jsonl", dataset::jsonl_factory);
        registry.register_source("json", dataset::json_factory);
        registry
    }

    pub fn register_executor(
        &mut self,
        name: &str,
        factory: impl Fn(&PluginArgs<'_>) -> Result<Arc<dyn Executor>> + Send + Sync + 'static,
    ) {
        self.executors.insert(name.to_string(), Arc::new(factory));
    }

    pub fn register_evaluator(
        &mut self,
        name: &str,
        factory: impl Fn(&PluginArgs<'_>) -> Result<Arc<dyn Evaluator>> + Send + Sync + 'static,
    ) {
        self.evaluators.insert(name.to_string(), Arc::new(factory));
    }

    pub fn register_strategy(
        &mut self,
        name: &str,
        factory: impl Fn(&PluginArgs<'_>) -> Result<Arc<dyn SelectionStrategy>>
        + Send
        + Sync
        + 'static,
    ) {
        self.strategies.insert(name.to_string(), Arc::new(factory));
    }

    pub fn register_source(
        &mut self,
        name: &str,
        factory: impl Fn(&PluginArgs<'_>) -> Result<Arc<dyn DataSource>> + Send + Sync + 'static,
    ) {
        self.sources.insert(name.to_string(), Arc::new(factory));
    }

    pub fn executor(
        &self,
        plugin: &str,
        args: &PluginArgs<'_>,
    ) -> Result<Arc<dyn Executor>, EngineError> {
        resolve("executor", &self.executors, plugin, args)
    }

    pub fn evaluator(
        &self,
        plugin: &str,
        args: &PluginArgs<'_>,
    ) -> Result<Arc<dyn Evaluator>, EngineError> {
        resolve("evaluator", &self.evaluators, plugin, args)
    }

    pub fn strategy(
        &self,
        plugin: &str,
        args: &PluginArgs<'_>,
    ) -> Result<Arc<dyn SelectionStrategy>, EngineError> {
        resolve("selection strategy", &self.strategies, plugin, args)
    }

    pub fn source(
        &self,
        plugin: &str,
        args: &PluginArgs<'_>,
    ) -> Result<Arc<dyn DataSource>, EngineError> {
        resolve("data source", &self.sources, plugin, args)
    }

    /// Names of every registered plugin, grouped by kind.
    pub fn names(&self) -> Vec<(&'static str, Vec<&str>)> {
        vec![
            ("executor", self.executors.keys().map(String::as_str).collect()),
            ("evaluator", self.evaluators.keys().map(String::as_str).collect()),
            ("strategy", self.strategies.keys().map(String::as_str).collect()),
            ("source", self.sources.keys().map(String::as_str).collect()),
        ]
    }
}

fn resolve<T: ?Sized>(
    kind: &str,
    table: &BTreeMap<String, Factory<T>>,
    plugin: &str,
    args: &PluginArgs<'_>,
) -> Result<Arc<T>, EngineError> {
    let factory = table.get(plugin).ok_or_else(|| {
        let known: Vec<&str> = table.keys().map(String::as_str).collect();
        EngineError::config(format!(
            "unknown {kind} plugin {plugin} (known: {})",
            known.join(", ")
        ))
    })?;
    factory(args).map_err(|err| EngineError::config(format!("{kind} {}: {err:#}", args.name)))
}
