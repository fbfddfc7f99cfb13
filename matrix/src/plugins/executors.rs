//! Built-in execution callables.

use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use minijinja::Environment;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::{debug, instrument};

use crate::core::execute::Executor;
use crate::core::types::{Combination, InputItem};
use crate::io::process::run_command_with_timeout;
use crate::plugins::PluginArgs;

/// Returns the item and combination unchanged; useful for dry runs.
#[derive(Debug, Default)]
pub struct EchoExecutor;

impl Executor for EchoExecutor {
    fn execute(&self, item: &InputItem, combination: &Combination) -> Result<Value> {
        Ok(json!({
            "item": item.content,
            "combination": combination.values,
        }))
    }
}

pub fn echo_factory(_args: &PluginArgs<'_>) -> Result<Arc<dyn Executor>> {
    Ok(Arc::new(EchoExecutor))
}

/// Renders a minijinja template per pair.
///
/// String-valued variations are rendered first (they may reference `item`),
/// then the main template sees `item`, `expected` and every variation by name.
#[derive(Debug, Clone)]
pub struct TemplateExecutor {
    env: Environment<'static>,
}

const TEMPLATE_NAME: &str = "executor";

#[derive(Debug, Deserialize)]
struct TemplateOptions {
    template: String,
}

impl TemplateExecutor {
    pub fn new(source: impl Into<String>) -> Result<Self> {
        let source: String = source.into();
        let mut env = Environment::new();
        env.add_template_owned(TEMPLATE_NAME, source)
            .context("parse executor template")?;
        Ok(Self { env })
    }
}

impl Executor for TemplateExecutor {
    fn execute(&self, item: &InputItem, combination: &Combination) -> Result<Value> {
        let base = json!({
            "item": item.content,
            "expected": item.expected,
        });

        let mut context = Map::new();
        context.insert("item".to_string(), item.content.clone());
        context.insert(
            "expected".to_string(),
            item.expected.clone().unwrap_or(Value::Null),
        );
        for (name, value) in &combination.values {
            let rendered = match value {
                Value::String(raw) => Value::String(
                    self.env
                        .render_str(raw, &base)
                        .with_context(|| format!("render variation {name}"))?,
                ),
                other => other.clone(),
            };
            context.insert(name.clone(), rendered);
        }

        let rendered = self
            .env
            .get_template(TEMPLATE_NAME)
            .context("load executor template")?
            .render(Value::Object(context))
            .context("render executor template")?;
        Ok(Value::String(rendered))
    }
}

pub fn template_factory(args: &PluginArgs<'_>) -> Result<Arc<dyn Executor>> {
    let options: TemplateOptions = args.parse()?;
    Ok(Arc::new(TemplateExecutor::new(options.template)?))
}

/// Spawns a command per pair.
///
/// The child receives `{"item": .., "expected": .., "combination": ..}` as JSON
/// on stdin. Stdout is parsed as JSON when possible, otherwise returned as a
/// trimmed string. A non-zero exit or timeout is an execution error.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    command: Vec<String>,
    workdir: PathBuf,
    timeout: Option<Duration>,
    output_limit_bytes: usize,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct CommandOptions {
    command: Vec<String>,
    timeout_secs: Option<u64>,
    output_limit_bytes: usize,
}

impl Default for CommandOptions {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            timeout_secs: None,
            output_limit_bytes: 1_000_000,
        }
    }
}

impl CommandExecutor {
    pub fn new(command: Vec<String>, workdir: PathBuf) -> Result<Self> {
        if command.is_empty() || command[0].trim().is_empty() {
            bail!("command must be a non-empty array");
        }
        Ok(Self {
            command,
            workdir,
            timeout: None,
            output_limit_bytes: 1_000_000,
        })
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_output_limit(mut self, limit: usize) -> Self {
        self.output_limit_bytes = limit;
        self
    }
}

impl Executor for CommandExecutor {
    #[instrument(skip_all, fields(item = %item.id, combination = combination.index))]
    fn execute(&self, item: &InputItem, combination: &Combination) -> Result<Value> {
        let payload = serde_json::to_vec(&json!({
            "item": item.content,
            "expected": item.expected,
            "combination": combination.values,
        }))
        .context("serialize command input")?;

        let mut cmd = Command::new(&self.command[0]);
        cmd.args(&self.command[1..]).current_dir(&self.workdir);
        let output =
            run_command_with_timeout(cmd, Some(&payload), self.timeout, self.output_limit_bytes)
                .with_context(|| format!("run {:?}", self.command))?;

        if output.timed_out {
            bail!("command timed out after {:?}", self.timeout.unwrap_or_default());
        }
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "command failed with status {:?}: {}",
                output.status.code(),
                stderr.trim()
            );
        }
        if output.stdout_truncated > 0 {
            bail!(
                "command output exceeded {} bytes ({} bytes dropped)",
                self.output_limit_bytes,
                output.stdout_truncated
            );
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let trimmed = stdout.trim();
        debug!(bytes = trimmed.len(), "command output captured");
        Ok(serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(trimmed.to_string())))
    }
}

pub fn command_factory(args: &PluginArgs<'_>) -> Result<Arc<dyn Executor>> {
    let options: CommandOptions = args.parse()?;
    if options.output_limit_bytes == 0 {
        bail!("output_limit_bytes must be > 0");
    }
    let executor = CommandExecutor::new(options.command, args.base_dir.to_path_buf())?
        .with_timeout(options.timeout_secs.map(Duration::from_secs))
        .with_output_limit(options.output_limit_bytes);
    Ok(Arc::new(executor))
}
