//! Experiment configuration (TOML).
//!
//! Plugin sections keep their plugin-specific keys in a flattened `options`
//! table that is handed to the plugin factory untouched.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::types::VariationDimension;
use crate::core::variation::VariationSpace;

/// Top-level experiment configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExperimentConfig {
    pub name: String,

    /// Fail before execution when no evaluator is configured.
    #[serde(default = "default_true")]
    pub scoring_required: bool,

    #[serde(default)]
    pub variations: Vec<VariationDimension>,

    pub dataset: DatasetConfig,

    pub executor: ExecutorConfig,

    #[serde(default)]
    pub evaluators: Vec<EvaluatorConfig>,

    /// Selection is skipped entirely when absent.
    #[serde(default)]
    pub selection: Option<SelectionConfig>,

    #[serde(default)]
    pub checkpoint: Option<CheckpointConfig>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatasetConfig {
    /// Data source plugin (`inline`, `jsonl`, `json`, or a custom one).
    pub source: String,
    #[serde(flatten)]
    pub options: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutorConfig {
    pub plugin: String,
    #[serde(flatten)]
    pub options: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvaluatorConfig {
    pub plugin: String,
    /// Name the scores are recorded under; defaults to the plugin name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub options: Map<String, Value>,
}

impl EvaluatorConfig {
    pub fn instance_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.plugin)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SelectionConfig {
    pub strategy: String,
    #[serde(flatten)]
    pub options: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckpointConfig {
    /// Snapshot file; relative paths resolve against the config directory.
    pub path: PathBuf,
}

impl ExperimentConfig {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(anyhow!("name must be non-empty"));
        }
        if self.dataset.source.trim().is_empty() {
            return Err(anyhow!("dataset.source must be non-empty"));
        }
        if self.executor.plugin.trim().is_empty() {
            return Err(anyhow!("executor.plugin must be non-empty"));
        }
        for (index, evaluator) in self.evaluators.iter().enumerate() {
            if evaluator.plugin.trim().is_empty() {
                return Err(anyhow!("evaluators[{index}].plugin must be non-empty"));
            }
        }
        if let Some(selection) = &self.selection
            && selection.strategy.trim().is_empty()
        {
            return Err(anyhow!("selection.strategy must be non-empty"));
        }
        if let Some(checkpoint) = &self.checkpoint
            && checkpoint.path.as_os_str().is_empty()
        {
            return Err(anyhow!("checkpoint.path must be non-empty"));
        }
        Ok(())
    }

    pub fn variation_space(&self) -> VariationSpace {
        VariationSpace::new(self.variations.clone())
    }

    /// Parse and validate config text.
    pub fn parse_str(contents: &str) -> Result<Self> {
        let cfg: ExperimentConfig = toml::from_str(contents).context("parse config")?;
        cfg.validate()?;
        Ok(cfg)
    }
}

/// Load and validate a config file.
pub fn load_config(path: &Path) -> Result<ExperimentConfig> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: ExperimentConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &ExperimentConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

/// Directory that relative paths in a config file resolve against.
pub fn base_dir(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = base_dir(path);
    fs::create_dir_all(&parent)
        .with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SAMPLE: &str = r#"
name = "summaries"

[[variations]]
name = "prompt"
values = ["Summarize: {{ item.text }}", "TL;DR {{ item.text }}"]

[[variations]]
name = "temperature"
values = [0.0, 0.7]

[dataset]
source = "jsonl"
path = "data.jsonl"
batch_size = 10

[executor]
plugin = "template"
template = "{{ prompt }}"

[[evaluators]]
plugin = "regex_match"
name = "mentions-cat"
pattern = "cat"

[[evaluators]]
plugin = "length"

[selection]
strategy = "weighted_sum"
weights = { "mentions-cat" = 2.0 }

[checkpoint]
path = "snapshot.json"
"#;

    #[test]
    fn parses_full_config() {
        let cfg = ExperimentConfig::parse_str(SAMPLE).expect("config");
        assert_eq!(cfg.name, "summaries");
        assert!(cfg.scoring_required);
        assert_eq!(cfg.variations.len(), 2);
        assert_eq!(cfg.variation_space().size(), 4);
        assert_eq!(cfg.dataset.options["batch_size"], json!(10));
        assert_eq!(cfg.executor.options["template"], json!("{{ prompt }}"));
        assert_eq!(cfg.evaluators[0].instance_name(), "mentions-cat");
        assert_eq!(cfg.evaluators[1].instance_name(), "length");
        let selection = cfg.selection.expect("selection");
        assert_eq!(selection.options["weights"]["mentions-cat"], json!(2.0));
        assert_eq!(
            cfg.checkpoint.expect("checkpoint").path,
            PathBuf::from("snapshot.json")
        );
    }

    #[test]
    fn selection_and_checkpoint_are_optional() {
        let cfg = ExperimentConfig::parse_str(
            r#"
name = "minimal"
[dataset]
source = "inline"
[executor]
plugin = "echo"
"#,
        )
        .expect("config");
        assert!(cfg.selection.is_none());
        assert!(cfg.checkpoint.is_none());
        assert!(cfg.variations.is_empty());
    }

    #[test]
    fn rejects_empty_executor() {
        let err = ExperimentConfig::parse_str(
            r#"
name = "x"
[dataset]
source = "inline"
[executor]
plugin = ""
"#,
        )
        .expect_err("invalid");
        assert!(err.to_string().contains("executor.plugin"));
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("experiment.toml");
        let cfg = ExperimentConfig::parse_str(SAMPLE).expect("config");
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn base_dir_defaults_to_current_dir() {
        assert_eq!(base_dir(Path::new("experiment.toml")), PathBuf::from("."));
        assert_eq!(
            base_dir(Path::new("lab/experiment.toml")),
            PathBuf::from("lab")
        );
    }
}
