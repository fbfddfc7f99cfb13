//! Dataset collaborators producing batches of input items.

use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::core::types::InputItem;
use crate::plugins::PluginArgs;

/// A group of items; batches are a progress-accounting unit only.
pub type Batch = Vec<InputItem>;

/// Produces the items of a run lazily, batch by batch.
pub trait DataSource: Send + Sync {
    fn batches(&self) -> Result<Box<dyn Iterator<Item = Result<Batch>> + '_>>;
}

/// How raw JSON records map onto [`InputItem`]s.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ItemMapping {
    /// Field holding the item id; records without it get `item-<n>`.
    pub id_field: String,
    /// Field holding the expected result; removed from the content.
    pub expected_field: String,
}

impl Default for ItemMapping {
    fn default() -> Self {
        Self {
            id_field: "id".to_string(),
            expected_field: "expected".to_string(),
        }
    }
}

impl ItemMapping {
    pub fn to_item(&self, record: Value, position: usize) -> InputItem {
        let fallback = format!("item-{position}");
        match record {
            Value::Object(mut map) => {
                let id = match map.get(&self.id_field) {
                    Some(Value::String(s)) => s.clone(),
                    Some(Value::Number(n)) => n.to_string(),
                    _ => fallback,
                };
                let expected = map.remove(&self.expected_field);
                InputItem {
                    id,
                    content: Value::Object(map),
                    expected,
                }
            }
            other => InputItem::new(fallback, other),
        }
    }
}

fn chunk(items: Vec<InputItem>, batch_size: usize) -> Vec<Batch> {
    let size = batch_size.max(1);
    let mut batches = Vec::new();
    let mut iter = items.into_iter().peekable();
    while iter.peek().is_some() {
        batches.push(iter.by_ref().take(size).collect());
    }
    batches
}

const DEFAULT_BATCH_SIZE: usize = 32;

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

/// Items listed directly in the config file.
#[derive(Debug, Clone)]
pub struct InlineSource {
    items: Vec<InputItem>,
    batch_size: usize,
}

#[derive(Debug, Deserialize)]
struct InlineOptions {
    #[serde(default)]
    items: Vec<Value>,
    #[serde(default = "default_batch_size")]
    batch_size: usize,
    #[serde(flatten)]
    mapping: ItemMapping,
}

impl InlineSource {
    pub fn new(items: Vec<InputItem>, batch_size: usize) -> Self {
        Self { items, batch_size }
    }
}

impl DataSource for InlineSource {
    fn batches(&self) -> Result<Box<dyn Iterator<Item = Result<Batch>> + '_>> {
        Ok(Box::new(
            chunk(self.items.clone(), self.batch_size)
                .into_iter()
                .map(Ok),
        ))
    }
}

pub fn inline_factory(args: &PluginArgs<'_>) -> Result<Arc<dyn DataSource>> {
    let options: InlineOptions = args.parse()?;
    let items = options
        .items
        .into_iter()
        .enumerate()
        .map(|(i, record)| options.mapping.to_item(record, i))
        .collect();
    Ok(Arc::new(InlineSource::new(items, options.batch_size)))
}

/// Newline-delimited JSON records, read lazily.
#[derive(Debug, Clone)]
pub struct JsonlSource {
    path: PathBuf,
    batch_size: usize,
    mapping: ItemMapping,
}

#[derive(Debug, Deserialize)]
struct FileOptions {
    path: PathBuf,
    #[serde(default = "default_batch_size")]
    batch_size: usize,
    #[serde(flatten)]
    mapping: ItemMapping,
}

impl JsonlSource {
    pub fn new(path: PathBuf, batch_size: usize, mapping: ItemMapping) -> Self {
        Self {
            path,
            batch_size,
            mapping,
        }
    }
}

struct JsonlBatches<'a> {
    source: &'a JsonlSource,
    lines: std::io::Lines<BufReader<File>>,
    line_no: usize,
    position: usize,
    done: bool,
}

impl Iterator for JsonlBatches<'_> {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Result<Batch>> {
        if self.done {
            return None;
        }
        let mut batch = Vec::new();
        while batch.len() < self.source.batch_size.max(1) {
            let Some(line) = self.lines.next() else {
                self.done = true;
                break;
            };
            self.line_no += 1;
            let line = match line
                .with_context(|| format!("read {}", self.source.path.display()))
            {
                Ok(line) => line,
                Err(err) => {
                    self.done = true;
                    return Some(Err(err));
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Value>(&line) {
                Ok(record) => {
                    batch.push(self.source.mapping.to_item(record, self.position));
                    self.position += 1;
                }
                Err(err) => {
                    self.done = true;
                    return Some(Err(anyhow::Error::new(err).context(format!(
                        "parse {} line {}",
                        self.source.path.display(),
                        self.line_no
                    ))));
                }
            }
        }
        if batch.is_empty() {
            return None;
        }
        debug!(items = batch.len(), "jsonl batch read");
        Some(Ok(batch))
    }
}

impl DataSource for JsonlSource {
    fn batches(&self) -> Result<Box<dyn Iterator<Item = Result<Batch>> + '_>> {
        let file =
            File::open(&self.path).with_context(|| format!("open {}", self.path.display()))?;
        Ok(Box::new(JsonlBatches {
            source: self,
            lines: BufReader::new(file).lines(),
            line_no: 0,
            position: 0,
            done: false,
        }))
    }
}

pub fn jsonl_factory(args: &PluginArgs<'_>) -> Result<Arc<dyn DataSource>> {
    let options: FileOptions = args.parse()?;
    Ok(Arc::new(JsonlSource::new(
        resolve(args.base_dir, &options.path),
        options.batch_size,
        options.mapping,
    )))
}

/// A JSON file holding an array of records.
#[derive(Debug, Clone)]
pub struct JsonArraySource {
    path: PathBuf,
    batch_size: usize,
    mapping: ItemMapping,
}

impl DataSource for JsonArraySource {
    fn batches(&self) -> Result<Box<dyn Iterator<Item = Result<Batch>> + '_>> {
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("read {}", self.path.display()))?;
        let records: Value = serde_json::from_str(&contents)
            .with_context(|| format!("parse {}", self.path.display()))?;
        let Value::Array(records) = records else {
            bail!("{} must contain a JSON array", self.path.display());
        };
        let items = records
            .into_iter()
            .enumerate()
            .map(|(i, record)| self.mapping.to_item(record, i))
            .collect();
        Ok(Box::new(chunk(items, self.batch_size).into_iter().map(Ok)))
    }
}

pub fn json_factory(args: &PluginArgs<'_>) -> Result<Arc<dyn DataSource>> {
    let options: FileOptions = args.parse()?;
    Ok(Arc::new(JsonArraySource {
        path: resolve(args.base_dir, &options.path),
        batch_size: options.batch_size,
        mapping: options.mapping,
    }))
}

fn resolve(base_dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}
