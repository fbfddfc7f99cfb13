//! Shared data model of an experiment run.
//!
//! Every type here serializes losslessly with serde so that a snapshot written
//! to a checkpoint reads back equal to the in-memory value.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// A named variation axis with its ordered candidate values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariationDimension {
    pub name: String,
    pub values: Vec<Value>,
}

impl VariationDimension {
    pub fn new(name: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }
}

/// One concrete assignment of a value to every variation dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Combination {
    /// Position in the variation space enumeration order.
    pub index: usize,
    pub values: BTreeMap<String, Value>,
}

impl Combination {
    pub fn get(&self, dimension: &str) -> Option<&Value> {
        self.values.get(dimension)
    }

    /// Stable identity derived from the value mapping only (16 hex chars).
    pub fn key(&self) -> String {
        // BTreeMap and serde_json maps serialize with sorted keys.
        let canonical = serde_json::to_string(&self.values).unwrap_or_default();
        content_hash(&canonical)
    }

    /// Human readable `name=value` list, sorted by dimension name.
    pub fn label(&self) -> String {
        if self.values.is_empty() {
            return "(baseline)".to_string();
        }
        let mut out = String::new();
        for (i, (name, value)) in self.values.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            match value {
                Value::String(s) => {
                    let _ = write!(out, "{name}={s}");
                }
                other => {
                    let _ = write!(out, "{name}={other}");
                }
            }
        }
        out
    }
}

/// Compute a short hash of content (first 8 bytes of SHA-256, hex encoded).
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let result = hasher.finalize();
    hex::encode(&result[..8])
}

/// One unit of the dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputItem {
    /// Identity used to group results; unique within a run.
    pub id: String,
    pub content: Value,
    /// Reference result for evaluators that compare against one.
    #[serde(default)]
    pub expected: Option<Value>,
}

impl InputItem {
    pub fn new(id: impl Into<String>, content: Value) -> Self {
        Self {
            id: id.into(),
            content,
            expected: None,
        }
    }

    pub fn with_expected(mut self, expected: Value) -> Self {
        self.expected = Some(expected);
        self
    }
}

/// Successful measurement produced by one evaluator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Score {
    pub value: f64,
    #[serde(default)]
    pub metadata: Value,
}

impl Score {
    pub fn new(value: f64) -> Self {
        Self {
            value,
            metadata: Value::Null,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Outcome of one evaluator for one executed pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EvaluatorScore {
    Scored {
        value: f64,
        #[serde(default)]
        metadata: Value,
    },
    Failed {
        error: String,
    },
}

impl EvaluatorScore {
    pub fn value(&self) -> Option<f64> {
        match self {
            EvaluatorScore::Scored { value, .. } => Some(*value),
            EvaluatorScore::Failed { .. } => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, EvaluatorScore::Failed { .. })
    }
}

impl From<Score> for EvaluatorScore {
    fn from(score: Score) -> Self {
        EvaluatorScore::Scored {
            value: score.value,
            metadata: score.metadata,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluatorEntry {
    pub evaluator: String,
    pub score: EvaluatorScore,
}

/// Scores of every registered evaluator, in registration order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub scores: Vec<EvaluatorEntry>,
    /// Set when the execution itself failed and no evaluator could run.
    #[serde(default)]
    pub not_evaluable: bool,
}

impl EvaluationRecord {
    pub fn get(&self, evaluator: &str) -> Option<&EvaluatorScore> {
        self.scores
            .iter()
            .find(|entry| entry.evaluator == evaluator)
            .map(|entry| &entry.score)
    }

    pub fn value(&self, evaluator: &str) -> Option<f64> {
        self.get(evaluator).and_then(EvaluatorScore::value)
    }

    pub fn failures(&self) -> usize {
        self.scores
            .iter()
            .filter(|entry| entry.score.is_failed())
            .count()
    }
}

/// What the executor produced for one (item, combination) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Output { value: Value },
    Error { message: String },
}

impl ExecutionOutcome {
    pub fn output(&self) -> Option<&Value> {
        match self {
            ExecutionOutcome::Output { value } => Some(value),
            ExecutionOutcome::Error { .. } => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ExecutionOutcome::Error { .. })
    }
}

/// Result of executing and scoring one (item, combination) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawResult {
    pub item_id: String,
    pub combination: Combination,
    pub outcome: ExecutionOutcome,
    pub evaluation: EvaluationRecord,
    pub duration_ms: u64,
}

/// All results produced for one input item, in combination order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentResult {
    pub item: InputItem,
    pub results: Vec<RawResult>,
}

impl ExperimentResult {
    pub fn failed_pairs(&self) -> usize {
        self.results.iter().filter(|r| r.outcome.is_error()).count()
    }
}

/// Run identity and shape recorded alongside the results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub run_id: String,
    pub name: String,
    /// Hash of the variation dimensions the results were produced with.
    pub space_fingerprint: String,
    /// Hash of the evaluator chain and dataset setup; empty in older snapshots.
    #[serde(default)]
    pub setup_fingerprint: String,
    pub combinations: Vec<Combination>,
    pub started_at: String,
    pub finished_at: String,
    /// False when the execution pass was cancelled before finishing.
    pub complete: bool,
}

/// A ranked combination for one item (or globally).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedCombination {
    pub combination_index: usize,
    pub key: String,
    pub score: f64,
    /// Ineligible entries (e.g. failed executions) always rank last.
    #[serde(default = "default_eligible")]
    pub eligible: bool,
    #[serde(default)]
    pub reason: String,
}

fn default_eligible() -> bool {
    true
}

impl RankedCombination {
    pub fn new(combination: &Combination, score: f64) -> Self {
        Self {
            combination_index: combination.index,
            key: combination.key(),
            score,
            eligible: true,
            reason: String::new(),
        }
    }

    pub fn ineligible(combination: &Combination, reason: impl Into<String>) -> Self {
        Self {
            eligible: false,
            reason: reason.into(),
            ..Self::new(combination, 0.0)
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemSelection {
    pub item_id: String,
    pub ranking: Vec<RankedCombination>,
}

impl ItemSelection {
    pub fn best(&self) -> Option<&RankedCombination> {
        self.ranking.first()
    }
}

/// Selection annotation attached to a snapshot. Never alters the results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionOutcome {
    pub strategy: String,
    pub per_item: Vec<ItemSelection>,
    pub global: Vec<RankedCombination>,
}

impl SelectionOutcome {
    pub fn for_item(&self, item_id: &str) -> Option<&ItemSelection> {
        self.per_item.iter().find(|s| s.item_id == item_id)
    }
}

/// Full aggregated result set of a run; the unit of checkpointing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentSnapshot {
    pub meta: SnapshotMeta,
    pub results: Vec<ExperimentResult>,
    #[serde(default)]
    pub selection: Option<SelectionOutcome>,
}

impl ExperimentSnapshot {
    pub fn pair_count(&self) -> usize {
        self.results.iter().map(|r| r.results.len()).sum()
    }

    pub fn failed_pairs(&self) -> usize {
        self.results.iter().map(ExperimentResult::failed_pairs).sum()
    }

    pub fn combination(&self, index: usize) -> Option<&Combination> {
        self.meta.combinations.iter().find(|c| c.index == index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn combination(values: &[(&str, Value)]) -> Combination {
        Combination {
            index: 0,
            values: values
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        }
    }

    #[test]
    fn content_hash_is_short_and_deterministic() {
        let a = content_hash("hello");
        assert_eq!(a, content_hash("hello"));
        assert_eq!(a.len(), 16);
        assert_ne!(a, content_hash("world"));
    }

    #[test]
    fn combination_key_ignores_index() {
        let mut a = combination(&[("prompt", json!("a")), ("temp", json!(0.2))]);
        let b = a.clone();
        a.index = 7;
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn combination_label_lists_values() {
        let c = combination(&[("temp", json!(0.2)), ("prompt", json!("short"))]);
        assert_eq!(c.label(), "prompt=short, temp=0.2");
        assert_eq!(combination(&[]).label(), "(baseline)");
    }

    #[test]
    fn evaluator_score_serializes_with_status_tag() {
        let scored = EvaluatorScore::from(Score::new(0.5));
        let json = serde_json::to_value(&scored).expect("json");
        assert_eq!(json["status"], "scored");
        let failed = EvaluatorScore::Failed {
            error: "boom".to_string(),
        };
        let json = serde_json::to_value(&failed).expect("json");
        assert_eq!(json, json!({"status": "failed", "error": "boom"}));
    }

    #[test]
    fn record_lookup_by_evaluator_name() {
        let record = EvaluationRecord {
            scores: vec![
                EvaluatorEntry {
                    evaluator: "exact".to_string(),
                    score: Score::new(1.0).into(),
                },
                EvaluatorEntry {
                    evaluator: "regex".to_string(),
                    score: EvaluatorScore::Failed {
                        error: "bad".to_string(),
                    },
                },
            ],
            not_evaluable: false,
        };
        assert_eq!(record.value("exact"), Some(1.0));
        assert_eq!(record.value("regex"), None);
        assert_eq!(record.failures(), 1);
        assert!(record.get("missing").is_none());
    }
}
