//! Test-only helpers: deterministic fixtures and scripted collaborators.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Result, bail};
use serde_json::{Value, json};

use crate::core::evaluate::{EvalInput, Evaluator};
use crate::core::execute::Executor;
use crate::core::select::SelectionStrategy;
use crate::core::types::{
    Combination, EvaluationRecord, EvaluatorEntry, ExecutionOutcome,
    ExperimentResult, ExperimentSnapshot, InputItem, RankedCombination, RawResult, Score,
    SnapshotMeta,
};
use crate::error::EngineError;
use crate::io::checkpoint::CheckpointStore;
use crate::io::display::DisplaySink;

/// Items `item-0 .. item-{n-1}` with `{"n": i}` content.
pub fn items(n: usize) -> Vec<InputItem> {
    (0..n).map(|i| InputItem::new(format!("item-{i}"), json!({ "n": i }))).collect()
}

pub fn item(id: &str) -> InputItem {
    InputItem::new(id, json!({ "id": id }))
}

/// Combinations over a single `v` dimension taking values `0 .. n-1`.
pub fn combinations(n: usize) -> Vec<Combination> {
    (0..n).map(|i| combination(i, &[("v", json!(i))])).collect()
}

pub fn combination(index: usize, values: &[(&str, Value)]) -> Combination {
    Combination {
        index,
        values: values
            .iter()
            .map(|(name, value)| ((*name).to_string(), value.clone()))
            .collect(),
    }
}

/// A successful pair whose output echoes the pair identity.
pub fn raw_result(item_id: &str, index: usize) -> RawResult {
    scored_result(item_id, index, &[])
}

pub fn scored_result(item_id: &str, index: usize, scores: &[(&str, f64)]) -> RawResult {
    RawResult {
        item_id: item_id.to_string(),
        combination: combination(index, &[("v", json!(index))]),
        outcome: ExecutionOutcome::Output {
            value: json!(format!("{item_id}/{index}")),
        },
        evaluation: EvaluationRecord {
            scores: scores
                .iter()
                .map(|(name, value)| EvaluatorEntry {
                    evaluator: (*name).to_string(),
                    score: Score::new(*value).into(),
                })
                .collect(),
            not_evaluable: false,
        },
        duration_ms: 1,
    }
}

/// A pair whose executor failed.
pub fn failed_result(item_id: &str, index: usize) -> RawResult {
    RawResult {
        item_id: item_id.to_string(),
        combination: combination(index, &[("v", json!(index))]),
        outcome: ExecutionOutcome::Error {
            message: "scripted failure".to_string(),
        },
        evaluation: EvaluationRecord {
            scores: Vec::new(),
            not_evaluable: true,
        },
        duration_ms: 1,
    }
}

/// An item with one successful result per combination `0 .. n-1`.
pub fn experiment_result(item_id: &str, n: usize) -> ExperimentResult {
    ExperimentResult {
        item: item(item_id),
        results: (0..n).map(|i| raw_result(item_id, i)).collect(),
    }
}

pub fn snapshot(combinations: Vec<Combination>, results: Vec<ExperimentResult>) -> ExperimentSnapshot {
    ExperimentSnapshot {
        meta: SnapshotMeta {
            run_id: "run-test".to_string(),
            name: "test".to_string(),
            space_fingerprint: "0000000000000000".to_string(),
            setup_fingerprint: "0000000000000000".to_string(),
            combinations,
            started_at: "2025-01-01T00:00:00Z".to_string(),
            finished_at: "2025-01-01T00:00:01Z".to_string(),
            complete: true,
        },
        results,
        selection: None,
    }
}

/// Echoes `{item, vars}` and fails on scripted pairs.
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    failures: HashSet<(String, usize)>,
    calls: AtomicUsize,
}

impl ScriptedExecutor {
    pub fn echo() -> Self {
        Self::default()
    }

    pub fn fail_on(mut self, item_id: &str, combination_index: usize) -> Self {
        self.failures.insert((item_id.to_string(), combination_index));
        self
    }

    /// Number of `execute` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Executor for ScriptedExecutor {
    fn execute(&self, item: &InputItem, combination: &Combination) -> Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failures.contains(&(item.id.clone(), combination.index)) {
            bail!("scripted failure for {} at {}", item.id, combination.index);
        }
        Ok(json!({ "item": item.id, "vars": combination.values }))
    }
}

/// Always returns the same score.
#[derive(Debug, Clone)]
pub struct FixedEvaluator {
    name: String,
    value: f64,
}

impl FixedEvaluator {
    pub fn new(name: &str, value: f64) -> Self {
        Self {
            name: name.to_string(),
            value,
        }
    }
}

impl Evaluator for FixedEvaluator {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self, _input: &EvalInput<'_>) -> Result<Score> {
        Ok(Score::new(self.value))
    }
}

/// Always errors.
#[derive(Debug, Clone)]
pub struct FailingEvaluator {
    name: String,
}

impl FailingEvaluator {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

impl Evaluator for FailingEvaluator {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self, _input: &EvalInput<'_>) -> Result<Score> {
        bail!("{} always fails", self.name)
    }
}

/// Ranks from a fixed `(combination index, score)` table.
///
/// Only combinations present in both the table and the item's results are
/// ranked. Items missing from a per-item table rank nothing.
#[derive(Debug, Clone, Default)]
pub struct ScriptedStrategy {
    shared: Vec<(usize, f64)>,
    per_item: BTreeMap<String, Vec<(usize, f64)>>,
}

impl ScriptedStrategy {
    pub fn new(scores: Vec<(usize, f64)>) -> Self {
        Self {
            shared: scores,
            per_item: BTreeMap::new(),
        }
    }

    pub fn per_item(table: Vec<(&str, Vec<(usize, f64)>)>) -> Self {
        Self {
            shared: Vec::new(),
            per_item: table
                .into_iter()
                .map(|(id, scores)| (id.to_string(), scores))
                .collect(),
        }
    }
}

impl SelectionStrategy for ScriptedStrategy {
    fn name(&self) -> &str {
        "scripted"
    }

    fn rank(&self, result: &ExperimentResult) -> Vec<RankedCombination> {
        let table = self
            .per_item
            .get(&result.item.id)
            .unwrap_or(&self.shared);
        table
            .iter()
            .filter_map(|(index, score)| {
                result
                    .results
                    .iter()
                    .find(|r| r.combination.index == *index)
                    .map(|r| RankedCombination::new(&r.combination, *score))
            })
            .collect()
    }
}

/// In-memory checkpoint store recording saves.
#[derive(Debug, Default)]
pub struct MemoryCheckpoint {
    stored: Mutex<Option<ExperimentSnapshot>>,
    corrupt: bool,
    fail_saves: bool,
    saves: AtomicUsize,
}

impl MemoryCheckpoint {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that rejects every write.
    pub fn failing_saves() -> Self {
        Self {
            fail_saves: true,
            ..Self::default()
        }
    }

    /// A store whose stored snapshot cannot be read.
    pub fn corrupt() -> Self {
        Self {
            corrupt: true,
            ..Self::default()
        }
    }

    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn stored(&self) -> Option<ExperimentSnapshot> {
        self.stored.lock().ok().and_then(|guard| guard.clone())
    }
}

impl CheckpointStore for MemoryCheckpoint {
    fn location(&self) -> PathBuf {
        PathBuf::from("memory")
    }

    fn load(&self) -> std::result::Result<Option<ExperimentSnapshot>, EngineError> {
        if self.corrupt {
            return Err(EngineError::CheckpointLoad {
                path: self.location(),
                reason: "scripted corruption".to_string(),
            });
        }
        Ok(self.stored())
    }

    fn save(&self, snapshot: &ExperimentSnapshot) -> Result<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        if self.fail_saves {
            bail!("scripted write failure");
        }
        match self.stored.lock() {
            Ok(mut guard) => {
                *guard = Some(snapshot.clone());
                Ok(())
            }
            Err(_) => bail!("memory checkpoint poisoned"),
        }
    }
}

/// Records every snapshot handed to it.
#[derive(Debug, Default)]
pub struct RecordingSink {
    seen: Mutex<Vec<ExperimentSnapshot>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seen(&self) -> Vec<ExperimentSnapshot> {
        self.seen.lock().map(|guard| guard.clone()).unwrap_or_default()
    }
}

impl DisplaySink for RecordingSink {
    fn display(&self, snapshot: &ExperimentSnapshot) -> Result<()> {
        match self.seen.lock() {
            Ok(mut guard) => {
                guard.push(snapshot.clone());
                Ok(())
            }
            Err(_) => bail!("recording sink poisoned"),
        }
    }
}

