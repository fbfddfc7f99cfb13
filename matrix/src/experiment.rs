//! Orchestration of one experiment run.
//!
//! A [`RunContext`] owns every collaborator of a run; [`run_experiment`] drives
//! it through the [`RunPhase`] lifecycle: enumerate, try the checkpoint,
//! execute and fold batch by batch, save, select, display.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use rand::{Rng, distributions::Alphanumeric};
use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};

use crate::core::aggregate::ResultAggregator;
use crate::core::evaluate::{Evaluator, EvaluatorChain};
use crate::core::execute::{CancelToken, ExecutionLoop, Executor, Progress};
use crate::core::select::{SelectionStrategy, select_optional};
use crate::core::state::{RunPhase, RunState};
use crate::core::types::{Combination, ExperimentSnapshot, SnapshotMeta, content_hash};
use crate::core::variation::VariationSpace;
use crate::error::{EngineError, Result};
use crate::io::checkpoint::{CheckpointStore, FileCheckpointStore};
use crate::io::config::ExperimentConfig;
use crate::io::dataset::DataSource;
use crate::io::display::DisplaySink;
use crate::plugins::PluginArgs;
use crate::plugins::registry::Registry;

/// How a stored snapshot is used before execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResumeMode {
    /// Never load; always execute (and overwrite the snapshot).
    Off,
    /// Reuse a usable snapshot; an unusable one is reported and recomputed.
    #[default]
    Auto,
    /// A usable snapshot must exist; anything else aborts the run.
    Required,
}

/// Caller overrides applied on top of the config file.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub resume: ResumeMode,
    /// Snapshot path replacing `[checkpoint] path`.
    pub checkpoint: Option<PathBuf>,
}

/// Progress notification: one per produced result, tagged with its batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchProgress {
    /// Zero-based batch number.
    pub batch: usize,
    /// Progress within the batch.
    pub progress: Progress,
    /// Results produced so far over the whole run.
    pub completed: usize,
}

type BatchProgressFn = Box<dyn FnMut(BatchProgress)>;

/// Everything one run needs, resolved up front.
pub struct RunContext {
    name: String,
    space: VariationSpace,
    scoring_required: bool,
    executor: Arc<dyn Executor>,
    chain: EvaluatorChain,
    strategy: Option<Arc<dyn SelectionStrategy>>,
    source: Arc<dyn DataSource>,
    /// Describes the dataset and evaluator configuration for resume checks.
    setup: Value,
    checkpoint: Option<Arc<dyn CheckpointStore>>,
    resume: ResumeMode,
    cancel: CancelToken,
    sinks: Vec<Arc<dyn DisplaySink>>,
    progress: Option<BatchProgressFn>,
}

impl fmt::Debug for RunContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunContext")
            .field("name", &self.name)
            .field("space", &self.space)
            .field("chain", &self.chain)
            .field("strategy", &self.strategy.as_ref().map(|s| s.name().to_string()))
            .field("checkpoint", &self.checkpoint.as_ref().map(|c| c.location()))
            .field("resume", &self.resume)
            .field("sinks", &self.sinks.len())
            .finish_non_exhaustive()
    }
}

impl RunContext {
    pub fn new(
        name: impl Into<String>,
        space: VariationSpace,
        executor: Arc<dyn Executor>,
        chain: EvaluatorChain,
        source: Arc<dyn DataSource>,
    ) -> Self {
        Self {
            name: name.into(),
            space,
            scoring_required: true,
            executor,
            chain,
            strategy: None,
            source,
            setup: Value::Null,
            checkpoint: None,
            resume: ResumeMode::default(),
            cancel: CancelToken::new(),
            sinks: Vec::new(),
            progress: None,
        }
    }

    /// Resolve every plugin named in `config` through `registry`.
    ///
    /// Relative paths in plugin options and the checkpoint path resolve
    /// against `base_dir`.
    #[instrument(skip_all, fields(name = %config.name))]
    pub fn from_config(
        config: &ExperimentConfig,
        base_dir: &Path,
        registry: &Registry,
        options: RunOptions,
    ) -> Result<Self> {
        config
            .validate()
            .map_err(|err| EngineError::config(format!("{err:#}")))?;

        let dataset_options = Value::Object(config.dataset.options.clone());
        let source = registry.source(
            &config.dataset.source,
            &PluginArgs {
                name: &config.dataset.source,
                options: &dataset_options,
                base_dir,
            },
        )?;

        let executor_options = Value::Object(config.executor.options.clone());
        let executor = registry.executor(
            &config.executor.plugin,
            &PluginArgs {
                name: &config.executor.plugin,
                options: &executor_options,
                base_dir,
            },
        )?;

        let mut evaluators: Vec<Arc<dyn Evaluator>> = Vec::with_capacity(config.evaluators.len());
        for evaluator in &config.evaluators {
            let evaluator_options = Value::Object(evaluator.options.clone());
            evaluators.push(registry.evaluator(
                &evaluator.plugin,
                &PluginArgs {
                    name: evaluator.instance_name(),
                    options: &evaluator_options,
                    base_dir,
                },
            )?);
        }
        let chain = EvaluatorChain::new(evaluators)?;

        let strategy = match &config.selection {
            Some(selection) => {
                let selection_options = Value::Object(selection.options.clone());
                Some(registry.strategy(
                    &selection.strategy,
                    &PluginArgs {
                        name: &selection.strategy,
                        options: &selection_options,
                        base_dir,
                    },
                )?)
            }
            None => None,
        };

        let checkpoint_path = options.checkpoint.clone().or_else(|| {
            config
                .checkpoint
                .as_ref()
                .map(|checkpoint| resolve(base_dir, &checkpoint.path))
        });

        let mut ctx = Self::new(
            config.name.clone(),
            config.variation_space(),
            executor,
            chain,
            source,
        )
        .with_scoring_required(config.scoring_required)
        .with_setup(json!({
            "dataset": config.dataset,
            "evaluators": config.evaluators,
        }))
        .with_resume(options.resume);
        ctx.strategy = strategy;
        if let Some(path) = checkpoint_path {
            ctx = ctx.with_checkpoint(Arc::new(FileCheckpointStore::new(path)));
        }
        debug!(?ctx, "run context resolved");
        Ok(ctx)
    }

    pub fn with_scoring_required(mut self, required: bool) -> Self {
        self.scoring_required = required;
        self
    }

    pub fn with_strategy(mut self, strategy: Arc<dyn SelectionStrategy>) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Configuration that, when changed, makes a stored snapshot stale.
    pub fn with_setup(mut self, setup: Value) -> Self {
        self.setup = setup;
        self
    }

    pub fn with_checkpoint(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoint = Some(store);
        self
    }

    pub fn with_resume(mut self, resume: ResumeMode) -> Self {
        self.resume = resume;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn DisplaySink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn with_progress(mut self, progress: impl FnMut(BatchProgress) + 'static) -> Self {
        self.progress = Some(Box::new(progress));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn space(&self) -> &VariationSpace {
        &self.space
    }

    pub fn chain(&self) -> &EvaluatorChain {
        &self.chain
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Hash of the evaluator names and the setup value.
    pub fn setup_fingerprint(&self) -> String {
        let canonical = json!({
            "evaluators": self.chain.names(),
            "setup": self.setup,
        });
        content_hash(&canonical.to_string())
    }
}

/// Outcome of a run that did not abort.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    /// Final snapshot, with the selection attached when a strategy ran.
    pub snapshot: ExperimentSnapshot,
    /// Every phase the run passed through, starting with `Init`.
    pub phases: Vec<RunPhase>,
    pub loaded_from_checkpoint: bool,
    /// Execution stopped early; the snapshot is flagged incomplete.
    pub cancelled: bool,
    /// Non-fatal problems (checkpoint writes, unusable snapshots, display).
    pub warnings: Vec<String>,
}

impl RunReport {
    pub fn failed_pairs(&self) -> usize {
        self.snapshot.failed_pairs()
    }
}

/// Run an experiment to completion (or cancellation).
///
/// Per-pair failures end up in the snapshot; only configuration, checkpoint
/// load and dataset failures abort with an error.
#[instrument(skip_all, fields(name = %ctx.name))]
pub fn run_experiment(ctx: &mut RunContext) -> Result<RunReport> {
    let mut state = RunState::new();
    let mut warnings = Vec::new();
    let started_at = Utc::now();

    state.advance(RunPhase::Enumerating)?;
    let prepared = match enumerate(ctx) {
        Ok(combinations) => {
            try_resume(ctx, &mut warnings).map(|snapshot| (combinations, snapshot))
        }
        Err(err) => Err(err),
    };
    let (combinations, resumed) = match prepared {
        Ok(prepared) => prepared,
        Err(err) => return fail(&mut state, err),
    };

    let loaded_from_checkpoint = resumed.is_some();
    let mut cancelled = false;
    let mut snapshot = match resumed {
        Some(snapshot) => {
            state.advance(RunPhase::LoadedFromCheckpoint)?;
            info!(
                pairs = snapshot.pair_count(),
                run_id = %snapshot.meta.run_id,
                "execution skipped, snapshot loaded"
            );
            snapshot
        }
        None => {
            state.advance(RunPhase::Executing)?;
            let aggregator = match execute(ctx, &combinations, &mut cancelled) {
                Ok(aggregator) => aggregator,
                Err(err) => return fail(&mut state, err),
            };

            state.advance(RunPhase::Aggregating)?;
            let results = aggregator.finish();
            let snapshot = ExperimentSnapshot {
                meta: SnapshotMeta {
                    run_id: generate_run_id(),
                    name: ctx.name.clone(),
                    space_fingerprint: ctx.space.fingerprint(),
                    setup_fingerprint: ctx.setup_fingerprint(),
                    combinations,
                    started_at: started_at.to_rfc3339(),
                    finished_at: Utc::now().to_rfc3339(),
                    complete: !cancelled,
                },
                results,
                selection: None,
            };
            save_checkpoint(ctx, &snapshot, &mut warnings);
            snapshot
        }
    };

    state.advance(RunPhase::Selecting)?;
    snapshot.selection = select_optional(ctx.strategy.as_deref(), &snapshot.results);
    if snapshot.selection.is_none() {
        debug!("no selection strategy configured");
    }

    for sink in &ctx.sinks {
        if let Err(err) = sink.display(&snapshot) {
            warn!(error = %format!("{err:#}"), "display failed");
            warnings.push(format!("display failed: {err:#}"));
        }
    }

    state.advance(RunPhase::Done)?;
    info!(
        pairs = snapshot.pair_count(),
        failed = snapshot.failed_pairs(),
        cancelled,
        "run finished"
    );
    Ok(RunReport {
        snapshot,
        phases: state.into_history(),
        loaded_from_checkpoint,
        cancelled,
        warnings,
    })
}

fn fail(state: &mut RunState, err: EngineError) -> Result<RunReport> {
    warn!(error = %err, "run failed");
    state.advance(RunPhase::Failed)?;
    Err(err)
}

fn enumerate(ctx: &RunContext) -> Result<Vec<Combination>> {
    let combinations = ctx.space.enumerate()?;
    if ctx.scoring_required {
        ctx.chain.require_non_empty()?;
    }
    info!(
        combinations = combinations.len(),
        evaluators = ctx.chain.len(),
        "variation space enumerated"
    );
    Ok(combinations)
}

/// Load a reusable snapshot according to the resume mode.
fn try_resume(
    ctx: &RunContext,
    warnings: &mut Vec<String>,
) -> Result<Option<ExperimentSnapshot>> {
    let Some(store) = &ctx.checkpoint else {
        if ctx.resume == ResumeMode::Required {
            return Err(EngineError::config(
                "resume requested but no checkpoint path is configured",
            ));
        }
        return Ok(None);
    };
    if ctx.resume == ResumeMode::Off {
        debug!("resume disabled, snapshot not loaded");
        return Ok(None);
    }

    let unusable = |reason: String, warnings: &mut Vec<String>| {
        if ctx.resume == ResumeMode::Required {
            return Err(EngineError::CheckpointLoad {
                path: store.location(),
                reason,
            });
        }
        let message = format!(
            "checkpoint {} not reused: {reason}",
            store.location().display()
        );
        warn!("{message}");
        warnings.push(message);
        Ok(None)
    };

    let snapshot = match store.load() {
        Ok(Some(snapshot)) => snapshot,
        Ok(None) => {
            if ctx.resume == ResumeMode::Required {
                return unusable("no snapshot stored".to_string(), warnings);
            }
            debug!("no snapshot stored, executing");
            return Ok(None);
        }
        Err(EngineError::CheckpointLoad { reason, .. }) => return unusable(reason, warnings),
        Err(err) => return Err(err),
    };

    if !snapshot.meta.complete {
        return unusable("snapshot is from an incomplete run".to_string(), warnings);
    }
    let fingerprint = ctx.space.fingerprint();
    if snapshot.meta.space_fingerprint != fingerprint {
        return unusable(
            format!(
                "variation space changed ({} != {fingerprint})",
                snapshot.meta.space_fingerprint
            ),
            warnings,
        );
    }
    let setup = ctx.setup_fingerprint();
    if snapshot.meta.setup_fingerprint != setup {
        return unusable(
            format!(
                "evaluators or dataset changed ({} != {setup})",
                snapshot.meta.setup_fingerprint
            ),
            warnings,
        );
    }
    Ok(Some(snapshot))
}

fn execute(
    ctx: &mut RunContext,
    combinations: &[Combination],
    cancelled: &mut bool,
) -> Result<ResultAggregator> {
    let mut aggregator = ResultAggregator::new();
    let mut seen_ids = HashSet::new();
    let mut completed = 0usize;
    let executor = Arc::clone(&ctx.executor);
    let source = Arc::clone(&ctx.source);

    for (batch_no, batch) in source.batches()?.enumerate() {
        if ctx.cancel.is_cancelled() {
            *cancelled = true;
            break;
        }
        let batch = batch?;
        for item in &batch {
            if !seen_ids.insert(item.id.clone()) {
                return Err(EngineError::config(format!(
                    "duplicate item id {} in dataset",
                    item.id
                )));
            }
        }
        debug!(batch = batch_no, items = batch.len(), "batch started");
        aggregator.register_items(&batch);

        let progress = &mut ctx.progress;
        let completed_before = completed;
        let mut iter = ExecutionLoop::new(executor.as_ref(), &ctx.chain)
            .with_cancel(ctx.cancel.clone())
            .with_progress(|p| {
                if let Some(sink) = progress.as_mut() {
                    sink(BatchProgress {
                        batch: batch_no,
                        progress: p,
                        completed: completed_before + p.completed,
                    });
                }
            })
            .run(&batch, combinations);
        for raw in iter.by_ref() {
            aggregator.push(raw);
        }
        completed += iter.completed();
        if iter.was_cancelled() {
            *cancelled = true;
            break;
        }
    }

    if *cancelled {
        warn!(completed, "run cancelled, results are partial");
    }
    Ok(aggregator)
}

fn save_checkpoint(ctx: &RunContext, snapshot: &ExperimentSnapshot, warnings: &mut Vec<String>) {
    let Some(store) = &ctx.checkpoint else {
        return;
    };
    match store.save(snapshot) {
        Ok(()) => info!(path = %store.location().display(), "checkpoint saved"),
        Err(err) => {
            let message = format!(
                "checkpoint write to {} failed: {err:#}",
                store.location().display()
            );
            warn!("{message}");
            warnings.push(message);
        }
    }
}

fn resolve(base_dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

fn generate_run_id() -> String {
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    let mut rng = rand::thread_rng();
    let short_id: String = std::iter::repeat_with(|| rng.sample(Alphanumeric))
        .map(char::from)
        .take(6)
        .collect::<String>()
        .to_lowercase();
    format!("run-{timestamp}-{short_id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{InputItem, VariationDimension};
    use crate::io::dataset::InlineSource;
    use crate::test_support::{
        FixedEvaluator, MemoryCheckpoint, RecordingSink, ScriptedExecutor, ScriptedStrategy, items,
    };
    use serde_json::json;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn space() -> VariationSpace {
        VariationSpace::new(vec![
            VariationDimension::new("a", vec![json!(1), json!(2)]),
            VariationDimension::new("b", vec![json!("x"), json!("y"), json!("z")]),
        ])
    }

    fn context(executor: Arc<ScriptedExecutor>, items: Vec<InputItem>) -> RunContext {
        let chain =
            EvaluatorChain::new(vec![Arc::new(FixedEvaluator::new("fixed", 1.0))]).expect("chain");
        RunContext::new(
            "unit",
            space(),
            executor,
            chain,
            Arc::new(InlineSource::new(items, 2)),
        )
    }

    #[test]
    fn fresh_run_walks_the_execution_path() {
        let executor = Arc::new(ScriptedExecutor::echo());
        let mut ctx = context(Arc::clone(&executor), items(3))
            .with_strategy(Arc::new(ScriptedStrategy::new(vec![(0, 1.0)])));
        let report = run_experiment(&mut ctx).expect("run");
        assert_eq!(
            report.phases,
            vec![
                RunPhase::Init,
                RunPhase::Enumerating,
                RunPhase::Executing,
                RunPhase::Aggregating,
                RunPhase::Selecting,
                RunPhase::Done,
            ]
        );
        assert_eq!(report.snapshot.pair_count(), 18);
        assert_eq!(executor.calls(), 18);
        assert!(report.snapshot.meta.complete);
        assert!(report.snapshot.meta.run_id.starts_with("run-"));
        assert!(report.snapshot.selection.is_some());
    }

    #[test]
    fn progress_is_reported_per_result_across_batches() {
        let executor = Arc::new(ScriptedExecutor::echo());
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let mut ctx = context(executor, items(3))
            .with_progress(move |p| sink.borrow_mut().push((p.batch, p.completed)));
        run_experiment(&mut ctx).expect("run");
        let seen = seen.borrow();
        assert_eq!(seen.len(), 18);
        assert_eq!(seen[11], (0, 12));
        assert_eq!(seen[17], (1, 18));
    }

    #[test]
    fn zero_evaluators_fail_before_execution() {
        let executor = Arc::new(ScriptedExecutor::echo());
        let chain = EvaluatorChain::new(Vec::new()).expect("chain");
        let mut ctx = RunContext::new(
            "unit",
            space(),
            Arc::clone(&executor) as Arc<dyn Executor>,
            chain,
            Arc::new(InlineSource::new(items(1), 2)),
        );
        let err = run_experiment(&mut ctx).expect_err("no evaluators");
        assert!(matches!(err, EngineError::Configuration(_)));
        assert_eq!(executor.calls(), 0);
    }

    #[test]
    fn duplicate_item_ids_are_rejected() {
        let executor = Arc::new(ScriptedExecutor::echo());
        let dupes = vec![
            InputItem::new("same", json!(1)),
            InputItem::new("same", json!(2)),
        ];
        let mut ctx = context(executor, dupes);
        let err = run_experiment(&mut ctx).expect_err("duplicate ids");
        assert!(err.to_string().contains("duplicate item id same"));
    }

    #[test]
    fn resume_skips_execution() {
        let first = Arc::new(ScriptedExecutor::echo());
        let store = Arc::new(MemoryCheckpoint::new());
        let mut ctx = context(first, items(2)).with_checkpoint(store.clone());
        let original = run_experiment(&mut ctx).expect("first run");
        assert_eq!(store.saves(), 1);

        let second = Arc::new(ScriptedExecutor::echo());
        let mut ctx = context(Arc::clone(&second), items(2))
            .with_checkpoint(store.clone())
            .with_resume(ResumeMode::Required);
        let resumed = run_experiment(&mut ctx).expect("resumed run");
        assert!(resumed.loaded_from_checkpoint);
        assert_eq!(second.calls(), 0);
        assert_eq!(resumed.snapshot.results, original.snapshot.results);
        assert!(resumed.phases.contains(&RunPhase::LoadedFromCheckpoint));
    }

    #[test]
    fn forced_run_ignores_the_snapshot() {
        let store = Arc::new(MemoryCheckpoint::new());
        let mut ctx = context(Arc::new(ScriptedExecutor::echo()), items(1))
            .with_checkpoint(store.clone());
        run_experiment(&mut ctx).expect("first run");

        let executor = Arc::new(ScriptedExecutor::echo());
        let mut ctx = context(Arc::clone(&executor), items(1))
            .with_checkpoint(store.clone())
            .with_resume(ResumeMode::Off);
        let report = run_experiment(&mut ctx).expect("forced run");
        assert!(!report.loaded_from_checkpoint);
        assert_eq!(executor.calls(), 6);
        assert_eq!(store.saves(), 2);
    }

    #[test]
    fn corrupt_snapshot_is_fatal_only_when_resume_is_required() {
        let store = Arc::new(MemoryCheckpoint::corrupt());
        let mut ctx = context(Arc::new(ScriptedExecutor::echo()), items(1))
            .with_checkpoint(store.clone())
            .with_resume(ResumeMode::Required);
        let err = run_experiment(&mut ctx).expect_err("corrupt");
        assert!(matches!(err, EngineError::CheckpointLoad { .. }));

        let mut ctx = context(Arc::new(ScriptedExecutor::echo()), items(1))
            .with_checkpoint(store);
        let report = run_experiment(&mut ctx).expect("auto resume");
        assert!(!report.loaded_from_checkpoint);
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn changed_variation_space_recomputes() {
        let store = Arc::new(MemoryCheckpoint::new());
        let mut ctx = context(Arc::new(ScriptedExecutor::echo()), items(1))
            .with_checkpoint(store.clone());
        run_experiment(&mut ctx).expect("first run");

        let chain =
            EvaluatorChain::new(vec![Arc::new(FixedEvaluator::new("fixed", 1.0))]).expect("chain");
        let mut ctx = RunContext::new(
            "unit",
            VariationSpace::new(vec![VariationDimension::new("a", vec![json!(1)])]),
            Arc::new(ScriptedExecutor::echo()),
            chain,
            Arc::new(InlineSource::new(items(1), 2)),
        )
        .with_checkpoint(store);
        let report = run_experiment(&mut ctx).expect("second run");
        assert!(!report.loaded_from_checkpoint);
        assert_eq!(report.snapshot.pair_count(), 1);
        assert!(report.warnings[0].contains("variation space changed"));
    }

    #[test]
    fn changed_evaluators_recompute() {
        let store = Arc::new(MemoryCheckpoint::new());
        let mut ctx = context(Arc::new(ScriptedExecutor::echo()), items(1))
            .with_checkpoint(store.clone());
        run_experiment(&mut ctx).expect("first run");

        let chain =
            EvaluatorChain::new(vec![Arc::new(FixedEvaluator::new("other", 1.0))]).expect("chain");
        let executor = Arc::new(ScriptedExecutor::echo());
        let mut ctx = RunContext::new(
            "unit",
            space(),
            Arc::clone(&executor) as Arc<dyn Executor>,
            chain,
            Arc::new(InlineSource::new(items(1), 2)),
        )
        .with_checkpoint(store);
        let report = run_experiment(&mut ctx).expect("second run");
        assert!(!report.loaded_from_checkpoint);
        assert_eq!(executor.calls(), 6);
        assert!(report.warnings[0].contains("evaluators or dataset changed"));
    }

    #[test]
    fn changed_dataset_setup_recomputes() {
        let store = Arc::new(MemoryCheckpoint::new());
        let mut ctx = context(Arc::new(ScriptedExecutor::echo()), items(1))
            .with_setup(json!({ "dataset": { "path": "a.jsonl" } }))
            .with_checkpoint(store.clone());
        run_experiment(&mut ctx).expect("first run");

        let mut ctx = context(Arc::new(ScriptedExecutor::echo()), items(1))
            .with_setup(json!({ "dataset": { "path": "b.jsonl" } }))
            .with_checkpoint(store.clone())
            .with_resume(ResumeMode::Required);
        let err = run_experiment(&mut ctx).expect_err("stale snapshot");
        assert!(matches!(err, EngineError::CheckpointLoad { .. }));
        assert!(err.to_string().contains("evaluators or dataset changed"));
    }

    #[test]
    fn failed_checkpoint_write_is_a_warning() {
        let store = Arc::new(MemoryCheckpoint::failing_saves());
        let mut ctx = context(Arc::new(ScriptedExecutor::echo()), items(2))
            .with_checkpoint(store.clone())
            .with_strategy(Arc::new(ScriptedStrategy::new(vec![(0, 1.0)])));
        let report = run_experiment(&mut ctx).expect("run survives the write failure");
        assert_eq!(store.saves(), 1);
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("checkpoint write"));
        assert!(report.warnings[0].contains("scripted write failure"));
        assert!(report.snapshot.selection.is_some());
        assert_eq!(report.phases.last(), Some(&RunPhase::Done));
    }

    #[test]
    fn cancelled_runs_are_flagged_and_not_reused() {
        let store = Arc::new(MemoryCheckpoint::new());
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        let mut ctx = context(Arc::new(ScriptedExecutor::echo()), items(3))
            .with_checkpoint(store.clone())
            .with_cancel(cancel)
            .with_progress(move |p| {
                if p.completed == 4 {
                    trigger.cancel();
                }
            });
        let report = run_experiment(&mut ctx).expect("cancelled run");
        assert!(report.cancelled);
        assert_eq!(report.snapshot.pair_count(), 4);
        assert!(!store.stored().expect("saved").meta.complete);

        let executor = Arc::new(ScriptedExecutor::echo());
        let mut ctx = context(Arc::clone(&executor), items(3)).with_checkpoint(store);
        let report = run_experiment(&mut ctx).expect("rerun");
        assert!(!report.loaded_from_checkpoint);
        assert_eq!(executor.calls(), 18);
    }

    #[test]
    fn sinks_receive_the_final_snapshot() {
        let sink = Arc::new(RecordingSink::new());
        let mut ctx = context(Arc::new(ScriptedExecutor::echo()), items(1))
            .with_strategy(Arc::new(ScriptedStrategy::new(vec![(2, 1.0)])))
            .with_sink(sink.clone());
        let report = run_experiment(&mut ctx).expect("run");
        let seen = sink.seen();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], report.snapshot);
        let best = report.snapshot.selection.as_ref().and_then(|s| s.per_item[0].best());
        assert_eq!(best.map(|b| b.combination_index), Some(2));
    }

    #[test]
    fn run_ids_are_unique() {
        assert_ne!(generate_run_id(), generate_run_id());
    }
}
