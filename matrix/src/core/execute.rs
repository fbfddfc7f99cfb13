//! The per-item execution loop.
//!
//! Every item is run against every combination (item-major, combinations in
//! enumeration order). Failures of the user executor are recorded inline and
//! never stop the loop.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use anyhow::Result;
use serde_json::Value;
use tracing::{debug, warn};

use crate::core::evaluate::{EvaluatorChain, panic_message};
use crate::core::types::{Combination, ExecutionOutcome, InputItem, RawResult};

/// The user-supplied callable producing a raw output for one pair.
///
/// Implementations may block for as long as they need; the loop imposes no
/// timeout of its own.
pub trait Executor: Send + Sync {
    fn execute(&self, item: &InputItem, combination: &Combination) -> Result<Value>;
}

/// Progress notification emitted once per produced [`RawResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
}

/// Cooperative cancellation flag, checked between pairs.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Total number of pairs a run over `items` × `combinations` executes.
pub fn total_work(items: usize, combinations: usize) -> usize {
    items.saturating_mul(combinations)
}

type ProgressFn<'a> = Box<dyn FnMut(Progress) + 'a>;

/// Drives an [`Executor`] and an [`EvaluatorChain`] over a matrix of pairs.
pub struct ExecutionLoop<'a> {
    executor: &'a dyn Executor,
    chain: &'a EvaluatorChain,
    progress: Option<ProgressFn<'a>>,
    cancel: Option<CancelToken>,
}

impl<'a> ExecutionLoop<'a> {
    pub fn new(executor: &'a dyn Executor, chain: &'a EvaluatorChain) -> Self {
        Self {
            executor,
            chain,
            progress: None,
            cancel: None,
        }
    }

    pub fn with_progress(mut self, progress: impl FnMut(Progress) + 'a) -> Self {
        self.progress = Some(Box::new(progress));
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Lazily execute every (item, combination) pair.
    pub fn run(
        self,
        items: &'a [InputItem],
        combinations: &'a [Combination],
    ) -> ExecutionIter<'a> {
        let total = total_work(items.len(), combinations.len());
        debug!(
            items = items.len(),
            combinations = combinations.len(),
            total,
            "execution loop started"
        );
        ExecutionIter {
            state: self,
            items,
            combinations,
            item_pos: 0,
            combination_pos: 0,
            completed: 0,
            total,
            cancelled: false,
        }
    }
}

/// Iterator over the [`RawResult`]s of one loop run.
pub struct ExecutionIter<'a> {
    state: ExecutionLoop<'a>,
    items: &'a [InputItem],
    combinations: &'a [Combination],
    item_pos: usize,
    combination_pos: usize,
    completed: usize,
    total: usize,
    cancelled: bool,
}

impl ExecutionIter<'_> {
    pub fn total(&self) -> usize {
        self.total
    }

    pub fn completed(&self) -> usize {
        self.completed
    }

    /// True when the loop stopped early because of a cancellation request.
    pub fn was_cancelled(&self) -> bool {
        self.cancelled
    }
}

impl Iterator for ExecutionIter<'_> {
    type Item = RawResult;

    fn next(&mut self) -> Option<RawResult> {
        if self.completed >= self.total || self.cancelled {
            return None;
        }
        if self
            .state
            .cancel
            .as_ref()
            .is_some_and(CancelToken::is_cancelled)
        {
            warn!(
                completed = self.completed,
                total = self.total,
                "execution cancelled"
            );
            self.cancelled = true;
            return None;
        }

        let (items, combinations) = (self.items, self.combinations);
        let item = &items[self.item_pos];
        let combination = &combinations[self.combination_pos];
        self.combination_pos += 1;
        if self.combination_pos == self.combinations.len() {
            self.combination_pos = 0;
            self.item_pos += 1;
        }

        let result = execute_pair(self.state.executor, self.state.chain, item, combination);
        self.completed += 1;
        if let Some(progress) = self.state.progress.as_mut() {
            progress(Progress {
                completed: self.completed,
                total: self.total,
            });
        }
        Some(result)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.total - self.completed))
    }
}

/// Execute and score a single pair, absorbing executor failures.
pub fn execute_pair(
    executor: &dyn Executor,
    chain: &EvaluatorChain,
    item: &InputItem,
    combination: &Combination,
) -> RawResult {
    let start = Instant::now();
    let outcome = match catch_unwind(AssertUnwindSafe(|| executor.execute(item, combination))) {
        Ok(Ok(value)) => ExecutionOutcome::Output { value },
        Ok(Err(err)) => ExecutionOutcome::Error {
            message: format!("{err:#}"),
        },
        Err(panic) => ExecutionOutcome::Error {
            message: format!("executor panicked: {}", panic_message(panic.as_ref())),
        },
    };
    let evaluation = match &outcome {
        ExecutionOutcome::Output { value } => chain.evaluate(item, combination, value),
        ExecutionOutcome::Error { message } => {
            warn!(
                item = %item.id,
                combination = combination.index,
                error = %message,
                "execution failed"
            );
            chain.not_evaluable(message)
        }
    };
    debug!(item = %item.id, combination = combination.index, "pair finished");
    RawResult {
        item_id: item.id.clone(),
        combination: combination.clone(),
        outcome,
        evaluation,
        duration_ms: start.elapsed().as_millis() as u64,
    }
}
