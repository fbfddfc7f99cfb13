//! Folding raw results into one record per input item.

use std::collections::{BTreeMap, HashMap};

use serde_json::Value;

use crate::core::types::{ExperimentResult, InputItem, RawResult};

/// Accumulates [`RawResult`]s keyed by (item id, combination index).
///
/// Re-adding a pair replaces the earlier entry, so folding the same stream
/// twice yields the same aggregate. Output ordering follows item registration
/// order and combination index, never arrival order.
#[derive(Debug, Default, Clone)]
pub struct ResultAggregator {
    items: Vec<InputItem>,
    positions: HashMap<String, usize>,
    results: HashMap<String, BTreeMap<usize, RawResult>>,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register items so they appear in the output even without results.
    pub fn register_items<'a>(&mut self, items: impl IntoIterator<Item = &'a InputItem>) {
        for item in items {
            if !self.positions.contains_key(&item.id) {
                self.positions.insert(item.id.clone(), self.items.len());
                self.items.push(item.clone());
            }
        }
    }

    pub fn push(&mut self, result: RawResult) {
        if !self.positions.contains_key(&result.item_id) {
            // Results for unregistered items keep a placeholder item.
            let placeholder = InputItem::new(result.item_id.clone(), Value::Null);
            self.register_items([&placeholder]);
        }
        self.results
            .entry(result.item_id.clone())
            .or_default()
            .insert(result.combination.index, result);
    }

    pub fn extend(&mut self, results: impl IntoIterator<Item = RawResult>) {
        for result in results {
            self.push(result);
        }
    }

    /// Number of distinct pairs folded so far.
    pub fn pair_count(&self) -> usize {
        self.results.values().map(BTreeMap::len).sum()
    }

    pub fn finish(self) -> Vec<ExperimentResult> {
        let mut results = self.results;
        self.items
            .into_iter()
            .map(|item| {
                let pairs = results.remove(&item.id).unwrap_or_default();
                ExperimentResult {
                    item,
                    results: pairs.into_values().collect(),
                }
            })
            .collect()
    }
}

/// Group raw results by input item; see [`ResultAggregator`].
pub fn fold(
    raw: impl IntoIterator<Item = RawResult>,
    items: &[InputItem],
) -> Vec<ExperimentResult> {
    let mut aggregator = ResultAggregator::new();
    aggregator.register_items(items);
    aggregator.extend(raw);
    aggregator.finish()
}

/// Flatten aggregated records back into their raw results.
pub fn flatten(results: &[ExperimentResult]) -> Vec<RawResult> {
    results
        .iter()
        .flat_map(|r| r.results.iter().cloned())
        .collect()
}
