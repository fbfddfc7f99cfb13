//! Selection protocol: strategies rank, the engine enforces determinism.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::core::types::{
    Combination, ExperimentResult, ItemSelection, RankedCombination, SelectionOutcome,
};

/// A pluggable ranking policy over the results of one item.
///
/// Strategies only produce scores; ordering and tie-breaking are applied by
/// [`select`], so a strategy may return its entries in any order.
pub trait SelectionStrategy: Send + Sync {
    fn name(&self) -> &str;
    fn rank(&self, result: &ExperimentResult) -> Vec<RankedCombination>;
}

/// Rank combinations per item and globally.
///
/// Entries are ordered by eligibility, then score (descending), then
/// combination enumeration index, so equal scores always resolve to the
/// earlier combination. Every item with at least one result receives at least
/// one ranked combination.
pub fn select(strategy: &dyn SelectionStrategy, results: &[ExperimentResult]) -> SelectionOutcome {
    let per_item: Vec<ItemSelection> = results
        .iter()
        .map(|result| ItemSelection {
            item_id: result.item.id.clone(),
            ranking: rank_item(strategy, result),
        })
        .collect();
    let global = global_ranking(&per_item);
    debug!(
        strategy = strategy.name(),
        items = per_item.len(),
        "selection complete"
    );
    SelectionOutcome {
        strategy: strategy.name().to_string(),
        per_item,
        global,
    }
}

/// Run selection when a strategy is configured; no strategy is not an error.
pub fn select_optional(
    strategy: Option<&dyn SelectionStrategy>,
    results: &[ExperimentResult],
) -> Option<SelectionOutcome> {
    strategy.map(|strategy| select(strategy, results))
}

fn rank_item(strategy: &dyn SelectionStrategy, result: &ExperimentResult) -> Vec<RankedCombination> {
    if result.results.is_empty() {
        return Vec::new();
    }
    let mut ranking: Vec<RankedCombination> = strategy
        .rank(result)
        .into_iter()
        .map(sanitize)
        .collect();
    dedup_by_index(&mut ranking);
    if ranking.is_empty() {
        warn!(
            strategy = strategy.name(),
            item = %result.item.id,
            "strategy ranked nothing, falling back to enumeration order"
        );
        ranking = result
            .results
            .iter()
            .map(|r| fallback_entry(&r.combination))
            .collect();
    }
    ranking.sort_by(compare_ranked);
    ranking
}

fn fallback_entry(combination: &Combination) -> RankedCombination {
    RankedCombination::new(combination, 0.0).with_reason("unranked by strategy")
}

fn sanitize(mut entry: RankedCombination) -> RankedCombination {
    if !entry.score.is_finite() {
        entry.reason = format!("non-finite score {}", entry.score);
        entry.score = 0.0;
        entry.eligible = false;
    }
    // -0.0 must tie with 0.0 under total_cmp.
    entry.score += 0.0;
    entry
}

/// Keep the first entry for each combination index.
fn dedup_by_index(ranking: &mut Vec<RankedCombination>) {
    let mut seen = std::collections::HashSet::new();
    ranking.retain(|entry| seen.insert(entry.combination_index));
}

/// Total order used for every ranking.
pub fn compare_ranked(a: &RankedCombination, b: &RankedCombination) -> Ordering {
    b.eligible
        .cmp(&a.eligible)
        .then_with(|| b.score.total_cmp(&a.score))
        .then_with(|| a.combination_index.cmp(&b.combination_index))
}

/// Mean eligible score per combination across items.
fn global_ranking(per_item: &[ItemSelection]) -> Vec<RankedCombination> {
    struct Acc {
        key: String,
        sum: f64,
        count: usize,
    }
    let mut acc: BTreeMap<usize, Acc> = BTreeMap::new();
    for selection in per_item {
        for entry in &selection.ranking {
            let slot = acc.entry(entry.combination_index).or_insert_with(|| Acc {
                key: entry.key.clone(),
                sum: 0.0,
                count: 0,
            });
            if entry.eligible {
                slot.sum += entry.score;
                slot.count += 1;
            }
        }
    }
    let mut global: Vec<RankedCombination> = acc
        .into_iter()
        .map(|(index, acc)| {
            let eligible = acc.count > 0;
            RankedCombination {
                combination_index: index,
                key: acc.key,
                score: if eligible {
                    acc.sum / acc.count as f64
                } else {
                    0.0
                },
                eligible,
                reason: format!("mean over {} item(s)", acc.count),
            }
        })
        .collect();
    global.sort_by(compare_ranked);
    global
}
