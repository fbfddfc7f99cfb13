//! Built-in selection strategies.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Result, bail};
use serde::Deserialize;

use crate::core::select::SelectionStrategy;
use crate::core::types::{ExperimentResult, RankedCombination};
use crate::plugins::PluginArgs;

/// Weighted sum of evaluator scores.
///
/// Failed evaluators contribute nothing; failed executions are ineligible.
#[derive(Debug, Clone)]
pub struct WeightedSum {
    weights: BTreeMap<String, f64>,
    default_weight: f64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct WeightedSumOptions {
    weights: BTreeMap<String, f64>,
    default_weight: f64,
}

impl Default for WeightedSumOptions {
    fn default() -> Self {
        Self {
            weights: BTreeMap::new(),
            default_weight: 1.0,
        }
    }
}

impl WeightedSum {
    pub fn new(weights: BTreeMap<String, f64>, default_weight: f64) -> Self {
        Self {
            weights,
            default_weight,
        }
    }

    fn weight(&self, evaluator: &str) -> f64 {
        self.weights
            .get(evaluator)
            .copied()
            .unwrap_or(self.default_weight)
    }
}

impl SelectionStrategy for WeightedSum {
    fn name(&self) -> &str {
        "weighted_sum"
    }

    fn rank(&self, result: &ExperimentResult) -> Vec<RankedCombination> {
        result
            .results
            .iter()
            .map(|raw| {
                if raw.outcome.is_error() {
                    return RankedCombination::ineligible(&raw.combination, "execution failed");
                }
                let mut total = 0.0;
                let mut used = 0;
                for entry in &raw.evaluation.scores {
                    if let Some(value) = entry.score.value() {
                        total += self.weight(&entry.evaluator) * value;
                        used += 1;
                    }
                }
                let failed = raw.evaluation.failures();
                let reason = if failed > 0 {
                    format!("weighted sum of {used} score(s), {failed} evaluator failure(s)")
                } else {
                    format!("weighted sum of {used} score(s)")
                };
                RankedCombination::new(&raw.combination, total).with_reason(reason)
            })
            .collect()
    }
}

pub fn weighted_sum_factory(args: &PluginArgs<'_>) -> Result<Arc<dyn SelectionStrategy>> {
    let options: WeightedSumOptions = args.parse()?;
    for (name, weight) in &options.weights {
        if !weight.is_finite() {
            bail!("weight for {name} must be finite");
        }
    }
    Ok(Arc::new(WeightedSum::new(
        options.weights,
        options.default_weight,
    )))
}

/// Fraction of evaluators whose score reaches a threshold.
#[derive(Debug, Clone)]
pub struct PassRate {
    threshold: f64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct PassRateOptions {
    threshold: f64,
}

impl Default for PassRateOptions {
    fn default() -> Self {
        Self { threshold: 0.5 }
    }
}

impl PassRate {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }
}

impl SelectionStrategy for PassRate {
    fn name(&self) -> &str {
        "pass_rate"
    }

    fn rank(&self, result: &ExperimentResult) -> Vec<RankedCombination> {
        result
            .results
            .iter()
            .map(|raw| {
                if raw.outcome.is_error() {
                    return RankedCombination::ineligible(&raw.combination, "execution failed");
                }
                let total = raw.evaluation.scores.len();
                if total == 0 {
                    return RankedCombination::ineligible(&raw.combination, "no scores");
                }
                let passed = raw
                    .evaluation
                    .scores
                    .iter()
                    .filter(|entry| entry.score.value().is_some_and(|v| v >= self.threshold))
                    .count();
                RankedCombination::new(&raw.combination, passed as f64 / total as f64)
                    .with_reason(format!("{passed}/{total} passed"))
            })
            .collect()
    }
}

pub fn pass_rate_factory(args: &PluginArgs<'_>) -> Result<Arc<dyn SelectionStrategy>> {
    let options: PassRateOptions = args.parse()?;
    if !options.threshold.is_finite() {
        bail!("threshold must be finite");
    }
    Ok(Arc::new(PassRate::new(options.threshold)))
}
