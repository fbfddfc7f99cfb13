//! Evaluator chain: ordered, independent scoring of one executed output.

use std::collections::HashSet;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use anyhow::Result;
use serde_json::Value;
use tracing::{debug, warn};

use crate::core::types::{
    Combination, EvaluationRecord, EvaluatorEntry, EvaluatorScore, InputItem, Score,
};
use crate::error::EngineError;

/// Everything an evaluator may look at for one executed pair.
#[derive(Debug, Clone, Copy)]
pub struct EvalInput<'a> {
    pub item: &'a InputItem,
    pub combination: &'a Combination,
    pub output: &'a Value,
}

/// A pluggable scoring function.
///
/// Evaluators are independent measurements: one failing never prevents the
/// others from running.
pub trait Evaluator: Send + Sync {
    fn name(&self) -> &str;
    fn evaluate(&self, input: &EvalInput<'_>) -> Result<Score>;
}

/// Ordered collection of evaluators applied to every executed output.
#[derive(Clone, Default)]
pub struct EvaluatorChain {
    evaluators: Vec<Arc<dyn Evaluator>>,
}

impl std::fmt::Debug for EvaluatorChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl EvaluatorChain {
    /// Build a chain; evaluator names must be unique.
    pub fn new(evaluators: Vec<Arc<dyn Evaluator>>) -> Result<Self, EngineError> {
        let mut seen = HashSet::new();
        for evaluator in &evaluators {
            if !seen.insert(evaluator.name().to_string()) {
                return Err(EngineError::config(format!(
                    "duplicate evaluator name {}",
                    evaluator.name()
                )));
            }
        }
        Ok(Self { evaluators })
    }

    pub fn len(&self) -> usize {
        self.evaluators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.evaluators.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.evaluators.iter().map(|e| e.name()).collect()
    }

    /// Fail when scoring is mandatory but nothing would score.
    pub fn require_non_empty(&self) -> Result<(), EngineError> {
        if self.is_empty() {
            return Err(EngineError::config(
                "no evaluators configured but scoring is required",
            ));
        }
        Ok(())
    }

    /// Apply every evaluator in registration order.
    pub fn evaluate(
        &self,
        item: &InputItem,
        combination: &Combination,
        output: &Value,
    ) -> EvaluationRecord {
        let input = EvalInput {
            item,
            combination,
            output,
        };
        let scores = self
            .evaluators
            .iter()
            .map(|evaluator| EvaluatorEntry {
                evaluator: evaluator.name().to_string(),
                score: run_one(evaluator.as_ref(), &input),
            })
            .collect();
        EvaluationRecord {
            scores,
            not_evaluable: false,
        }
    }

    /// Record for a pair whose execution failed.
    pub fn not_evaluable(&self, error: &str) -> EvaluationRecord {
        let scores = self
            .evaluators
            .iter()
            .map(|evaluator| EvaluatorEntry {
                evaluator: evaluator.name().to_string(),
                score: EvaluatorScore::Failed {
                    error: format!("not evaluable: {error}"),
                },
            })
            .collect();
        EvaluationRecord {
            scores,
            not_evaluable: true,
        }
    }
}

fn run_one(evaluator: &dyn Evaluator, input: &EvalInput<'_>) -> EvaluatorScore {
    let name = evaluator.name();
    match catch_unwind(AssertUnwindSafe(|| evaluator.evaluate(input))) {
        Ok(Ok(score)) if score.value.is_finite() => {
            debug!(evaluator = name, value = score.value, "evaluator scored");
            score.into()
        }
        Ok(Ok(score)) => {
            warn!(evaluator = name, value = score.value, "evaluator returned non-finite score");
            EvaluatorScore::Failed {
                error: format!("non-finite score {}", score.value),
            }
        }
        Ok(Err(err)) => {
            warn!(evaluator = name, item = %input.item.id, error = %err, "evaluator failed");
            EvaluatorScore::Failed {
                error: format!("{err:#}"),
            }
        }
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            warn!(evaluator = name, item = %input.item.id, panic = %message, "evaluator panicked");
            EvaluatorScore::Failed {
                error: format!("panicked: {message}"),
            }
        }
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FailingEvaluator, FixedEvaluator, combination, item};
    use serde_json::json;

    struct PanickingEvaluator;

    impl Evaluator for PanickingEvaluator {
        fn name(&self) -> &str {
            "panics"
        }
        fn evaluate(&self, _input: &EvalInput<'_>) -> Result<Score> {
            panic!("boom");
        }
    }

    #[test]
    fn applies_evaluators_in_registration_order() {
        let chain = EvaluatorChain::new(vec![
            Arc::new(FixedEvaluator::new("b", 0.5)),
            Arc::new(FixedEvaluator::new("a", 1.0)),
        ])
        .expect("chain");
        let record = chain.evaluate(&item("i1"), &combination(0, &[]), &json!("out"));
        let names: Vec<&str> = record.scores.iter().map(|e| e.evaluator.as_str()).collect();
        assert_eq!(names, vec!["b", "a"]);
        assert_eq!(record.value("a"), Some(1.0));
        assert!(!record.not_evaluable);
    }

    #[test]
    fn evaluator_failures_are_isolated() {
        let chain = EvaluatorChain::new(vec![
            Arc::new(FailingEvaluator::new("bad")),
            Arc::new(PanickingEvaluator),
            Arc::new(FixedEvaluator::new("good", 0.25)),
        ])
        .expect("chain");
        let record = chain.evaluate(&item("i1"), &combination(0, &[]), &json!("out"));
        assert_eq!(record.failures(), 2);
        assert_eq!(record.value("good"), Some(0.25));
        match record.get("panics") {
            Some(EvaluatorScore::Failed { error }) => assert!(error.contains("boom")),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn non_finite_scores_are_failures() {
        let chain =
            EvaluatorChain::new(vec![Arc::new(FixedEvaluator::new("nan", f64::NAN))]).expect("chain");
        let record = chain.evaluate(&item("i1"), &combination(0, &[]), &json!(null));
        assert!(record.get("nan").expect("entry").is_failed());
    }

    #[test]
    fn empty_chain_fails_when_scoring_required() {
        let chain = EvaluatorChain::new(Vec::new()).expect("chain");
        assert!(chain.require_non_empty().is_err());
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let err = EvaluatorChain::new(vec![
            Arc::new(FixedEvaluator::new("x", 1.0)),
            Arc::new(FixedEvaluator::new("x", 2.0)),
        ])
        .expect_err("duplicate");
        assert!(err.to_string().contains("duplicate evaluator name x"));
    }

    #[test]
    fn not_evaluable_marks_every_evaluator() {
        let chain = EvaluatorChain::new(vec![
            Arc::new(FixedEvaluator::new("a", 1.0)),
            Arc::new(FixedEvaluator::new("b", 1.0)),
        ])
        .expect("chain");
        let record = chain.not_evaluable("timeout");
        assert!(record.not_evaluable);
        assert_eq!(record.failures(), 2);
    }
}
