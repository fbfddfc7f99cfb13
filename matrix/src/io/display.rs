//! Display sinks: a plain-text summary and a JSON index export.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde_json::json;
use tracing::debug;

use crate::core::types::ExperimentSnapshot;

/// Receives the final snapshot of a run.
pub trait DisplaySink: Send + Sync {
    fn display(&self, snapshot: &ExperimentSnapshot) -> Result<()>;
}

/// Prints [`render_summary`] to stdout.
#[derive(Debug, Clone, Copy, Default)]
pub struct SummaryTable;

impl DisplaySink for SummaryTable {
    fn display(&self, snapshot: &ExperimentSnapshot) -> Result<()> {
        print!("{}", render_summary(snapshot));
        Ok(())
    }
}

#[derive(Default)]
struct ComboStats {
    pairs: usize,
    errors: usize,
    sums: BTreeMap<String, (f64, usize)>,
}

/// Per-combination overview with mean evaluator scores and the selection.
pub fn render_summary(snapshot: &ExperimentSnapshot) -> String {
    let meta = &snapshot.meta;
    let mut out = String::new();
    let _ = writeln!(out, "Experiment: {} ({})", meta.name, meta.run_id);
    let _ = writeln!(
        out,
        "Items: {}  Combinations: {}  Pairs: {}  Failed: {}{}",
        snapshot.results.len(),
        meta.combinations.len(),
        snapshot.pair_count(),
        snapshot.failed_pairs(),
        if meta.complete { "" } else { "  (incomplete)" }
    );

    let mut stats: BTreeMap<usize, ComboStats> = BTreeMap::new();
    for raw in snapshot.results.iter().flat_map(|r| &r.results) {
        let entry = stats.entry(raw.combination.index).or_default();
        entry.pairs += 1;
        if raw.outcome.is_error() {
            entry.errors += 1;
        }
        for scored in &raw.evaluation.scores {
            if let Some(value) = scored.score.value() {
                let sum = entry.sums.entry(scored.evaluator.clone()).or_default();
                sum.0 += value;
                sum.1 += 1;
            }
        }
    }

    let global: BTreeMap<usize, (usize, f64)> = snapshot
        .selection
        .iter()
        .flat_map(|s| s.global.iter().enumerate())
        .filter(|(_, r)| r.eligible)
        .map(|(rank, r)| (r.combination_index, (rank + 1, r.score)))
        .collect();

    let _ = writeln!(out);
    for combination in &meta.combinations {
        let stat = stats.remove(&combination.index).unwrap_or_default();
        let _ = write!(
            out,
            "[{}] {}  pairs={} errors={}",
            combination.index,
            combination.label(),
            stat.pairs,
            stat.errors
        );
        for (evaluator, (sum, n)) in &stat.sums {
            let _ = write!(out, " {evaluator}={:.3}", sum / *n as f64);
        }
        if let Some((rank, score)) = global.get(&combination.index) {
            let _ = write!(out, "  rank={rank} score={score:.3}");
        }
        let _ = writeln!(out);
    }

    if let Some(selection) = &snapshot.selection {
        let _ = writeln!(out, "\nSelection ({}):", selection.strategy);
        for item in &selection.per_item {
            match item.best() {
                Some(best) => {
                    let label = snapshot
                        .combination(best.combination_index)
                        .map(|c| c.label())
                        .unwrap_or_default();
                    let _ = writeln!(
                        out,
                        "  {} -> [{}] {} ({:.3})",
                        item.item_id, best.combination_index, label, best.score
                    );
                }
                None => {
                    let _ = writeln!(out, "  {} -> (no eligible combination)", item.item_id);
                }
            }
        }
    }
    out
}

/// Writes an `index.json` browsing document next to other run artifacts.
#[derive(Debug, Clone)]
pub struct IndexExport {
    pub path: PathBuf,
}

impl IndexExport {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl DisplaySink for IndexExport {
    fn display(&self, snapshot: &ExperimentSnapshot) -> Result<()> {
        let items: Vec<&str> = snapshot.results.iter().map(|r| r.item.id.as_str()).collect();
        let results: Vec<_> = snapshot.results.iter().flat_map(|r| &r.results).collect();
        let index = json!({
            "name": snapshot.meta.name,
            "run_id": snapshot.meta.run_id,
            "combinations": snapshot.meta.combinations,
            "items": items,
            "results": results,
            "selection": snapshot.selection,
        });
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        let mut buf = serde_json::to_string_pretty(&index).context("serialize index")?;
        buf.push('\n');
        fs::write(&self.path, buf)
            .with_context(|| format!("write index {}", self.path.display()))?;
        debug!(path = %self.path.display(), "wrote index.json");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::select::select;
    use crate::core::types::ExperimentResult;
    use crate::test_support::{
        ScriptedStrategy, combinations, failed_result, item, scored_result, snapshot,
    };

    fn sample() -> ExperimentSnapshot {
        let results = vec![ExperimentResult {
            item: item("a"),
            results: vec![
                scored_result("a", 0, &[("quality", 0.25)]),
                failed_result("a", 1),
            ],
        }];
        let mut snap = snapshot(combinations(2), results);
        let strategy = ScriptedStrategy::new(vec![(0, 0.25)]);
        snap.selection = Some(select(&strategy, &snap.results));
        snap
    }

    #[test]
    fn summary_lists_combinations_and_selection() {
        let text = render_summary(&sample());
        assert!(text.contains("Pairs: 2  Failed: 1"), "{text}");
        assert!(text.contains("[0]"), "{text}");
        assert!(text.contains("quality=0.250"), "{text}");
        assert!(text.contains("errors=1"), "{text}");
        assert!(text.contains("a -> [0]"), "{text}");
    }

    #[test]
    fn index_export_writes_results() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("out").join("index.json");
        IndexExport::new(&path).display(&sample()).expect("export");
        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).expect("read")).expect("json");
        assert_eq!(value["items"], json!(["a"]));
        assert_eq!(value["results"].as_array().map(Vec::len), Some(2));
        assert_eq!(value["selection"]["strategy"], json!("scripted"));
    }
}
