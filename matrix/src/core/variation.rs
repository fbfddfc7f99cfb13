//! Variation space enumeration.

use std::collections::{BTreeMap, HashSet};

use serde_json::Value;

use crate::core::types::{Combination, VariationDimension, content_hash};
use crate::error::{EngineError, Result};

/// The set of variation dimensions of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct VariationSpace {
    dimensions: Vec<VariationDimension>,
}

impl VariationSpace {
    pub fn new(dimensions: Vec<VariationDimension>) -> Self {
        Self { dimensions }
    }

    pub fn dimensions(&self) -> &[VariationDimension] {
        &self.dimensions
    }

    /// Number of combinations the space expands to.
    pub fn size(&self) -> usize {
        self.dimensions.iter().map(|d| d.values.len()).product()
    }

    /// Expand the Cartesian product of all dimensions.
    ///
    /// The first dimension varies slowest and values keep their declared
    /// order, so repeated calls yield identical sequences. No dimensions at
    /// all yields the single empty baseline combination.
    pub fn enumerate(&self) -> Result<Vec<Combination>> {
        self.validate()?;
        let mut outputs = Vec::with_capacity(self.size());
        expand(&self.dimensions, BTreeMap::new(), &mut outputs);
        Ok(outputs
            .into_iter()
            .enumerate()
            .map(|(index, values)| Combination { index, values })
            .collect())
    }

    /// Stable hash of the dimension definitions (names, values, order).
    pub fn fingerprint(&self) -> String {
        let canonical = serde_json::to_string(&self.dimensions).unwrap_or_default();
        content_hash(&canonical)
    }

    fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for dimension in &self.dimensions {
            if dimension.name.trim().is_empty() {
                return Err(EngineError::config("variation name must be non-empty"));
            }
            if !seen.insert(dimension.name.as_str()) {
                return Err(EngineError::config(format!(
                    "duplicate variation {}",
                    dimension.name
                )));
            }
            if dimension.values.is_empty() {
                return Err(EngineError::config(format!(
                    "variation {} has no values",
                    dimension.name
                )));
            }
        }
        Ok(())
    }
}

fn expand(
    dimensions: &[VariationDimension],
    current: BTreeMap<String, Value>,
    outputs: &mut Vec<BTreeMap<String, Value>>,
) {
    let Some((dimension, rest)) = dimensions.split_first() else {
        outputs.push(current);
        return;
    };
    for value in &dimension.values {
        let mut next = current.clone();
        next.insert(dimension.name.clone(), value.clone());
        expand(rest, next, outputs);
    }
}
