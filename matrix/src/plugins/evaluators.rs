//! Built-in evaluators.

use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use jsonschema::{Draft, Validator};
use regex::Regex;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::core::evaluate::{EvalInput, Evaluator};
use crate::core::types::Score;
use crate::plugins::PluginArgs;

/// Render an output value as plain text (strings without quotes).
fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// 1.0 when the output equals the item's expected value, 0.0 otherwise.
#[derive(Debug, Clone)]
pub struct ExactMatch {
    name: String,
    case_sensitive: bool,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct ExactMatchOptions {
    case_sensitive: bool,
}

impl Default for ExactMatchOptions {
    fn default() -> Self {
        Self {
            case_sensitive: true,
        }
    }
}

impl ExactMatch {
    pub fn new(name: impl Into<String>, case_sensitive: bool) -> Self {
        Self {
            name: name.into(),
            case_sensitive,
        }
    }
}

impl Evaluator for ExactMatch {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self, input: &EvalInput<'_>) -> Result<Score> {
        let expected = input
            .item
            .expected
            .as_ref()
            .ok_or_else(|| anyhow!("item {} has no expected value", input.item.id))?;
        let (actual, expected) = (as_text(input.output), as_text(expected));
        let (actual, expected) = (actual.trim(), expected.trim());
        let matched = if self.case_sensitive {
            actual == expected
        } else {
            actual.to_lowercase() == expected.to_lowercase()
        };
        Ok(Score::new(if matched { 1.0 } else { 0.0 }))
    }
}

pub fn exact_match_factory(args: &PluginArgs<'_>) -> Result<Arc<dyn Evaluator>> {
    let options: ExactMatchOptions = args.parse()?;
    Ok(Arc::new(ExactMatch::new(args.name, options.case_sensitive)))
}

/// 1.0 when the textual output matches a regular expression.
#[derive(Debug, Clone)]
pub struct RegexMatch {
    name: String,
    pattern: Regex,
}

#[derive(Debug, Deserialize)]
struct RegexOptions {
    pattern: String,
}

impl RegexMatch {
    pub fn new(name: impl Into<String>, pattern: &str) -> Result<Self> {
        let pattern = Regex::new(pattern).with_context(|| format!("compile regex {pattern}"))?;
        Ok(Self {
            name: name.into(),
            pattern,
        })
    }
}

impl Evaluator for RegexMatch {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self, input: &EvalInput<'_>) -> Result<Score> {
        let text = as_text(input.output);
        let matches = self.pattern.find_iter(&text).count();
        Ok(Score::new(if matches > 0 { 1.0 } else { 0.0 }).with_metadata(json!({
            "matches": matches,
        })))
    }
}

pub fn regex_match_factory(args: &PluginArgs<'_>) -> Result<Arc<dyn Evaluator>> {
    let options: RegexOptions = args.parse()?;
    Ok(Arc::new(RegexMatch::new(args.name, &options.pattern)?))
}

/// 1.0 when the output validates against a JSON Schema (Draft 2020-12).
///
/// String outputs are parsed as JSON first; unparsable strings fail
/// validation rather than the evaluator.
pub struct JsonSchemaCheck {
    name: String,
    validator: Validator,
}

#[derive(Debug, Deserialize)]
struct JsonSchemaOptions {
    schema: Value,
}

impl JsonSchemaCheck {
    pub fn new(name: impl Into<String>, schema: &Value) -> Result<Self> {
        let validator = jsonschema::options()
            .with_draft(Draft::Draft202012)
            .build(schema)
            .map_err(|err| anyhow!("compile json schema: {err}"))?;
        Ok(Self {
            name: name.into(),
            validator,
        })
    }
}

impl Evaluator for JsonSchemaCheck {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self, input: &EvalInput<'_>) -> Result<Score> {
        let instance = match input.output {
            Value::String(raw) => match serde_json::from_str::<Value>(raw) {
                Ok(value) => value,
                Err(err) => {
                    return Ok(Score::new(0.0).with_metadata(json!({
                        "errors": [format!("output is not JSON: {err}")],
                    })));
                }
            },
            other => other.clone(),
        };
        let errors: Vec<String> = self
            .validator
            .iter_errors(&instance)
            .map(|err| err.to_string())
            .collect();
        let value = if errors.is_empty() { 1.0 } else { 0.0 };
        Ok(Score::new(value).with_metadata(json!({ "errors": errors })))
    }
}

pub fn json_schema_factory(args: &PluginArgs<'_>) -> Result<Arc<dyn Evaluator>> {
    let options: JsonSchemaOptions = args.parse()?;
    Ok(Arc::new(JsonSchemaCheck::new(args.name, &options.schema)?))
}

/// Character length of the textual output.
#[derive(Debug, Clone)]
pub struct OutputLength {
    name: String,
}

impl OutputLength {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Evaluator for OutputLength {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self, input: &EvalInput<'_>) -> Result<Score> {
        Ok(Score::new(as_text(input.output).chars().count() as f64))
    }
}

pub fn length_factory(args: &PluginArgs<'_>) -> Result<Arc<dyn Evaluator>> {
    Ok(Arc::new(OutputLength::new(args.name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::InputItem;
    use crate::test_support::combination;

    fn score(evaluator: &dyn Evaluator, item: &InputItem, output: Value) -> Result<Score> {
        let combo = combination(0, &[]);
        evaluator.evaluate(&EvalInput {
            item,
            combination: &combo,
            output: &output,
        })
    }

    #[test]
    fn exact_match_trims_and_compares() {
        let item = InputItem::new("i", json!("q")).with_expected(json!("Paris"));
        let strict = ExactMatch::new("exact", true);
        assert_eq!(score(&strict, &item, json!(" Paris\n")).expect("score").value, 1.0);
        assert_eq!(score(&strict, &item, json!("paris")).expect("score").value, 0.0);
        let loose = ExactMatch::new("exact", false);
        assert_eq!(score(&loose, &item, json!("paris")).expect("score").value, 1.0);
    }

    #[test]
    fn exact_match_requires_expected() {
        let item = InputItem::new("i", json!("q"));
        let err = score(&ExactMatch::new("exact", true), &item, json!("x")).expect_err("missing");
        assert!(err.to_string().contains("no expected value"));
    }

    #[test]
    fn regex_match_counts_matches() {
        let item = InputItem::new("i", json!(null));
        let evaluator = RegexMatch::new("cats", r"cat\w*").expect("regex");
        let scored = score(&evaluator, &item, json!("cat and cats")).expect("score");
        assert_eq!(scored.value, 1.0);
        assert_eq!(scored.metadata["matches"], json!(2));
        assert_eq!(score(&evaluator, &item, json!("dog")).expect("score").value, 0.0);
    }

    #[test]
    fn json_schema_validates_string_outputs() {
        let item = InputItem::new("i", json!(null));
        let schema = json!({
            "type": "object",
            "required": ["answer"],
            "properties": { "answer": { "type": "string" } }
        });
        let evaluator = JsonSchemaCheck::new("schema", &schema).expect("schema");
        assert_eq!(
            score(&evaluator, &item, json!("{\"answer\": \"yes\"}")).expect("score").value,
            1.0
        );
        let failed = score(&evaluator, &item, json!({ "answer": 3 })).expect("score");
        assert_eq!(failed.value, 0.0);
        assert!(!failed.metadata["errors"].as_array().expect("errors").is_empty());
        assert_eq!(score(&evaluator, &item, json!("not json")).expect("score").value, 0.0);
    }

    #[test]
    fn length_counts_characters() {
        let item = InputItem::new("i", json!(null));
        let scored = score(&OutputLength::new("len"), &item, json!("héllo")).expect("score");
        assert_eq!(scored.value, 5.0);
    }
}
