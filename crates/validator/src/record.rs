//! Typed reasoning record and its schema.
//!
//! Documents arrive as untrusted JSON. `ReasoningRecord::from_document` is
//! the only place untyped data is inspected; everything after it works on
//! the typed record.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

/// Top-level fields every reasoning document must carry.
pub const REQUIRED_FIELDS: [&str; 4] = ["input", "reasoning_steps", "conclusion", "confidence"];

/// Schema violations. Any of these voids the record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("record is not a JSON object")]
    NotAnObject,

    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("field '{field}' must be {expected}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },

    #[error("field '{field}' must be a non-empty string")]
    InvalidText { field: &'static str },

    #[error("'reasoning_steps' must contain at least one step")]
    NoSteps,

    #[error("reasoning_steps[{position}] is not an object")]
    StepNotObject { position: usize },

    #[error("reasoning_steps[{position}] is missing '{field}'")]
    MissingStepField {
        position: usize,
        field: &'static str,
    },

    #[error("reasoning_steps[{position}].{field} must be a non-empty string")]
    InvalidStepText {
        position: usize,
        field: &'static str,
    },

    #[error("reasoning_steps[{position}].index must be a positive integer")]
    InvalidStepIndex { position: usize },
}

/// One step of an agent's reasoning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    #[serde(alias = "step_number")]
    pub index: u32,
    pub description: String,
    pub rationale: String,
}

impl Step {
    /// Positive index and non-empty text fields.
    pub fn is_well_formed(&self) -> bool {
        self.index > 0 && !self.description.is_empty() && !self.rationale.is_empty()
    }
}

/// A reasoning record that passed schema conformance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningRecord {
    pub input: String,
    #[serde(rename = "reasoning_steps")]
    pub steps: Vec<Step>,
    pub conclusion: String,
    pub confidence: f64,
}

impl ReasoningRecord {
    /// Check `document` against the reasoning schema and lift it into a
    /// typed record. Unknown extra fields are tolerated.
    pub fn from_document(document: &Value) -> Result<Self, SchemaError> {
        let object = document.as_object().ok_or(SchemaError::NotAnObject)?;

        for field in REQUIRED_FIELDS {
            if !object.contains_key(field) {
                return Err(SchemaError::MissingField(field));
            }
        }

        let input = string_field(object, "input")?;
        let conclusion = string_field(object, "conclusion")?;
        if conclusion.is_empty() {
            return Err(SchemaError::InvalidText {
                field: "conclusion",
            });
        }
        let confidence = object["confidence"].as_f64().ok_or(SchemaError::WrongType {
            field: "confidence",
            expected: "a number",
        })?;

        let raw_steps = object["reasoning_steps"]
            .as_array()
            .ok_or(SchemaError::WrongType {
                field: "reasoning_steps",
                expected: "an array",
            })?;
        if raw_steps.is_empty() {
            return Err(SchemaError::NoSteps);
        }

        let steps = raw_steps
            .iter()
            .enumerate()
            .map(|(position, raw)| parse_step(position, raw))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            input,
            steps,
            conclusion,
            confidence,
        })
    }

    /// Wire form of the record.
    pub fn to_document(&self) -> Value {
        let steps: Vec<Value> = self
            .steps
            .iter()
            .map(|step| {
                json!({
                    "index": step.index,
                    "description": step.description,
                    "rationale": step.rationale,
                })
            })
            .collect();

        json!({
            "input": self.input,
            "reasoning_steps": steps,
            "conclusion": self.conclusion,
            "confidence": self.confidence,
        })
    }
}

fn string_field(object: &Map<String, Value>, field: &'static str) -> Result<String, SchemaError> {
    object[field]
        .as_str()
        .map(str::to_string)
        .ok_or(SchemaError::WrongType {
            field,
            expected: "a string",
        })
}

fn parse_step(position: usize, raw: &Value) -> Result<Step, SchemaError> {
    let object = raw
        .as_object()
        .ok_or(SchemaError::StepNotObject { position })?;

    let index_value = object
        .get("index")
        .or_else(|| object.get("step_number"))
        .ok_or(SchemaError::MissingStepField {
            position,
            field: "index",
        })?;
    let index = index_value
        .as_u64()
        .filter(|i| *i > 0)
        .and_then(|i| u32::try_from(i).ok())
        .ok_or(SchemaError::InvalidStepIndex { position })?;

    let description = step_text(object, position, "description")?;
    let rationale = step_text(object, position, "rationale")?;

    Ok(Step {
        index,
        description,
        rationale,
    })
}

fn step_text(
    object: &Map<String, Value>,
    position: usize,
    field: &'static str,
) -> Result<String, SchemaError> {
    let value = object
        .get(field)
        .ok_or(SchemaError::MissingStepField { position, field })?;
    match value.as_str() {
        Some(text) if !text.is_empty() => Ok(text.to_string()),
        _ => Err(SchemaError::InvalidStepText { position, field }),
    }
}
