//! Typed facial attribute records.
//!
//! Attribute analyzers answer with loosely-structured JSON, one object per
//! face, keyed by attribute name (`age`, `gender`, `dominant_gender`,
//! `emotion`, `dominant_emotion`, `race`, `dominant_race`, `region`).
//! [`parse_analysis`] turns that response into [`FaceAnalysis`] records so
//! nothing downstream handles the raw map.

use crate::types::Region;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum AttributeError {
    #[error("analysis must be an object or an array of objects, got {0}")]
    NotAnObject(&'static str),
    #[error("malformed `{key}`: {reason}")]
    Malformed { key: &'static str, reason: String },
}

/// Categorical prediction: the winning label and the per-label scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub dominant: String,
    pub scores: BTreeMap<String, f64>,
}

/// One analyzed facial attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Attribute {
    Age { years: u32 },
    Gender(Classification),
    Emotion(Classification),
    Race(Classification),
}

/// Attributes of a single analyzed face.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceAnalysis {
    pub region: Option<Region>,
    pub attributes: Vec<Attribute>,
}

impl FaceAnalysis {
    pub fn age(&self) -> Option<u32> {
        self.attributes.iter().find_map(|a| match a {
            Attribute::Age { years } => Some(*years),
            _ => None,
        })
    }

    pub fn emotion(&self) -> Option<&Classification> {
        self.attributes.iter().find_map(|a| match a {
            Attribute::Emotion(c) => Some(c),
            _ => None,
        })
    }
}

/// Parse an analyzer response into per-face attribute records.
///
/// Accepts a single face object or an array of them. Absent attributes are
/// skipped; present but malformed ones are an error.
pub fn parse_analysis(raw: &Value) -> Result<Vec<FaceAnalysis>, AttributeError> {
    match raw {
        Value::Array(faces) => faces
            .iter()
            .map(|face| match face {
                Value::Object(map) => parse_face(map),
                other => Err(AttributeError::NotAnObject(json_kind(other))),
            })
            .collect(),
        Value::Object(map) => Ok(vec![parse_face(map)?]),
        other => Err(AttributeError::NotAnObject(json_kind(other))),
    }
}

fn parse_face(map: &Map<String, Value>) -> Result<FaceAnalysis, AttributeError> {
    let mut attributes = Vec::new();

    if let Some(age) = map.get("age") {
        let years = age
            .as_f64()
            .filter(|v| v.is_finite() && *v >= 0.0)
            .ok_or_else(|| malformed("age", format!("expected a non-negative number, got {age}")))?;
        attributes.push(Attribute::Age {
            years: years.round() as u32,
        });
    }

    if let Some(c) = parse_classification(map, "gender", "dominant_gender")? {
        attributes.push(Attribute::Gender(c));
    }
    if let Some(c) = parse_classification(map, "emotion", "dominant_emotion")? {
        attributes.push(Attribute::Emotion(c));
    }
    if let Some(c) = parse_classification(map, "race", "dominant_race")? {
        attributes.push(Attribute::Race(c));
    }

    let region = map.get("region").map(parse_region).transpose()?;

    Ok(FaceAnalysis { region, attributes })
}

/// A classification is either a bare label (`"gender": "Man"`) or a score
/// map plus a `dominant_*` key. Without a dominant key the top score wins.
fn parse_classification(
    map: &Map<String, Value>,
    key: &'static str,
    dominant_key: &'static str,
) -> Result<Option<Classification>, AttributeError> {
    let dominant = match map.get(dominant_key) {
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => return Err(malformed(dominant_key, format!("expected a string, got {other}"))),
        None => None,
    };

    let scores = match map.get(key) {
        None => BTreeMap::new(),
        Some(Value::String(label)) => {
            return Ok(Some(Classification {
                dominant: dominant.unwrap_or_else(|| label.clone()),
                scores: BTreeMap::new(),
            }));
        }
        Some(Value::Object(entries)) => entries
            .iter()
            .map(|(label, score)| {
                score
                    .as_f64()
                    .map(|s| (label.clone(), s))
                    .ok_or_else(|| malformed(key, format!("score for {label} is not a number")))
            })
            .collect::<Result<BTreeMap<_, _>, _>>()?,
        Some(other) => return Err(malformed(key, format!("expected a label or score map, got {other}"))),
    };

    let dominant = dominant.or_else(|| {
        scores
            .iter()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(label, _)| label.clone())
    });

    Ok(dominant.map(|dominant| Classification { dominant, scores }))
}

fn parse_region(value: &Value) -> Result<Region, AttributeError> {
    let field = |name: &str| -> Result<u32, AttributeError> {
        value
            .get(name)
            .and_then(Value::as_f64)
            .filter(|v| v.is_finite() && *v >= 0.0)
            .map(|v| v.round() as u32)
            .ok_or_else(|| malformed("region", format!("missing or negative `{name}`")))
    };
    let (x, y, w, h) = (field("x")?, field("y")?, field("w")?, field("h")?);
    Ok(Region::new(y, x.saturating_add(w), y.saturating_add(h), x))
}

fn malformed(key: &'static str, reason: String) -> AttributeError {
    AttributeError::Malformed { key, reason }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
