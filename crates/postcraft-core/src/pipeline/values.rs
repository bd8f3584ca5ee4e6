//! Normalized stage outputs
//!
//! The LM may hand back any field as free text even when a number or a JSON
//! object was asked for. Raw values are converted here, once, into the types
//! the rest of the crate works with.

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::LazyLock;

/// Placeholder written for every dimension when a characterization can't be parsed
pub const FALLBACK_PLACEHOLDER: &str = "extracted from sample";

/// Dimensions filled in by the analyzer's fallback mapping
pub const FALLBACK_DIMENSIONS: &[&str] =
    &["tone", "structure", "formatting", "hooks_and_cta", "emoji_usage"];

/// Score used when a numeric field can't be parsed at all
pub const DEFAULT_SCORE: f32 = 0.5;

/// First number in free text, with an optional `%` or `/ denominator`
static RE_SCORE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(-?\d+(?:\.\d+)?)\s*(%|/\s*(\d+(?:\.\d+)?))?").expect("valid regex")
});

/// A style characterization: free text, or a mapping of dimension to description
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StyleCharacteristics {
    Text(String),
    Structured(BTreeMap<String, String>),
}

impl StyleCharacteristics {
    /// Convert any JSON value; objects become mappings, everything else text
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => Self::Structured(
                map.into_iter()
                    .map(|(k, v)| (k, value_to_text(v)))
                    .collect(),
            ),
            other => Self::Text(value_to_text(other)),
        }
    }

    /// Placeholder mapping used when the analyzer output isn't a JSON object
    pub fn fallback() -> Self {
        Self::Structured(
            FALLBACK_DIMENSIONS
                .iter()
                .map(|d| (d.to_string(), FALLBACK_PLACEHOLDER.to_string()))
                .collect(),
        )
    }

    /// Analyzer normalization: JSON object text is parsed, anything else falls back
    pub fn normalize(raw: Option<Value>) -> Self {
        match raw {
            Some(Value::Object(map)) if !map.is_empty() => Self::from_value(Value::Object(map)),
            Some(Value::String(text)) => match parse_json_object(&text) {
                Some(map) if !map.is_empty() => Self::from_value(Value::Object(map)),
                _ => Self::fallback(),
            },
            _ => Self::fallback(),
        }
    }

    /// Text handed to the transformer as its style input
    pub fn to_prompt_text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Structured(map) => {
                serde_json::to_string_pretty(map).unwrap_or_else(|_| format!("{:?}", map))
            }
        }
    }
}

impl<'de> Deserialize<'de> for StyleCharacteristics {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(Self::from_value)
    }
}

fn value_to_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Parse a JSON object out of text, tolerating prose or code fences around it
pub fn parse_json_object(text: &str) -> Option<serde_json::Map<String, Value>> {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(text.trim()) {
        return Some(map);
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str::<Value>(&text[start..=end]) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// A numeric score as received: already a number, or text to be parsed
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RawScore {
    Number(f64),
    Text(String),
}

impl RawScore {
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Number(n) => n.as_f64().map(Self::Number).unwrap_or(Self::Text(n.to_string())),
            Value::String(s) => Self::Text(s),
            other => Self::Text(value_to_text(other)),
        }
    }

    /// Bounded score in [0, 1]; unparseable input yields [`DEFAULT_SCORE`]
    pub fn coerce(&self) -> f32 {
        match self {
            Self::Number(n) if n.is_finite() => (*n as f32).clamp(0.0, 1.0),
            Self::Number(_) => DEFAULT_SCORE,
            Self::Text(text) => coerce_score_text(text),
        }
    }
}

impl<'de> Deserialize<'de> for RawScore {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(Self::from_value)
    }
}

/// `"75%"` -> 0.75, `"0.9"` -> 0.9, `"8/10"` -> 0.8, no number -> 0.5
pub fn coerce_score_text(text: &str) -> f32 {
    let trimmed = text.trim();

    if let Some(percent) = trimmed.strip_suffix('%') {
        match percent.trim().parse::<f32>() {
            Ok(value) if value.is_finite() => return (value / 100.0).clamp(0.0, 1.0),
            Ok(_) => return DEFAULT_SCORE,
            Err(_) => {}
        }
    }
    match trimmed.parse::<f32>() {
        Ok(value) if value.is_finite() => return value.clamp(0.0, 1.0),
        Ok(_) => return DEFAULT_SCORE,
        Err(_) => {}
    }

    let Some(caps) = RE_SCORE.captures(trimmed) else {
        return DEFAULT_SCORE;
    };
    let Ok(value) = caps[1].parse::<f32>() else {
        return DEFAULT_SCORE;
    };
    let scaled = match (caps.get(2).map(|m| m.as_str()), caps.get(3)) {
        (Some("%"), _) => value / 100.0,
        (_, Some(denominator)) => match denominator.as_str().parse::<f32>() {
            Ok(d) if d > 0.0 => value / d,
            _ => return DEFAULT_SCORE,
        },
        _ => value,
    };
    if !scaled.is_finite() {
        return DEFAULT_SCORE;
    }
    scaled.clamp(0.0, 1.0)
}

/// Fields produced by one or more pipeline stages
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style_characteristics: Option<StyleCharacteristics>,
    /// The rewritten post
    #[serde(
        default,
        alias = "linkedin_article",
        alias = "styled_content",
        skip_serializing_if = "Option::is_none"
    )]
    pub article: Option<String>,
    #[serde(
        default,
        alias = "similarity_score",
        skip_serializing_if = "Option::is_none"
    )]
    pub quality_score: Option<RawScore>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
}

impl Prediction {
    pub fn with_style(style: StyleCharacteristics) -> Self {
        Self {
            style_characteristics: Some(style),
            ..Default::default()
        }
    }

    pub fn with_article(article: impl Into<String>) -> Self {
        Self {
            article: Some(article.into()),
            ..Default::default()
        }
    }

    /// Output fields as a JSON map, used when recording demonstrations
    pub fn to_fields(&self) -> serde_json::Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_score_coercion() {
        assert!((coerce_score_text("75%") - 0.75).abs() < 1e-6);
        assert!((coerce_score_text("0.9") - 0.9).abs() < 1e-6);
        assert!((coerce_score_text("Score: 8/10") - 0.8).abs() < 1e-6);
        assert_eq!(coerce_score_text("excellent"), DEFAULT_SCORE);
        assert_eq!(coerce_score_text(""), DEFAULT_SCORE);
        assert_eq!(coerce_score_text("7"), 1.0);
        assert_eq!(coerce_score_text("-3"), 0.0);
        assert_eq!(coerce_score_text("150%"), 1.0);
        assert_eq!(coerce_score_text("NaN%"), DEFAULT_SCORE);
        assert_eq!(coerce_score_text("nan"), DEFAULT_SCORE);
        assert_eq!(coerce_score_text("inf"), DEFAULT_SCORE);
        assert_eq!(coerce_score_text("-infinity%"), DEFAULT_SCORE);
    }

    #[test]
    fn test_raw_score_from_value() {
        assert_eq!(RawScore::from_value(json!(0.4)).coerce(), 0.4);
        assert_eq!(RawScore::from_value(json!("40%")).coerce(), 0.4);
        assert_eq!(RawScore::from_value(json!(null)).coerce(), DEFAULT_SCORE);
        assert_eq!(RawScore::from_value(json!(2)).coerce(), 1.0);
    }

    #[test]
    fn test_normalize_style_json_text() {
        let raw = json!("Here you go:\n```json\n{\"tone\": \"upbeat\", \"emoji_usage\": [\"🚀\"]}\n```");
        let style = StyleCharacteristics::normalize(Some(raw));
        match style {
            StyleCharacteristics::Structured(map) => {
                assert_eq!(map["tone"], "upbeat");
                assert_eq!(map["emoji_usage"], "[\"🚀\"]");
            }
            other => panic!("expected structured, got {:?}", other),
        }
    }

    #[test]
    fn test_normalize_style_fallback() {
        let style = StyleCharacteristics::normalize(Some(json!("Casual, punchy, lots of emoji")));
        assert_eq!(style, StyleCharacteristics::fallback());
        assert_eq!(StyleCharacteristics::normalize(None), StyleCharacteristics::fallback());
        assert_eq!(StyleCharacteristics::normalize(Some(json!({}))), StyleCharacteristics::fallback());
    }

    #[test]
    fn test_prediction_aliases() {
        let prediction: Prediction = serde_json::from_value(json!({
            "styled_content": "Rewritten",
            "similarity_score": "85%",
            "feedback": "fine"
        }))
        .unwrap();
        assert_eq!(prediction.article.as_deref(), Some("Rewritten"));
        assert!((prediction.quality_score.unwrap().coerce() - 0.85).abs() < 1e-6);
    }
}
