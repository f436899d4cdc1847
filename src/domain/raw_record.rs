//! Opaque capture of one property observation from a single source.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The two external sources this pipeline harvests from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Source {
    AssessorApi,
    MlsScrape,
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Source::AssessorApi => write!(f, "assessor_api"),
            Source::MlsScrape => write!(f, "mls_scrape"),
        }
    }
}

/// The shape of the captured payload - one of three mutually exclusive forms.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Payload {
    Html(String),
    Text(String),
    Structured(serde_json::Value),
}

impl Payload {
    /// Join any string-bearing fields into a single block of text, used when
    /// no richer payload is available (§4.10 step 1: "else synthesize text").
    pub fn as_text_best_effort(&self) -> String {
        match self {
            Payload::Text(t) => t.clone(),
            Payload::Html(h) => h.clone(),
            Payload::Structured(v) => collect_strings(v).join(" "),
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Payload::Html(_) => "html",
            Payload::Text(_) => "text",
            Payload::Structured(_) => "text",
        }
    }
}

fn collect_strings(value: &serde_json::Value) -> Vec<String> {
    match value {
        serde_json::Value::String(s) => vec![s.clone()],
        serde_json::Value::Array(items) => items.iter().flat_map(collect_strings).collect(),
        serde_json::Value::Object(map) => map.values().flat_map(collect_strings).collect(),
        other => vec![other.to_string()],
    }
}

/// A raw, source-labeled observation handed from a Collector to the
/// Processing Pipeline. Consumed exactly once; its hash survives in
/// [`crate::domain::provenance::CollectionProvenance`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRecord {
    pub source: Source,
    pub source_key: String,
    pub fetched_at: DateTime<Utc>,
    pub payload: Payload,
    pub context: HashMap<String, serde_json::Value>,
}

impl RawRecord {
    pub fn new(source: Source, source_key: impl Into<String>, payload: Payload) -> Self {
        Self {
            source,
            source_key: source_key.into(),
            fetched_at: Utc::now(),
            payload,
            context: HashMap::new(),
        }
    }

    pub fn with_context(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.context.insert(key.to_string(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthesizes_text_from_structured_payload() {
        let payload = Payload::Structured(serde_json::json!({
            "situs_address": "123 MAIN ST",
            "zip": "85031",
            "total_assessed_value": 250000,
        }));
        let text = payload.as_text_best_effort();
        assert!(text.contains("123 MAIN ST"));
        assert!(text.contains("85031"));
    }

    #[test]
    fn html_content_type_is_reported() {
        let payload = Payload::Html("<div></div>".to_string());
        assert_eq!(payload.content_type(), "html");
    }
}
