//! Append-only record of which collector produced which version of a
//! Property, and with what quality.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::raw_record::Source;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingMethod {
    Llm,
    Fallback,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionProvenance {
    pub source: Source,
    pub collected_at: DateTime<Utc>,
    pub collector_version: String,
    pub raw_payload_hash: String,
    pub processing_method: ProcessingMethod,
    pub processing_notes: Vec<String>,
    pub quality_score: f32,
}

impl CollectionProvenance {
    pub fn clamp_quality(mut self) -> Self {
        self.quality_score = self.quality_score.clamp(0.0, 1.0);
        self
    }
}

/// §8 idempotence property: a second identical upsert writes no new
/// provenance entry when the raw payload is unchanged.
pub fn should_append(existing: &[CollectionProvenance], candidate: &CollectionProvenance) -> bool {
    !existing
        .iter()
        .any(|p| p.source == candidate.source && p.raw_payload_hash == candidate.raw_payload_hash)
}
