//! LLM-first extraction with rule-based fallback, cleaning and
//! normalization (§4.8).

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::time::Duration;

use super::client::{FieldSchema, LlmClient};
use super::rule_fallback;
use crate::domain::address::{clean_zipcode, normalize_text, title_case};
use crate::domain::ProcessingMethod;
use crate::validation::ProcessingValidator;

pub const BATCH_INTER_BATCH_DELAY: Duration = Duration::from_millis(500);

/// The 14 fields the canonical schema asks the LLM for (§4.8 step 1).
pub fn canonical_schema() -> HashMap<String, FieldSchema> {
    let field = |t: &str, d: &str| FieldSchema {
        field_type: t.to_string(),
        description: d.to_string(),
    };
    HashMap::from([
        ("address".to_string(), field("string", "street address")),
        ("city".to_string(), field("string", "city name")),
        ("state".to_string(), field("string", "two-letter state code")),
        ("zipcode".to_string(), field("string", "5-digit zip code")),
        ("price".to_string(), field("number", "listing or sale price in dollars")),
        ("bedrooms".to_string(), field("integer", "number of bedrooms")),
        ("bathrooms".to_string(), field("number", "number of bathrooms")),
        ("half_bathrooms".to_string(), field("integer", "number of half bathrooms")),
        ("square_feet".to_string(), field("integer", "interior square footage")),
        ("lot_size_sqft".to_string(), field("integer", "lot size in square feet")),
        ("year_built".to_string(), field("integer", "year the structure was built")),
        ("property_type".to_string(), field("string", "house, condo, townhouse, etc")),
        ("mls_id".to_string(), field("string", "MLS listing id")),
        ("description".to_string(), field("string", "free-text listing description")),
    ])
}

pub struct PropertyExtractor {
    llm: LlmClient,
    validator: ProcessingValidator,
    fallback_enabled: bool,
    batch_size: usize,
}

pub struct ExtractionOutcome {
    pub fields: Map<String, Value>,
    pub method: ProcessingMethod,
}

impl PropertyExtractor {
    pub fn new(llm: LlmClient, validator: ProcessingValidator, fallback_enabled: bool, batch_size: usize) -> Self {
        Self {
            llm,
            validator,
            fallback_enabled,
            batch_size: batch_size.max(1),
        }
    }

    /// §4.8 steps 1-4: try the LLM if healthy, validate, fall back to the
    /// rule extractor when the LLM is unusable or its output doesn't
    /// validate, clean whatever was found, return `None` if nothing
    /// survives.
    pub async fn extract(&self, content: &str, content_type: &str) -> Option<ExtractionOutcome> {
        let llm_healthy = self.llm.health().await;

        if llm_healthy {
            if let Some(raw) = self
                .llm
                .extract(content, &canonical_schema(), content_type)
                .await
            {
                let cleaned = clean(value_to_map(raw));
                if self.validator.validate(&cleaned).is_valid {
                    return Some(ExtractionOutcome {
                        fields: cleaned,
                        method: ProcessingMethod::Llm,
                    });
                }
            }
        }

        if self.fallback_enabled {
            let raw = rule_fallback::extract(content, content_type);
            if raw.is_empty() {
                return None;
            }
            let cleaned = clean(raw);
            return Some(ExtractionOutcome {
                fields: cleaned,
                method: ProcessingMethod::Fallback,
            });
        }

        None
    }

    /// Preflight check delegated to the underlying LLM client (§4.11 step
    /// 1: "LLM health check (non-fatal warning if down - fallback remains)").
    pub async fn llm_health(&self) -> bool {
        self.llm.health().await
    }

    /// Full validation result over an already-extracted field set. The
    /// pipeline's final gate (§4.10 step 3): a fallback extraction that
    /// never went through the LLM path's validity check still has to pass
    /// here before a `Property` is built from it.
    pub fn validate(&self, fields: &Map<String, Value>) -> crate::validation::ValidationResult {
        self.validator.validate(fields)
    }

    /// Process a list of (content, content_type) pairs, pacing the LLM by
    /// sleeping ~500ms between batches of `batch_size` (§4.8 "Batch
    /// operation").
    pub async fn extract_batch(
        &self,
        items: &[(String, String)],
    ) -> Vec<Option<ExtractionOutcome>> {
        let mut results = Vec::with_capacity(items.len());
        for chunk in items.chunks(self.batch_size) {
            for (content, content_type) in chunk {
                results.push(self.extract(content, content_type).await);
            }
            if results.len() < items.len() {
                tokio::time::sleep(BATCH_INTER_BATCH_DELAY).await;
            }
        }
        results
    }
}

fn value_to_map(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Cleaning rules (§4.8 step 3): normalize whitespace/case, strip ZIP+4,
/// safe-parse numerics (drop rather than error on failure), drop empty
/// free-text items.
pub fn clean(mut fields: Map<String, Value>) -> Map<String, Value> {
    if let Some(address) = fields.get("address").and_then(Value::as_str) {
        let cleaned = title_case(&normalize_text(address).replace('#', " # "));
        fields.insert("address".to_string(), Value::from(collapse_unit_duplication(&cleaned)));
    }

    if let Some(city) = fields.get("city").and_then(Value::as_str) {
        fields.insert("city".to_string(), Value::from(title_case(city.trim())));
    }

    if let Some(state) = fields.get("state").and_then(Value::as_str) {
        let upper = state.trim().to_uppercase();
        let normalized = if upper == "ARIZONA" { "AZ".to_string() } else { upper };
        fields.insert("state".to_string(), Value::from(normalized));
    }

    match fields.get("zipcode").and_then(Value::as_str).map(clean_zipcode) {
        Some(Some(zip)) => {
            fields.insert("zipcode".to_string(), Value::from(zip));
        }
        Some(None) => {
            fields.remove("zipcode");
        }
        None => {}
    }

    for numeric_field in [
        "price",
        "bedrooms",
        "bathrooms",
        "half_bathrooms",
        "square_feet",
        "lot_size_sqft",
        "year_built",
    ] {
        clean_numeric_field(&mut fields, numeric_field);
    }

    if let Some(Value::Array(items)) = fields.get("features").cloned() {
        let cleaned: Vec<Value> = items
            .into_iter()
            .filter_map(|v| v.as_str().map(|s| s.trim().to_string()))
            .filter(|s| !s.is_empty())
            .map(Value::from)
            .collect();
        fields.insert("features".to_string(), Value::from(cleaned));
    }

    fields
}

fn clean_numeric_field(fields: &mut Map<String, Value>, key: &str) {
    let Some(value) = fields.get(key) else { return };
    let parsed = match value {
        Value::Number(_) => Some(value.clone()),
        Value::String(s) => {
            let stripped: String = s.chars().filter(|c| *c != ',' && *c != '$').collect();
            stripped
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .map(number_from_f64)
        }
        _ => None,
    };
    match parsed {
        Some(v) => {
            fields.insert(key.to_string(), v);
        }
        None => {
            fields.remove(key);
        }
    }
}

/// A whole-valued amount becomes an integer-typed `Value` rather than a
/// float so fields read via `Value::as_i64` downstream (bedrooms,
/// square_feet, ...) still find it; `Value::as_f64` works either way, so
/// fractional amounts (e.g. "2.5" bathrooms) stay floats.
fn number_from_f64(f: f64) -> Value {
    if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
        Value::from(f as i64)
    } else {
        Value::from(f)
    }
}

/// Strips a duplicated unit suffix such as "123 Main St Unit Unit 4" down
/// to "123 Main St Unit 4", which some sources emit when concatenating a
/// unit field onto an address that already contains it.
fn collapse_unit_duplication(address: &str) -> String {
    address.replace("Unit Unit", "Unit").replace("Apt Apt", "Apt")
}
