//! Per-item and batched orchestration: extract -> validate -> enrich ->
//! persist (§4.10).

use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

use crate::domain::address::{clean_zipcode, title_case};
use crate::domain::{
    CollectionProvenance, Payload, Property, PropertyAddress, PropertyFeatures, PropertyType, RawRecord, Source,
};
use crate::hashing::hash_json;
use crate::llm::extractor::PropertyExtractor;
use crate::metrics::Metrics;
use crate::repository::Repository;

const CHUNK_DELAY: Duration = Duration::from_millis(500);

pub struct ProcessingPipeline {
    extractor: Arc<PropertyExtractor>,
    repository: Arc<dyn Repository>,
    metrics: Arc<Metrics>,
    batch_size: usize,
    max_concurrent: usize,
}

#[derive(Debug, Default)]
pub struct BatchResult {
    pub processed: usize,
    pub failed: usize,
    pub duration: Duration,
    pub errors: Vec<String>,
    /// Successfully processed properties, for callers (the Orchestrator)
    /// that aggregate per-run report statistics over them (§4.11 step 3).
    pub properties: Vec<Property>,
}

impl BatchResult {
    pub fn success(&self) -> bool {
        self.processed > 0
    }

    fn push_error(&mut self, message: String) {
        if self.errors.len() < 10 {
            self.errors.push(message);
        }
    }
}

impl ProcessingPipeline {
    pub fn new(
        extractor: Arc<PropertyExtractor>,
        repository: Arc<dyn Repository>,
        metrics: Arc<Metrics>,
        batch_size: usize,
        max_concurrent: usize,
    ) -> Self {
        Self {
            extractor,
            repository,
            metrics,
            batch_size: batch_size.max(1),
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// §4.10 single-item path. Returns `None` on extraction failure or
    /// validation rejection - never propagates an error to the caller.
    pub async fn process(&self, raw: &RawRecord) -> Option<Property> {
        let content_type = raw.payload.content_type();
        let content = select_payload_text(&raw.payload);

        let outcome = self.extractor.extract(&content, content_type).await?;
        let mut fields = outcome.fields;
        merge_selector_fields(&mut fields, raw);

        // §4.10 step 3: validate before building anything from the
        // extracted fields; a failure here is logged and the item is
        // dropped, never propagated as an error (spec.md §8 scenario S4).
        let validation = self.extractor.validate(&fields);
        if !validation.is_valid {
            tracing::warn!(
                source = %raw.source,
                source_key = %raw.source_key,
                errors = ?validation.errors,
                "extracted record failed validation; dropping item",
            );
            return None;
        }

        let address = build_address(&fields);
        let mut property = Property::new(address, property_type_from_fields(&fields));
        apply_fields(&mut property, &fields);

        let confidence = validation.confidence_score;

        let provenance = CollectionProvenance {
            source: raw.source,
            collected_at: Utc::now(),
            collector_version: env!("CARGO_PKG_VERSION").to_string(),
            raw_payload_hash: hash_payload(raw),
            processing_method: outcome.method,
            processing_notes: vec![],
            quality_score: confidence,
        }
        .clamp_quality();
        property.append_provenance(provenance);
        property.touch();

        self.metrics
            .items_processed_total
            .with_label_values(&[raw.source.to_string().as_str(), "processed"])
            .inc();

        match self.repository.upsert(property.clone()).await {
            Ok(_property_id) => Some(property),
            Err(err) => {
                tracing::warn!(error = %err, property_id = %property.property_id, "repository write failed; item not retried this run");
                Some(property)
            }
        }
    }

    /// §4.10 batch path. Chunks are processed sequentially (pacing the
    /// LLM); within a chunk, items run concurrently bounded by
    /// `max_concurrent`. Per-item panics/errors are caught and counted,
    /// never abort the batch.
    pub async fn process_batch(&self, records: &[RawRecord]) -> BatchResult {
        let started = Instant::now();
        let mut result = BatchResult::default();
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));

        for (chunk_index, chunk) in records.chunks(self.batch_size).enumerate() {
            let mut handles = Vec::with_capacity(chunk.len());
            for record in chunk {
                let permit = semaphore.clone().acquire_owned().await.expect("semaphore not closed");
                let record = record.clone();
                let this = self.clone_for_task();
                handles.push(tokio::spawn(async move {
                    let _permit = permit;
                    this.process(&record).await
                }));
            }

            for handle in handles {
                match handle.await {
                    Ok(Some(property)) => {
                        result.processed += 1;
                        result.properties.push(property);
                    }
                    Ok(None) => {
                        result.failed += 1;
                        result.push_error("item failed extraction or validation".to_string());
                    }
                    Err(join_error) => {
                        result.failed += 1;
                        result.push_error(format!("item task panicked: {join_error}"));
                    }
                }
            }

            if chunk_index + 1 < records.chunks(self.batch_size).count() {
                tokio::time::sleep(CHUNK_DELAY).await;
            }
        }

        result.duration = started.elapsed();
        result
    }

    fn clone_for_task(&self) -> ProcessingPipeline {
        ProcessingPipeline {
            extractor: self.extractor.clone(),
            repository: self.repository.clone(),
            metrics: self.metrics.clone(),
            batch_size: self.batch_size,
            max_concurrent: self.max_concurrent,
        }
    }
}

/// §4.10 step 1: prefer html, else text, else synthesize text by joining
/// string fields of a structured payload.
fn select_payload_text(payload: &Payload) -> String {
    payload.as_text_best_effort()
}

fn hash_payload(raw: &RawRecord) -> String {
    match &raw.payload {
        Payload::Structured(v) => hash_json(v),
        Payload::Html(s) | Payload::Text(s) => crate::hashing::hash_str(s),
    }
}

/// Fills in any canonical field the LLM/rule extraction missed using the
/// MLS collector's selector-driven detail-page fields (§4.5 step 3), if the
/// record carries any under its `selector_fields` context key. Never
/// overrides a field the extraction already found.
fn merge_selector_fields(fields: &mut serde_json::Map<String, Value>, raw: &RawRecord) {
    let Some(Value::Object(selector_fields)) = raw.context.get("selector_fields") else {
        return;
    };

    let mut supplement = serde_json::Map::new();

    if !fields.contains_key("address") {
        if let Some(address) = selector_fields.get("address").and_then(Value::as_str) {
            for (key, value) in crate::llm::rule_fallback::split_address_components(address) {
                if !fields.contains_key(&key) {
                    supplement.insert(key, Value::from(value));
                }
            }
        }
    }

    const NUMERIC_KEYS: &[(&str, &str)] = &[
        ("price", "price"),
        ("beds", "bedrooms"),
        ("baths", "bathrooms"),
        ("sqft", "square_feet"),
    ];
    for (selector_key, canonical_key) in NUMERIC_KEYS {
        if !fields.contains_key(*canonical_key) {
            if let Some(value) = selector_fields.get(*selector_key) {
                supplement.insert(canonical_key.to_string(), value.clone());
            }
        }
    }
    if !fields.contains_key("description") {
        if let Some(value) = selector_fields.get("description") {
            supplement.insert("description".to_string(), value.clone());
        }
    }

    // Run the supplement through the same cleaning rules the LLM/rule
    // paths already applied, so a selector-found "street, city, state
    // zip" string or a "$199,900"-shaped price normalizes identically.
    for (key, value) in crate::llm::extractor::clean(supplement) {
        fields.entry(key).or_insert(value);
    }
}

fn build_address(fields: &serde_json::Map<String, Value>) -> PropertyAddress {
    let street = fields
        .get("address")
        .and_then(Value::as_str)
        .map(title_case)
        .unwrap_or_default();
    let zipcode = fields
        .get("zipcode")
        .and_then(Value::as_str)
        .and_then(clean_zipcode)
        .unwrap_or_default();
    let mut address = PropertyAddress::new(street, zipcode);
    if let Some(city) = fields.get("city").and_then(Value::as_str) {
        address.city = city.to_string();
    }
    if let Some(state) = fields.get("state").and_then(Value::as_str) {
        address.state = state.to_string();
    }
    address
}

fn property_type_from_fields(fields: &serde_json::Map<String, Value>) -> PropertyType {
    match fields.get("property_type").and_then(Value::as_str) {
        Some(s) if s.eq_ignore_ascii_case("condo") => PropertyType::Condo,
        Some(s) if s.eq_ignore_ascii_case("townhouse") => PropertyType::Townhouse,
        Some(s) if s.eq_ignore_ascii_case("multi_family") || s.eq_ignore_ascii_case("multi-family") => {
            PropertyType::MultiFamily
        }
        Some(s) if s.eq_ignore_ascii_case("vacant_land") || s.eq_ignore_ascii_case("land") => {
            PropertyType::VacantLand
        }
        Some(s) if s.eq_ignore_ascii_case("house") || s.eq_ignore_ascii_case("single_family") => {
            PropertyType::SingleFamily
        }
        _ => PropertyType::Other,
    }
}

fn apply_fields(property: &mut Property, fields: &serde_json::Map<String, Value>) {
    let mut features = PropertyFeatures::default();
    features.bedrooms = fields.get("bedrooms").and_then(Value::as_i64).map(|n| n as i32);
    features.bathrooms = fields.get("bathrooms").and_then(Value::as_f64).map(|n| n as f32);
    features.half_bathrooms = fields.get("half_bathrooms").and_then(Value::as_i64).map(|n| n as i32);
    features.square_feet = fields.get("square_feet").and_then(Value::as_i64).map(|n| n as i32);
    features.lot_size_sqft = fields.get("lot_size_sqft").and_then(Value::as_i64).map(|n| n as i32);
    features.year_built = fields.get("year_built").and_then(Value::as_i64).map(|n| n as i32);
    property.features = features;

    if let Some(price) = fields.get("price").and_then(Value::as_f64) {
        property.record_price(crate::domain::PriceObservation {
            amount: price,
            date: Utc::now(),
            price_type: crate::domain::PriceType::Listing,
            source: Source::MlsScrape,
            confidence: 0.8,
        });
    }

    for (key, value) in fields {
        property.raw_data.insert(key.clone(), value.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ValidationConfig;
    use crate::domain::raw_record::Source as RecordSource;
    use crate::llm::client::LlmClient;
    use crate::repository::InMemoryRepository;
    use crate::validation::ProcessingValidator;

    fn extractor() -> Arc<PropertyExtractor> {
        let llm = LlmClient::new(crate::config::LlmConfig {
            base_url: "http://127.0.0.1:1".to_string(), // unreachable: forces fallback
            model: "llama3.2:latest".to_string(),
            timeout_s: 1,
            max_retries: 1,
            batch_size: 5,
        });
        let validator = ProcessingValidator::new(
            ValidationConfig {
                min_confidence: 0.0,
                strict: false,
                min_price: 10_000.0,
                max_price: 10_000_000.0,
                min_sqft: 100,
                max_sqft: 20_000,
            },
            2026,
        );
        Arc::new(PropertyExtractor::new(llm, validator, true, 5))
    }

    #[tokio::test]
    async fn fallback_path_produces_a_property_when_llm_is_unreachable() {
        let pipeline = ProcessingPipeline::new(
            extractor(),
            Arc::new(InMemoryRepository::new()),
            Metrics::new(),
            10,
            3,
        );
        let raw = RawRecord::new(
            RecordSource::MlsScrape,
            "https://mls.example.test/123",
            Payload::Html(
                r#"<div class="listing-address">123 Test St, Phoenix, AZ 85031</div>$299,900 — 3 beds | 2 baths | 1,450 sqft"#
                    .to_string(),
            ),
        );
        let property = pipeline.process(&raw).await.expect("fallback should succeed");
        assert_eq!(property.address.zipcode, "85031");
        assert_eq!(property.provenance[0].processing_method, crate::domain::ProcessingMethod::Fallback);
    }

    #[tokio::test]
    async fn batch_reports_success_when_at_least_one_item_processed() {
        let pipeline = ProcessingPipeline::new(
            extractor(),
            Arc::new(InMemoryRepository::new()),
            Metrics::new(),
            10,
            3,
        );
        let good = RawRecord::new(
            RecordSource::MlsScrape,
            "u1",
            Payload::Html(r#"<div class="listing-address">123 Test St, Phoenix, AZ 85031</div>$299,900 3 beds 2 baths 1450 sqft"#.to_string()),
        );
        let empty = RawRecord::new(RecordSource::MlsScrape, "u2", Payload::Text(String::new()));
        let result = pipeline.process_batch(&[good, empty]).await;
        assert!(result.success());
        assert_eq!(result.processed, 1);
        assert_eq!(result.failed, 1);
    }

    #[test]
    fn selector_fields_fill_gaps_but_never_override() {
        let mut fields = serde_json::Map::new();
        fields.insert("price".to_string(), Value::from(299_900.0));

        let raw = RawRecord::new(
            RecordSource::MlsScrape,
            "https://mls.example.test/123",
            Payload::Html(String::new()),
        )
        .with_context(
            "selector_fields",
            serde_json::json!({
                "address": "123 Test St, Phoenix, AZ 85031",
                "price": "$199,900",
                "sqft": "1,450",
            }),
        );

        merge_selector_fields(&mut fields, &raw);

        assert_eq!(fields["address"], "123 Test St");
        assert_eq!(fields["city"], "Phoenix");
        assert_eq!(fields["zipcode"], "85031");
        assert_eq!(fields["square_feet"], 1450.0);
        // price was already present; the selector's value must not win.
        assert_eq!(fields["price"], 299_900.0);
    }

    #[test]
    fn merge_selector_fields_is_a_no_op_without_a_selector_fields_context_key() {
        let mut fields = serde_json::Map::new();
        let raw = RawRecord::new(RecordSource::MlsScrape, "u3", Payload::Html(String::new()));
        merge_selector_fields(&mut fields, &raw);
        assert!(fields.is_empty());
    }
}
