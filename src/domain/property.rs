//! The canonical aggregate root, maintained idempotently by `property_id`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

use super::address::PropertyAddress;
use super::features::PropertyFeatures;
use super::listing::ListingInfo;
use super::price::{latest, sorted_by_date, PriceObservation};
use super::provenance::{should_append, CollectionProvenance};
use super::tax::{SaleRecord, TaxInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyType {
    SingleFamily,
    Condo,
    Townhouse,
    MultiFamily,
    VacantLand,
    Other,
}

impl Default for PropertyType {
    fn default() -> Self {
        PropertyType::Other
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Property {
    pub property_id: String,
    pub address: PropertyAddress,
    pub property_type: PropertyType,
    pub features: PropertyFeatures,
    pub current_price: Option<f64>,
    pub price_history: Vec<PriceObservation>,
    pub listing: Option<ListingInfo>,
    pub tax_info: Option<TaxInfo>,
    pub sale_history: Vec<SaleRecord>,
    pub provenance: Vec<CollectionProvenance>,
    pub first_seen: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub is_active: bool,
    pub raw_data: HashMap<String, serde_json::Value>,
}

impl Property {
    /// Construct a brand-new aggregate. `first_seen`/`last_updated` start
    /// equal, satisfying the `last_updated >= first_seen` invariant trivially.
    pub fn new(address: PropertyAddress, property_type: PropertyType) -> Self {
        let property_id = derive_property_id(&address);
        let now = Utc::now();
        Self {
            property_id,
            address,
            property_type,
            features: PropertyFeatures::default(),
            current_price: None,
            price_history: Vec::new(),
            listing: None,
            tax_info: None,
            sale_history: Vec::new(),
            provenance: Vec::new(),
            first_seen: now,
            last_updated: now,
            is_active: true,
            raw_data: HashMap::new(),
        }
    }

    /// Append a price observation, re-deriving `current_price` and
    /// re-sorting `price_history` for read-time ordering (§5).
    pub fn record_price(&mut self, observation: PriceObservation) {
        self.price_history.push(observation);
        self.price_history = sorted_by_date(&self.price_history);
        self.current_price = latest(&self.price_history).map(|o| o.amount);
    }

    /// Append provenance only if it is not a duplicate of an existing entry
    /// from the same source with the same raw payload hash (§8 idempotence).
    pub fn append_provenance(&mut self, entry: CollectionProvenance) {
        if should_append(&self.provenance, &entry) {
            self.provenance.push(entry);
        }
    }

    pub fn touch(&mut self) {
        self.last_updated = Utc::now();
        debug_assert!(self.last_updated >= self.first_seen);
    }

    pub fn latest_price_date(&self) -> Option<DateTime<Utc>> {
        latest(&self.price_history).map(|o| o.date)
    }

    /// Days between listing and the present (or sale, if any listing date
    /// exists but status has moved past active) - `None` when there is no
    /// listing date to measure from.
    pub fn days_on_market(&self) -> Option<i64> {
        let listing = self.listing.as_ref()?;
        let listed = listing.listing_date?;
        let end = listing.expiration_date.unwrap_or_else(Utc::now);
        Some((end - listed).num_days().max(0))
    }
}

/// Deterministic identity from the normalized street + zipcode (§3, §8): two
/// collectors observing the same property, however differently spelled,
/// must resolve to the same `property_id`.
pub fn derive_property_id(address: &PropertyAddress) -> String {
    let key = format!("{}|{}", address.normalized_street(), address.zipcode.trim());
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..12])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::price::PriceType;
    use crate::domain::provenance::ProcessingMethod;
    use crate::domain::raw_record::Source;
    use chrono::TimeZone;

    #[test]
    fn same_normalized_address_yields_same_id() {
        let a = PropertyAddress::new("123 Main St.", "85031");
        let b = PropertyAddress::new("123  MAIN ST", "85031");
        assert_eq!(derive_property_id(&a), derive_property_id(&b));
    }

    #[test]
    fn different_zipcode_yields_different_id() {
        let a = PropertyAddress::new("123 Main St", "85031");
        let b = PropertyAddress::new("123 Main St", "85032");
        assert_ne!(derive_property_id(&a), derive_property_id(&b));
    }

    #[test]
    fn current_price_tracks_latest_observation() {
        let mut property = Property::new(
            PropertyAddress::new("123 Main St", "85031"),
            PropertyType::SingleFamily,
        );
        property.record_price(PriceObservation {
            amount: 300_000.0,
            date: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            price_type: PriceType::Listing,
            source: Source::MlsScrape,
            confidence: 0.8,
        });
        property.record_price(PriceObservation {
            amount: 295_000.0,
            date: Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap(),
            price_type: PriceType::Sale,
            source: Source::MlsScrape,
            confidence: 0.95,
        });
        assert_eq!(property.current_price, Some(295_000.0));
    }

    #[test]
    fn provenance_is_append_only_and_deduplicated_by_hash() {
        let mut property = Property::new(
            PropertyAddress::new("123 Main St", "85031"),
            PropertyType::SingleFamily,
        );
        let entry = CollectionProvenance {
            source: Source::AssessorApi,
            collected_at: Utc::now(),
            collector_version: "1".to_string(),
            raw_payload_hash: "abc".to_string(),
            processing_method: ProcessingMethod::Llm,
            processing_notes: vec![],
            quality_score: 0.9,
        };
        property.append_provenance(entry.clone());
        property.append_provenance(entry);
        assert_eq!(property.provenance.len(), 1);
    }

    #[test]
    fn last_updated_never_precedes_first_seen() {
        let mut property = Property::new(
            PropertyAddress::new("123 Main St", "85031"),
            PropertyType::SingleFamily,
        );
        property.touch();
        assert!(property.last_updated >= property.first_seen);
    }
}
