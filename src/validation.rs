//! Multi-dimension validation with confidence scoring (§4.9).

use serde_json::{Map, Value};

use crate::config::ValidationConfig;
use crate::domain::features::{year_built_max, BATHROOMS_RANGE, BEDROOMS_RANGE, YEAR_BUILT_MIN};

const IMPORTANT_FIELDS: &[&str] = &["price", "bedrooms", "bathrooms", "square_feet"];
const KNOWN_METRO_PREFIXES: &[&str] = &["850", "852", "853"];
const KNOWN_CITIES: &[&str] = &["Phoenix", "Scottsdale", "Tempe", "Mesa", "Chandler", "Glendale"];

#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub confidence_score: f32,
}

pub struct ProcessingValidator {
    config: ValidationConfig,
    current_year: i32,
}

impl ProcessingValidator {
    pub fn new(config: ValidationConfig, current_year: i32) -> Self {
        Self { config, current_year }
    }

    /// Six dimensions, each contributing a partial-confidence score; the
    /// overall score is their arithmetic mean (§4.9; the weighting Open
    /// Question is resolved in DESIGN.md).
    pub fn validate(&self, fields: &Map<String, Value>) -> ValidationResult {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        let base_score = self.dimension_base(fields, &mut errors);
        let address_score = self.dimension_address_format(fields, &mut warnings);
        let price_score = self.dimension_price(fields, &mut errors, &mut warnings);
        let features_score = self.dimension_features(fields, &mut errors, &mut warnings);
        let location_score = self.dimension_location(fields, &mut errors, &mut warnings);
        let completeness_score = self.dimension_completeness(fields, &mut warnings);

        let confidence_score = (base_score
            + address_score
            + price_score
            + features_score
            + location_score
            + completeness_score)
            / 6.0;

        let mut is_valid = errors.is_empty() && confidence_score >= self.config.min_confidence;
        if self.config.strict && warnings.len() > 2 {
            is_valid = false;
        }

        ValidationResult {
            is_valid,
            errors,
            warnings,
            confidence_score,
        }
    }

    fn dimension_base(&self, fields: &Map<String, Value>, errors: &mut Vec<String>) -> f32 {
        match fields.get("address").and_then(Value::as_str) {
            Some(s) if !s.trim().is_empty() => 1.0,
            _ => {
                errors.push("Address is required".to_string());
                0.0
            }
        }
    }

    fn dimension_address_format(&self, fields: &Map<String, Value>, warnings: &mut Vec<String>) -> f32 {
        let Some(address) = fields.get("address").and_then(Value::as_str) else {
            return 0.0;
        };
        if address.trim().len() < 5 {
            warnings.push("address is implausibly short".to_string());
            return 0.3;
        }
        let mut score = 1.0;
        let has_number = address.chars().any(|c| c.is_ascii_digit());
        if !has_number {
            warnings.push("address missing a house number".to_string());
            score -= 0.3;
        }
        let street_types = ["st", "ave", "dr", "rd", "blvd", "ln", "ct", "way", "pl", "cir"];
        let has_street_type = address
            .split_whitespace()
            .any(|word| street_types.contains(&word.to_lowercase().trim_end_matches('.')));
        if !has_street_type {
            warnings.push("address missing a recognizable street type".to_string());
            score -= 0.2;
        }
        score.max(0.0)
    }

    fn dimension_price(
        &self,
        fields: &Map<String, Value>,
        errors: &mut Vec<String>,
        warnings: &mut Vec<String>,
    ) -> f32 {
        let Some(price_value) = fields.get("price") else {
            return 0.5; // absent is not itself an error here; completeness covers it
        };
        let Some(price) = price_value.as_f64() else {
            errors.push("price could not be parsed".to_string());
            return 0.0;
        };
        if price < self.config.min_price || price > self.config.max_price {
            errors.push(format!(
                "price {price} out of range [{}, {}]",
                self.config.min_price, self.config.max_price
            ));
            return 0.0;
        }
        if price < 50_000.0 {
            warnings.push("price is unusually low".to_string());
            return 0.7;
        }
        if price > 5_000_000.0 {
            warnings.push("price is unusually high".to_string());
            return 0.7;
        }
        1.0
    }

    fn dimension_features(
        &self,
        fields: &Map<String, Value>,
        errors: &mut Vec<String>,
        warnings: &mut Vec<String>,
    ) -> f32 {
        let mut score: f32 = 1.0;
        let mut checked = 0;

        if let Some(value) = fields.get("bedrooms") {
            checked += 1;
            match value.as_i64() {
                Some(n) if (BEDROOMS_RANGE.0 as i64..=BEDROOMS_RANGE.1 as i64).contains(&n) => {}
                Some(_) => {
                    errors.push("bedrooms out of plausible range".to_string());
                    score -= 0.3;
                }
                None => {
                    warnings.push("bedrooms is non-numeric".to_string());
                    score -= 0.1;
                }
            }
        }

        if let Some(value) = fields.get("bathrooms") {
            checked += 1;
            match value.as_f64() {
                Some(n) if (BATHROOMS_RANGE.0 as f64..=BATHROOMS_RANGE.1 as f64).contains(&n) => {}
                Some(_) => {
                    errors.push("bathrooms out of plausible range".to_string());
                    score -= 0.3;
                }
                None => {
                    warnings.push("bathrooms is non-numeric".to_string());
                    score -= 0.1;
                }
            }
        }

        if let Some(value) = fields.get("square_feet") {
            checked += 1;
            match value.as_i64() {
                Some(n) if (self.config.min_sqft as i64..=self.config.max_sqft as i64).contains(&n) => {}
                Some(_) => {
                    errors.push("square_feet out of plausible range".to_string());
                    score -= 0.3;
                }
                None => {
                    warnings.push("square_feet is non-numeric".to_string());
                    score -= 0.1;
                }
            }
        }

        if let Some(value) = fields.get("year_built") {
            checked += 1;
            match value.as_i64() {
                Some(n) if (YEAR_BUILT_MIN as i64..=year_built_max(self.current_year) as i64).contains(&n) => {}
                Some(_) => {
                    errors.push("year_built out of plausible range".to_string());
                    score -= 0.3;
                }
                None => {
                    warnings.push("year_built is non-numeric".to_string());
                    score -= 0.1;
                }
            }
        }

        if checked == 0 {
            return 0.5;
        }
        score.max(0.0)
    }

    fn dimension_location(
        &self,
        fields: &Map<String, Value>,
        errors: &mut Vec<String>,
        warnings: &mut Vec<String>,
    ) -> f32 {
        let mut score = 1.0;

        match fields.get("zipcode").and_then(Value::as_str) {
            Some(zip) if zip.len() == 5 && zip.chars().all(|c| c.is_ascii_digit()) => {
                if !KNOWN_METRO_PREFIXES.iter().any(|p| zip.starts_with(p)) {
                    warnings.push("zipcode is outside the configured metro prefixes".to_string());
                    score -= 0.2;
                }
            }
            _ => {
                errors.push("zipcode is invalid".to_string());
                return 0.0;
            }
        }

        if let Some(city) = fields.get("city").and_then(Value::as_str) {
            if !KNOWN_CITIES.iter().any(|c| c.eq_ignore_ascii_case(city)) {
                warnings.push("city is not in the known list".to_string());
                score -= 0.2;
            }
        }

        if let Some(state) = fields.get("state").and_then(Value::as_str) {
            if state != "AZ" {
                warnings.push("state is not AZ".to_string());
                score -= 0.2;
            }
        }

        score.max(0.0)
    }

    fn dimension_completeness(&self, fields: &Map<String, Value>, warnings: &mut Vec<String>) -> f32 {
        if !fields.contains_key("address") {
            return 0.0;
        }
        let present = IMPORTANT_FIELDS.iter().filter(|f| fields.contains_key(**f)).count();
        if present < IMPORTANT_FIELDS.len() {
            warnings.push(format!(
                "missing {} of {} important fields",
                IMPORTANT_FIELDS.len() - present,
                IMPORTANT_FIELDS.len()
            ));
        }
        present as f32 / IMPORTANT_FIELDS.len() as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> ProcessingValidator {
        ProcessingValidator::new(
            ValidationConfig {
                min_confidence: 0.7,
                strict: false,
                min_price: 10_000.0,
                max_price: 10_000_000.0,
                min_sqft: 100,
                max_sqft: 20_000,
            },
            2026,
        )
    }

    fn full_record() -> Map<String, Value> {
        let mut m = Map::new();
        m.insert("address".to_string(), Value::from("123 Test St"));
        m.insert("city".to_string(), Value::from("Phoenix"));
        m.insert("state".to_string(), Value::from("AZ"));
        m.insert("zipcode".to_string(), Value::from("85031"));
        m.insert("price".to_string(), Value::from(299900));
        m.insert("bedrooms".to_string(), Value::from(3));
        m.insert("bathrooms".to_string(), Value::from(2));
        m.insert("square_feet".to_string(), Value::from(1450));
        m
    }

    #[test]
    fn well_formed_record_validates_with_high_confidence() {
        // Scenario S2 from spec.md §8.
        let result = validator().validate(&full_record());
        assert!(result.is_valid);
        assert!(result.confidence_score >= 0.7);
    }

    #[test]
    fn missing_address_and_low_price_is_rejected() {
        // Scenario S4 from spec.md §8.
        let mut fields = Map::new();
        fields.insert("address".to_string(), Value::from(""));
        fields.insert("price".to_string(), Value::from(5000));
        let result = validator().validate(&fields);
        assert!(!result.is_valid);
        assert!(result.errors.iter().any(|e| e.contains("Address is required")));
        assert!(result.errors.iter().any(|e| e.contains("out of range")));
    }

    #[test]
    fn price_exactly_at_min_and_max_bounds_is_accepted() {
        let mut low = full_record();
        low.insert("price".to_string(), Value::from(10_000));
        assert!(validator().validate(&low).errors.is_empty());

        let mut high = full_record();
        high.insert("price".to_string(), Value::from(10_000_000));
        assert!(validator().validate(&high).errors.is_empty());
    }

    #[test]
    fn year_built_plus_five_is_accepted_plus_six_is_rejected() {
        let mut at_boundary = full_record();
        at_boundary.insert("year_built".to_string(), Value::from(2031));
        assert!(validator().validate(&at_boundary).errors.is_empty());

        let mut past_boundary = full_record();
        past_boundary.insert("year_built".to_string(), Value::from(2032));
        assert!(!validator().validate(&past_boundary).errors.is_empty());
    }

    #[test]
    fn square_feet_exactly_at_minimum_is_accepted() {
        let mut fields = full_record();
        fields.insert("square_feet".to_string(), Value::from(100));
        assert!(validator().validate(&fields).errors.is_empty());
    }

    #[test]
    fn adding_a_well_formed_optional_field_never_decreases_confidence() {
        let base = validator().validate(&full_record());
        let mut richer = full_record();
        richer.insert("year_built".to_string(), Value::from(2005));
        let with_year = validator().validate(&richer);
        assert!(with_year.confidence_score >= base.confidence_score);
    }

    #[test]
    fn strict_mode_adds_a_warning_ceiling() {
        let config = ValidationConfig {
            min_confidence: 0.0,
            strict: true,
            min_price: 10_000.0,
            max_price: 10_000_000.0,
            min_sqft: 100,
            max_sqft: 20_000,
        };
        let validator = ProcessingValidator::new(config, 2026);
        let mut fields = full_record();
        // Force more than two warnings: unknown city, non-AZ state, zip outside metro.
        fields.insert("city".to_string(), Value::from("Nowhere"));
        fields.insert("state".to_string(), Value::from("CA"));
        fields.insert("zipcode".to_string(), Value::from("99999"));
        let result = validator.validate(&fields);
        assert!(result.warnings.len() > 2);
        assert!(!result.is_valid);
    }
}
