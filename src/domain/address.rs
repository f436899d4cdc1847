//! Postal address for a property, plus the normalization rules that feed
//! deterministic property identity (see [`super::property::derive_property_id`]).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyAddress {
    pub street: String,
    pub city: String,
    pub state: String,
    pub zipcode: String,
    pub county: String,
}

impl PropertyAddress {
    pub fn new(street: impl Into<String>, zipcode: impl Into<String>) -> Self {
        Self {
            street: street.into(),
            city: "Phoenix".to_string(),
            state: "AZ".to_string(),
            zipcode: zipcode.into(),
            county: "Maricopa".to_string(),
        }
    }

    pub fn full_address(&self) -> String {
        format!(
            "{}, {}, {} {}",
            self.street, self.city, self.state, self.zipcode
        )
    }

    /// True when the zipcode is exactly 5 digits (ZIP+4 suffixes are
    /// expected to have already been stripped by the cleaning rules, §4.8).
    pub fn has_valid_zipcode(&self) -> bool {
        self.zipcode.len() == 5 && self.zipcode.chars().all(|c| c.is_ascii_digit())
    }

    /// Normalization used to derive a stable identity: lowercase, collapse
    /// whitespace, drop punctuation that varies across sources (periods,
    /// commas), keep digits and letters. Two collectors observing the same
    /// street spelled "123 Main St." and "123 MAIN ST" normalize identically.
    pub fn normalized_street(&self) -> String {
        normalize_text(&self.street)
    }
}

pub fn normalize_text(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut last_was_space = false;
    for c in input.chars() {
        if c.is_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            last_was_space = false;
        } else if c.is_whitespace() {
            if !last_was_space {
                out.push(' ');
            }
            last_was_space = true;
        }
        // other punctuation is dropped entirely
    }
    out.trim().to_string()
}

/// Strip a ZIP+4 suffix ("85031-1234" -> "85031"); returns None if what
/// remains is not a plain 5-digit zip.
pub fn clean_zipcode(raw: &str) -> Option<String> {
    let base = raw.split(['-', ' ']).next().unwrap_or(raw);
    if base.len() == 5 && base.chars().all(|c| c.is_ascii_digit()) {
        Some(base.to_string())
    } else {
        None
    }
}

/// Title-case each whitespace-separated word, trimming surrounding
/// whitespace first.
pub fn title_case(input: &str) -> String {
    input
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_is_case_and_punctuation_insensitive() {
        let a = normalize_text("123 Main St.");
        let b = normalize_text("123  MAIN ST");
        assert_eq!(a, b);
        assert_eq!(a, "123 main st");
    }

    #[test]
    fn strips_zip_plus_four() {
        assert_eq!(clean_zipcode("85031-1234"), Some("85031".to_string()));
        assert_eq!(clean_zipcode("85031"), Some("85031".to_string()));
        assert_eq!(clean_zipcode("8503"), None);
        assert_eq!(clean_zipcode("850311234"), None);
    }

    #[test]
    fn title_cases_each_word() {
        assert_eq!(title_case("phoenix"), "Phoenix");
        assert_eq!(title_case("SOUTH phoenix"), "South Phoenix");
    }

    #[test]
    fn full_address_assembles_components() {
        let addr = PropertyAddress::new("123 Main St", "85031");
        assert_eq!(addr.full_address(), "123 Main St, Phoenix, AZ 85031");
        assert!(addr.has_valid_zipcode());
    }

    #[test]
    fn nine_digit_zip_is_not_directly_valid() {
        let mut addr = PropertyAddress::new("123 Main St", "850311234");
        assert!(!addr.has_valid_zipcode());
        addr.zipcode = clean_zipcode(&addr.zipcode).unwrap_or(addr.zipcode.clone());
        // unchanged because clean_zipcode returned None for this malformed input
        assert!(!addr.has_valid_zipcode());
    }
}
