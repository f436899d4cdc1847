//! Deterministic HTML/text field extraction used when the LLM is
//! unavailable or returns unusable output (§4.7). A pure function from
//! (content, content_type) to a partial mapping; never fabricates a field
//! it cannot find evidence for.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use serde_json::{Map, Value};

const MIN_PLAUSIBLE_PRICE: f64 = 1_000.0;

static PRICE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\s?([0-9][0-9,]{2,})(?:\.[0-9]{2})?").unwrap());
static BEDROOMS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(\d{1,2})\s*(?:bed|br|bedrooms?)\b").unwrap());
static BATHROOMS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(\d{1,2}(?:\.\d)?)\s*(?:bath|ba|bathrooms?)\b").unwrap());
static SQFT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b([0-9][0-9,]{2,})\s*(?:sq\.?\s?ft|sf|square feet)\b").unwrap());
static ADDRESS_CLASS_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(
        ".address, .property-address, .listing-address, [itemprop='streetAddress'], [data-address]",
    )
    .unwrap()
});

/// Extract whatever fields have a stable surface form in `content`.
/// Returns an empty map (not an error) when nothing is found, so callers
/// can tell "found nothing" apart from "crashed".
pub fn extract(content: &str, content_type: &str) -> Map<String, Value> {
    let mut out = Map::new();

    if let Some(price) = extract_price(content) {
        out.insert("price".to_string(), Value::from(price));
    }
    if let Some(beds) = first_capture_as_i64(&BEDROOMS_RE, content) {
        out.insert("bedrooms".to_string(), Value::from(beds));
    }
    if let Some(baths) = first_capture_as_f64(&BATHROOMS_RE, content) {
        out.insert("bathrooms".to_string(), Value::from(baths));
    }
    if let Some(sqft) = extract_sqft(content) {
        out.insert("square_feet".to_string(), Value::from(sqft));
    }
    if content_type == "html" {
        if let Some(raw_address) = extract_address(content) {
            for (key, value) in split_address_components(&raw_address) {
                out.insert(key, Value::from(value));
            }
        }
    }

    out
}

/// Splits a captured "street, city, state zip" string into its components
/// (§4.7: "address via known CSS classes"). A CSS class holds the whole
/// rendered address as one string; this is the only place that string gets
/// decomposed into the fields the cleaning/validation stages expect.
/// Falls back to putting the whole string under `address` when the shape
/// doesn't match a trailing "ST 12345" / "ST 12345-6789" pattern.
///
/// Also used by the MLS scrape collector to split the selector-extracted
/// detail-page address field (`collector::scrape`).
pub(crate) fn split_address_components(raw: &str) -> Vec<(String, String)> {
    static TRAILING_STATE_ZIP_RE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?i)^([A-Z]{2})\s+(\d{5}(?:-\d{4})?)$").unwrap());

    let parts: Vec<&str> = raw.split(',').map(str::trim).collect();
    if parts.len() >= 3 {
        if let Some(caps) = TRAILING_STATE_ZIP_RE.captures(parts[parts.len() - 1]) {
            let street = parts[..parts.len() - 2].join(", ");
            let city = parts[parts.len() - 2].to_string();
            return vec![
                ("address".to_string(), street),
                ("city".to_string(), city),
                ("state".to_string(), caps[1].to_uppercase()),
                ("zipcode".to_string(), caps[2].to_string()),
            ];
        }
    }
    vec![("address".to_string(), raw.to_string())]
}

fn extract_price(content: &str) -> Option<f64> {
    PRICE_RE.captures_iter(content).find_map(|cap| {
        let digits: String = cap[1].chars().filter(|c| *c != ',').collect();
        digits.parse::<f64>().ok().filter(|p| *p >= MIN_PLAUSIBLE_PRICE)
    })
}

fn extract_sqft(content: &str) -> Option<i64> {
    SQFT_RE.captures_iter(content).find_map(|cap| {
        let digits: String = cap[1].chars().filter(|c| *c != ',').collect();
        digits.parse::<i64>().ok()
    })
}

fn first_capture_as_i64(re: &Regex, content: &str) -> Option<i64> {
    re.captures(content)?.get(1)?.as_str().parse().ok()
}

fn first_capture_as_f64(re: &Regex, content: &str) -> Option<f64> {
    re.captures(content)?.get(1)?.as_str().parse().ok()
}

fn extract_address(html: &str) -> Option<String> {
    let document = Html::parse_fragment(html);
    document
        .select(&ADDRESS_CLASS_SELECTOR)
        .next()
        .map(|el| el.text().collect::<Vec<_>>().join(" ").trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_price_beds_baths_sqft_from_listing_text() {
        let text = "$299,900 — 3 beds | 2 baths | 1,450 sqft";
        let found = extract(text, "text");
        assert_eq!(found["price"], 299900.0);
        assert_eq!(found["bedrooms"], 3);
        assert_eq!(found["bathrooms"], 2.0);
        assert_eq!(found["square_feet"], 1450);
    }

    #[test]
    fn extracts_address_from_known_css_class() {
        // Scenario S2 from spec.md §8.
        let html = r#"<div class="listing-address">123 Test St, Phoenix, AZ 85031</div>"#;
        let found = extract(html, "html");
        assert_eq!(found["address"], "123 Test St");
        assert_eq!(found["city"], "Phoenix");
        assert_eq!(found["state"], "AZ");
        assert_eq!(found["zipcode"], "85031");
    }

    #[test]
    fn address_without_trailing_state_zip_is_kept_whole() {
        let html = r#"<div class="listing-address">123 Test St</div>"#;
        let found = extract(html, "html");
        assert_eq!(found["address"], "123 Test St");
        assert!(!found.contains_key("zipcode"));
    }

    #[test]
    fn never_fabricates_a_missing_field() {
        let found = extract("nothing useful here", "text");
        assert!(!found.contains_key("price"));
        assert!(!found.contains_key("bedrooms"));
    }

    #[test]
    fn implausibly_low_dollar_amounts_are_ignored() {
        let found = extract("call us at $5 for info", "text");
        assert!(!found.contains_key("price"));
    }

    #[test]
    fn all_selectors_absent_yields_empty_map_not_an_error() {
        let html = "<div class='unrelated'>nothing here</div>";
        let found = extract(html, "html");
        assert!(found.is_empty());
    }
}
