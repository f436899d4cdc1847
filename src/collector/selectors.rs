//! MLS selector configuration: one primary CSS selector plus ordered
//! fallbacks per field, loaded from an external file so the live site's
//! markup can be re-targeted without a rebuild (§4.5, §6.4).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSelector {
    pub primary: String,
    #[serde(default)]
    pub fallbacks: Vec<String>,
}

impl FieldSelector {
    /// The ordered list to try: primary first, then each fallback in turn.
    pub fn candidates(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.primary.as_str()).chain(self.fallbacks.iter().map(|s| s.as_str()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectorConfig {
    pub list_page: HashMap<String, FieldSelector>,
    pub detail_page: HashMap<String, FieldSelector>,
}

impl SelectorConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading selector config at {}", path.display()))?;
        let config: Self = serde_yaml::from_str(&raw)
            .with_context(|| format!("parsing selector config at {}", path.display()))?;
        Ok(config)
    }

    /// Default selectors shipped with the crate, used when no external
    /// file is configured (e.g. in tests). Deliberately minimal - the
    /// shipped file is expected to be maintained against the live site
    /// (Open Question, spec.md §9).
    pub fn default_config() -> Self {
        let field = |primary: &str, fallbacks: &[&str]| FieldSelector {
            primary: primary.to_string(),
            fallbacks: fallbacks.iter().map(|s| s.to_string()).collect(),
        };

        let mut list_page = HashMap::new();
        list_page.insert(
            "address".to_string(),
            field(".listing-card__address", &[".property-address", "[data-address]"]),
        );
        list_page.insert(
            "price".to_string(),
            field(".listing-card__price", &[".price", "[data-price]"]),
        );
        list_page.insert("url".to_string(), field(".listing-card a", &["a.listing-link"]));

        let mut detail_page = HashMap::new();
        detail_page.insert(
            "address".to_string(),
            field(".property-detail__address", &["h1.address", "[data-address]"]),
        );
        detail_page.insert(
            "price".to_string(),
            field(".property-detail__price", &[".price-value"]),
        );
        detail_page.insert(
            "beds".to_string(),
            field(".property-detail__beds", &["[data-beds]"]),
        );
        detail_page.insert(
            "baths".to_string(),
            field(".property-detail__baths", &["[data-baths]"]),
        );
        detail_page.insert(
            "sqft".to_string(),
            field(".property-detail__sqft", &["[data-sqft]"]),
        );
        detail_page.insert(
            "description".to_string(),
            field(".property-detail__description", &["#description"]),
        );

        Self {
            list_page,
            detail_page,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_address_and_price_selectors() {
        let config = SelectorConfig::default_config();
        assert!(config.list_page.contains_key("address"));
        assert!(config.detail_page.contains_key("price"));
    }

    #[test]
    fn candidates_yields_primary_before_fallbacks() {
        let field = FieldSelector {
            primary: "a".to_string(),
            fallbacks: vec!["b".to_string(), "c".to_string()],
        };
        let candidates: Vec<&str> = field.candidates().collect();
        assert_eq!(candidates, vec!["a", "b", "c"]);
    }

    #[test]
    fn loads_from_a_yaml_file_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("selectors.yaml");
        std::fs::write(
            &path,
            r#"
list_page:
  address:
    primary: ".addr"
    fallbacks: [".addr2"]
detail_page:
  price:
    primary: ".price"
    fallbacks: []
"#,
        )
        .unwrap();

        let config = SelectorConfig::load(&path).unwrap();
        assert_eq!(config.list_page["address"].primary, ".addr");
        assert_eq!(config.detail_page["price"].fallbacks.len(), 0);
    }
}
