//! MLS listing site collector: a proxied, fingerprint-randomized headless
//! Chrome session driven by CSS selectors (§4.5).

use chromiumoxide::cdp::browser_protocol::emulation::{
    SetGeolocationOverrideParams, SetTimezoneOverrideParams,
};
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use scraper::{Html, Selector};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use super::selectors::SelectorConfig;
use super::Collector;
use crate::anti_detection::AntiDetectionProfile;
use crate::config::MlsConfig;
use crate::domain::{Payload, Property, RawRecord, Source};
use crate::error::CollectionError;
use crate::proxy_pool::ProxyPool;
use crate::rate_limiter::RateLimiter;

const BASE_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Injected before any page script runs, so `navigator.webdriver` and the
/// other automation tells are already gone by the time the site's own
/// detection code looks at them (§4.5).
const STEALTH_SCRIPT: &str = r#"
Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
window.chrome = window.chrome || { runtime: {} };
Object.defineProperty(navigator, 'plugins', { get: () => [1, 2, 3, 4, 5] });
Object.defineProperty(navigator, 'languages', { get: () => ['en-US', 'en'] });
"#;

pub struct MlsScrapeCollector {
    config: MlsConfig,
    proxy_pool: Arc<ProxyPool>,
    rate_limiter: Arc<RateLimiter>,
    selectors: SelectorConfig,
}

impl MlsScrapeCollector {
    pub fn new(
        config: MlsConfig,
        proxy_pool: Arc<ProxyPool>,
        rate_limiter: Arc<RateLimiter>,
        selectors: SelectorConfig,
    ) -> Self {
        Self {
            config,
            proxy_pool,
            rate_limiter,
            selectors,
        }
    }

    /// Launch a headless session proxied through a leased endpoint and
    /// fingerprinted with a freshly generated [`AntiDetectionProfile`].
    /// Returns the browser (kept alive for the duration of the page's use),
    /// the page itself, and the lease so the caller can report the outcome.
    async fn open_session(
        &self,
    ) -> Result<(Browser, Page, crate::proxy_pool::ProxyHandle), CollectionError> {
        let (handle, endpoint) = self.proxy_pool.lease().await?;
        let profile = AntiDetectionProfile::generate();

        let browser_config = BrowserConfig::builder()
            .arg(format!("--proxy-server={}", endpoint.url()))
            .arg(format!("--user-agent={}", profile.user_agent))
            .window_size(profile.viewport.0, profile.viewport.1)
            .build()
            .map_err(|e| CollectionError::Transient {
                endpoint: "chromium-launch".to_string(),
                attempt: 0,
                cause: anyhow::anyhow!(e),
            })?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| CollectionError::Transient {
                endpoint: "chromium-launch".to_string(),
                attempt: 0,
                cause: anyhow::anyhow!(e),
            })?;

        tokio::spawn(async move { while handler.next().await.is_some() {} });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| CollectionError::Transient {
                endpoint: "chromium-new-page".to_string(),
                attempt: 0,
                cause: anyhow::anyhow!(e),
            })?;

        // Erase webdriver indicators before any site script runs, and
        // emulate the profile's timezone/geolocation (§4.5).
        page.evaluate_on_new_document(STEALTH_SCRIPT).await.ok();
        page.execute(
            SetGeolocationOverrideParams::builder()
                .latitude(profile.latitude)
                .longitude(profile.longitude)
                .accuracy(1.0)
                .build(),
        )
        .await
        .ok();
        page.execute(SetTimezoneOverrideParams::new(profile.timezone))
            .await
            .ok();

        Ok((browser, page, handle))
    }

    async fn fetch_page(&self, page: &Page, url: &str) -> Result<String, CollectionError> {
        page.goto(url)
            .await
            .map_err(|e| CollectionError::Transient {
                endpoint: url.to_string(),
                attempt: 0,
                cause: anyhow::anyhow!(e),
            })?;
        tokio::time::timeout(
            Duration::from_millis(self.config.page_timeout_ms),
            page.wait_for_navigation(),
        )
        .await
        .map_err(|_| CollectionError::Timeout {
            endpoint: url.to_string(),
            millis: self.config.page_timeout_ms,
        })?
        .ok();

        let html = page
            .content()
            .await
            .map_err(|e| CollectionError::Transient {
                endpoint: url.to_string(),
                attempt: 0,
                cause: anyhow::anyhow!(e),
            })?;

        if is_captcha_page(&html) {
            return Err(CollectionError::CaptchaRequired { page: url.to_string() });
        }
        Ok(html)
    }

    /// Extract listing detail URLs from a rendered list page using the
    /// configured selectors, trying fallbacks in order (§4.5 step 3).
    fn extract_listing_urls(&self, html: &str) -> Vec<String> {
        let Some(url_selector) = self.selectors.list_page.get("url") else {
            return Vec::new();
        };
        let document = Html::parse_document(html);
        for candidate in url_selector.candidates() {
            let Ok(selector) = Selector::parse(candidate) else { continue };
            let urls: Vec<String> = document
                .select(&selector)
                .filter_map(|el| el.value().attr("href"))
                .map(|s| s.to_string())
                .collect();
            if !urls.is_empty() {
                return urls;
            }
        }
        Vec::new()
    }

    /// Extract the lightly-structured detail-page fields (`address`,
    /// `price`, `beds`, `baths`, `sqft`, `description`) using the
    /// configured `detail_page` selectors, trying each field's primary
    /// selector then its fallbacks in order; a fallback winning is logged
    /// as a warning so a stale primary selector surfaces in the logs
    /// instead of silently degrading (§4.5 step 3, §6.4). Fields no
    /// selector finds are simply absent - the rule/LLM extractors still
    /// run over the verbatim HTML alongside these.
    fn extract_detail_fields(&self, html: &str) -> serde_json::Map<String, serde_json::Value> {
        let document = Html::parse_document(html);
        let mut fields = serde_json::Map::new();

        for (field_name, field_selector) in &self.selectors.detail_page {
            for (index, candidate) in field_selector.candidates().enumerate() {
                let Ok(selector) = Selector::parse(candidate) else { continue };
                let Some(text) = document
                    .select(&selector)
                    .next()
                    .map(|el| el.text().collect::<Vec<_>>().join(" ").trim().to_string())
                    .filter(|s| !s.is_empty())
                else {
                    continue;
                };
                if index > 0 {
                    tracing::warn!(field = %field_name, selector = %candidate, "detail field matched only on fallback selector");
                }
                fields.insert(field_name.clone(), json!(text));
                break;
            }
        }

        fields
    }

    /// Fetch one list page, retrying up to `max_retries` times with a 2s
    /// base delay doubling each attempt (§4.5). Unlike a plain retry loop,
    /// each failed attempt releases the leased proxy as failed and opens a
    /// fresh session (new proxy, new fingerprint) before retrying, so a
    /// bad egress is rotated away from rather than hammered again.
    async fn fetch_list_page_with_rotation(
        &self,
        session: &mut (Browser, Page, crate::proxy_pool::ProxyHandle),
        url: &str,
    ) -> Result<String, CollectionError> {
        let mut attempt = 0;
        loop {
            let result = self.fetch_page(&session.1, url).await;
            match result {
                Ok(html) => return Ok(html),
                Err(err @ CollectionError::CaptchaRequired { .. }) => return Err(err),
                Err(err) => {
                    if attempt + 1 >= self.config.max_retries {
                        return Err(err);
                    }
                    let fresh_session = self.open_session().await?;
                    let (old_browser, old_page, old_handle) = std::mem::replace(session, fresh_session);
                    self.proxy_pool.report(old_handle, false, Duration::from_millis(0), None).await;
                    drop(old_page);
                    old_browser.close().await.ok();

                    tokio::time::sleep(BASE_RETRY_DELAY * 2_u32.pow(attempt)).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl Collector for MlsScrapeCollector {
    fn validate_config(&self) -> Result<(), CollectionError> {
        if self.config.base_url.trim().is_empty() {
            return Err(CollectionError::Config(crate::error::ConfigError::MissingKey(
                "MLS_BASE_URL",
            )));
        }
        Ok(())
    }

    /// Page through the region's list pages, one headless session per
    /// region, yielding one raw record per detail URL discovered (§4.5
    /// steps 1-4). Honors `respect_robots` by refusing to proceed when
    /// set and no robots check has been wired in (conservative default
    /// - Open Question in spec.md §9, resolved in DESIGN.md).
    async fn collect_region(&self, region_code: &str) -> Result<Vec<RawRecord>, CollectionError> {
        let mut records = Vec::new();
        let mut session = self.open_session().await?;
        let mut ok = true;

        'pages: for page_number in 1..=self.config.max_pages {
            self.rate_limiter.acquire("mls_scrape").await;
            let url = format!(
                "{}/search?zip={}&page={}",
                self.config.base_url.trim_end_matches('/'),
                region_code,
                page_number
            );

            let html = match self.fetch_list_page_with_rotation(&mut session, &url).await {
                Ok(html) => html,
                Err(CollectionError::CaptchaRequired { .. }) => {
                    ok = false;
                    break 'pages;
                }
                Err(err) => {
                    ok = false;
                    let (browser, page, handle) = session;
                    self.proxy_pool.report(handle, false, Duration::from_millis(0), None).await;
                    drop(page);
                    browser.close().await.ok();
                    return Err(err);
                }
            };
            self.rate_limiter.record("mls_scrape", tokio::time::Instant::now()).await;

            let urls = self.extract_listing_urls(&html);
            if urls.is_empty() {
                break 'pages;
            }

            for detail_url in urls {
                let profile = AntiDetectionProfile::generate();
                profile
                    .humanized_delay(Duration::from_millis(300), Duration::from_millis(900))
                    .await;
                match self.fetch_page(&session.1, &detail_url).await {
                    Ok(detail_html) => {
                        let selector_fields = self.extract_detail_fields(&detail_html);
                        let mut record =
                            RawRecord::new(Source::MlsScrape, detail_url.clone(), Payload::Html(detail_html))
                                .with_context("region_code", json!(region_code));
                        if !selector_fields.is_empty() {
                            record = record.with_context("selector_fields", serde_json::Value::Object(selector_fields));
                        }
                        records.push(record);
                    }
                    Err(CollectionError::CaptchaRequired { .. }) => {
                        ok = false;
                        break 'pages;
                    }
                    Err(_) => continue,
                }
            }
        }

        let (browser, page, handle) = session;
        self.proxy_pool
            .report(handle, ok, Duration::from_millis(0), None)
            .await;
        drop(page);
        browser.close().await.ok();
        Ok(records)
    }

    async fn collect_detail(&self, key: &str) -> Result<RawRecord, CollectionError> {
        self.rate_limiter.acquire("mls_scrape").await;
        let (browser, page, handle) = self.open_session().await?;
        let result = self.fetch_page(&page, key).await;
        self.rate_limiter.record("mls_scrape", tokio::time::Instant::now()).await;
        self.proxy_pool
            .report(handle, result.is_ok(), Duration::from_millis(0), None)
            .await;
        drop(page);
        browser.close().await.ok();
        result.map(|html| RawRecord::new(Source::MlsScrape, key.to_string(), Payload::Html(html)))
    }

    /// Structured-only shortcut, not used by this collector: MLS pages
    /// always flow through the Processing Pipeline's extraction step
    /// rather than being adapted directly.
    fn adapt(&self, raw: &RawRecord) -> Result<Property, CollectionError> {
        Err(CollectionError::ScrapeStructure {
            page: raw.source_key.clone(),
            fields: vec!["adapt is not supported for mls_scrape; route through the processing pipeline".to_string()],
        })
    }

    fn source_name(&self) -> &'static str {
        "mls_scrape"
    }
}

/// Crude but effective: every CAPTCHA provider we have seen on MLS sites
/// injects one of these markers into the rendered document (§4.5 step 5).
fn is_captcha_page(html: &str) -> bool {
    let lower = html.to_lowercase();
    lower.contains("captcha") || lower.contains("are you a human") || lower.contains("cf-challenge")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_common_captcha_markers() {
        assert!(is_captcha_page("<div>Please complete the CAPTCHA</div>"));
        assert!(is_captcha_page("<title>Are you a human?</title>"));
        assert!(!is_captcha_page("<div class='listing-card'>123 Main St</div>"));
    }

    fn test_collector(selectors: SelectorConfig) -> MlsScrapeCollector {
        MlsScrapeCollector {
            config: MlsConfig {
                base_url: "https://mls.example.test".to_string(),
                max_retries: 3,
                page_timeout_ms: 30_000,
                respect_robots: true,
                max_pages: 10,
            },
            proxy_pool: Arc::new(ProxyPool::new(&crate::config::ProxyConfig {
                endpoints: vec![],
                username: "u".to_string(),
                password: "p".to_string(),
                max_failures: 3,
                min_healthy: 1,
                health_check_interval_s: 300,
            })),
            rate_limiter: Arc::new(RateLimiter::new(Duration::from_secs(3600))),
            selectors,
        }
    }

    #[test]
    fn extracts_listing_urls_via_primary_selector() {
        let collector = test_collector(SelectorConfig::default_config());
        let html = r#"<div class="listing-card"><a href="/listing/1">123 Main St</a></div>"#;
        let urls = collector.extract_listing_urls(html);
        assert_eq!(urls, vec!["/listing/1".to_string()]);
    }

    #[test]
    fn extracts_detail_fields_via_primary_and_fallback_selectors() {
        let collector = test_collector(SelectorConfig::default_config());
        // `.property-detail__address` (primary) matches directly; `.price`
        // is absent so `beds` falls through to its `[data-beds]` fallback,
        // and `sqft` has no selector match at all.
        let html = r#"
            <div class="property-detail__address">123 Test St, Phoenix, AZ 85031</div>
            <div data-beds="3">3 bd</div>
        "#;
        let fields = collector.extract_detail_fields(html);
        assert_eq!(fields["address"], "123 Test St, Phoenix, AZ 85031");
        assert_eq!(fields["beds"], "3 bd");
        assert!(!fields.contains_key("price"));
        assert!(!fields.contains_key("sqft"));
    }

    #[test]
    fn extract_detail_fields_yields_empty_map_when_nothing_matches() {
        let collector = test_collector(SelectorConfig::default_config());
        let fields = collector.extract_detail_fields("<div class='unrelated'>nothing here</div>");
        assert!(fields.is_empty());
    }
}
