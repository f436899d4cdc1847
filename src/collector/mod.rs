//! The Collector capability set shared by both sources (§4, Design Notes
//! §9: "small explicit interfaces... concrete collectors hold their own
//! config value; cross-cutting concerns compose via wrappers").

pub mod api;
pub mod scrape;
pub mod selectors;

use async_trait::async_trait;

use crate::domain::{Property, RawRecord};
use crate::error::CollectionError;

/// A handle to one external property data source. Implementations own
/// their own configuration; rate limiting, proxy leasing and retries are
/// composed around them rather than inherited from a base class.
#[async_trait]
pub trait Collector: Send + Sync {
    /// Fails fast before any network call if required configuration
    /// (API key, base URL, proxy credentials) is missing.
    fn validate_config(&self) -> Result<(), CollectionError>;

    /// Harvest every record available for one region code (zip code).
    async fn collect_region(&self, region_code: &str) -> Result<Vec<RawRecord>, CollectionError>;

    /// Harvest a single record by its source-specific key (parcel id, MLS
    /// id or listing URL).
    async fn collect_detail(&self, key: &str) -> Result<RawRecord, CollectionError>;

    /// Deterministic mapping from a raw record to a canonical Property,
    /// used by collectors whose payload is already structured enough to
    /// skip the Processing Pipeline's extraction step (§4.4 step 4).
    fn adapt(&self, raw: &RawRecord) -> Result<Property, CollectionError>;

    /// Human-readable name used in logs, metrics labels and the daily
    /// report's `by_source` breakdown.
    fn source_name(&self) -> &'static str;
}

/// Shared retry/backoff helper: exponential backoff starting at `base`,
/// doubling each attempt, capped at `max_retries` attempts (§4.4, §4.5).
/// Returns the last error if every attempt is exhausted.
pub async fn with_retry<T, F, Fut>(
    max_retries: u32,
    base: std::time::Duration,
    mut attempt_fn: F,
) -> Result<T, CollectionError>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = Result<T, CollectionError>>,
{
    let mut attempt = 0;
    loop {
        match attempt_fn(attempt).await {
            Ok(value) => return Ok(value),
            // Persistent auth failures are never retried (§4.13); return
            // the original error untouched so its source/status survive.
            Err(err @ CollectionError::Auth { .. }) => return Err(err),
            Err(err) if attempt + 1 >= max_retries => return Err(err),
            Err(_retryable) => {
                let delay = base * 2_u32.pow(attempt);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
