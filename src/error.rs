//! Error taxonomy (§7). Each variant carries the context the source used to
//! stuff into ad hoc dictionaries; cause chains use `#[source]` rather than
//! string concatenation so nothing upstream loses the original error.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required configuration key: {0}")]
    MissingKey(&'static str),
    #[error("invalid value for configuration key {key}: {reason}")]
    InvalidValue { key: &'static str, reason: String },
}

/// Errors raised by collectors (§4.4, §4.5). `AuthError` and `ConfigError`
/// are the only kinds that can disable/abort a run; everything else is
/// "retried then counted" per the §4.13 failure table.
#[derive(Debug, Error)]
pub enum CollectionError {
    #[error("collector config invalid: {0}")]
    Config(#[from] ConfigError),

    #[error("persistent authentication failure for {source} (status {status})")]
    Auth { source: String, status: u16 },

    #[error("transient network error calling {endpoint} (attempt {attempt}): {cause}")]
    Transient {
        endpoint: String,
        attempt: u32,
        #[source]
        cause: anyhow::Error,
    },

    #[error("no healthy proxy available for session")]
    ProxyUnavailable,

    #[error("selectors on {page} yielded no content for field(s): {fields:?}")]
    ScrapeStructure { page: String, fields: Vec<String> },

    #[error("CAPTCHA challenge encountered at {page}")]
    CaptchaRequired { page: String },

    #[error("request to {endpoint} timed out after {millis}ms")]
    Timeout { endpoint: String, millis: u64 },

    #[error("collector operation cancelled: {0}")]
    Cancelled(&'static str),
}

/// Errors raised inside the Processing Pipeline (§4.6-§4.10).
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("LLM server unavailable: {0}")]
    LlmUnavailable(String),

    #[error("could not parse structured output from LLM response")]
    LlmParse,

    #[error("validation rejected the extracted record: {0:?}")]
    ValidationFailed(Vec<String>),

    #[error("repository write failed: {0}")]
    Repository(#[from] anyhow::Error),
}

/// Errors raised by the Repository contract (§6.1). Only `create` can
/// produce [`RepositoryError::AlreadyExists`]; `upsert` is idempotent by
/// design and never rejects a duplicate.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("property {0} already exists")]
    AlreadyExists(String),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Top-level error a caller one layer above a collector/pipeline sees.
/// Only [`PipelineError::Config`] and an authenticated-but-forbidden
/// collector state are fatal to the run (§7).
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Collection(#[from] CollectionError),
    #[error(transparent)]
    Processing(#[from] ProcessingError),
    #[error("global run budget exceeded after {elapsed_secs}s")]
    BudgetExceeded { elapsed_secs: f64 },
}
