//! Typed configuration, built once at process start (Design Notes §9).
//! Every key in spec §6.7 resolves to a field here; [`ConfigError`] is
//! raised before any component (collector, pool, client) is constructed.

use crate::error::ConfigError;
use std::env;
use std::time::Duration;

fn env_var(key: &'static str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::MissingKey(key))
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env_opt(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[derive(Debug, Clone)]
pub struct AssessorConfig {
    pub base_url: String,
    pub api_key: String,
    pub rate_limit_per_hour: u32,
    pub safety_margin: f64,
    pub max_retries: u32,
}

#[derive(Debug, Clone)]
pub struct MlsConfig {
    pub base_url: String,
    pub max_retries: u32,
    pub page_timeout_ms: u64,
    pub respect_robots: bool,
    pub max_pages: u32,
}

#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub endpoints: Vec<ProxyEndpointConfig>,
    pub username: String,
    pub password: String,
    pub max_failures: u32,
    pub min_healthy: u32,
    pub health_check_interval_s: u64,
}

#[derive(Debug, Clone)]
pub struct ProxyEndpointConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    pub timeout_s: u64,
    pub max_retries: u32,
    pub batch_size: usize,
}

#[derive(Debug, Clone)]
pub struct ValidationConfig {
    pub min_confidence: f32,
    pub strict: bool,
    pub min_price: f64,
    pub max_price: f64,
    pub min_sqft: i32,
    pub max_sqft: i32,
}

#[derive(Debug, Clone)]
pub struct ProcessingConfig {
    pub batch_size: usize,
    pub max_concurrent: usize,
    pub enable_storage: bool,
    pub enable_fallback: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestrationMode {
    Sequential,
    Parallel,
}

#[derive(Debug, Clone)]
pub struct OrchestrationConfig {
    pub mode: OrchestrationMode,
    pub budget: Duration,
    pub per_collector_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub target_zip_codes: Vec<String>,
    pub assessor: AssessorConfig,
    pub mls: MlsConfig,
    pub proxy: ProxyConfig,
    pub llm: LlmConfig,
    pub validation: ValidationConfig,
    pub processing: ProcessingConfig,
    pub orchestration: OrchestrationConfig,
    pub database_url: String,
    pub selector_config_path: String,
    pub reports_dir: String,
}

impl Config {
    /// Load and validate every recognized key (§6.7) from the process
    /// environment. `.env` is loaded first via `dotenvy`, matching the
    /// teacher's existing startup sequence.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let target_zip_codes: Vec<String> = env_var("TARGET_ZIP_CODES")?
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if target_zip_codes.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "TARGET_ZIP_CODES",
                reason: "must contain at least one zip code".to_string(),
            });
        }

        let assessor = AssessorConfig {
            base_url: env_var("ASSESSOR_BASE_URL")?,
            api_key: env_var("ASSESSOR_API_KEY")?,
            rate_limit_per_hour: parse_or("ASSESSOR_RATE_LIMIT_PER_HOUR", 1000),
            safety_margin: parse_or("ASSESSOR_SAFETY_MARGIN", 0.10),
            max_retries: parse_or("ASSESSOR_MAX_RETRIES", 3),
        };

        let mls = MlsConfig {
            base_url: env_var("MLS_BASE_URL")?,
            max_retries: parse_or("MLS_MAX_RETRIES", 3),
            page_timeout_ms: parse_or("MLS_PAGE_TIMEOUT_MS", 30_000),
            respect_robots: parse_or("MLS_RESPECT_ROBOTS", true),
            max_pages: parse_or("MLS_MAX_PAGES", 10),
        };

        let proxy_enabled = env_opt("PROXY_ENDPOINTS").is_some();
        let proxy = if proxy_enabled {
            let endpoints = env_var("PROXY_ENDPOINTS")?
                .split(',')
                .filter(|s| !s.trim().is_empty())
                .map(parse_proxy_endpoint)
                .collect::<Result<Vec<_>, _>>()?;
            ProxyConfig {
                endpoints,
                username: env_var("PROXY_USERNAME")?,
                password: env_var("PROXY_PASSWORD")?,
                max_failures: parse_or("PROXY_MAX_FAILURES", 3),
                min_healthy: parse_or("PROXY_MIN_HEALTHY", 2),
                health_check_interval_s: parse_or("PROXY_HEALTH_CHECK_INTERVAL_S", 300),
            }
        } else {
            return Err(ConfigError::MissingKey("PROXY_ENDPOINTS"));
        };

        let llm = LlmConfig {
            base_url: env_var("LLM_BASE_URL")?,
            model: env_opt("LLM_MODEL").unwrap_or_else(|| "llama3.2:latest".to_string()),
            timeout_s: parse_or("LLM_TIMEOUT_S", 30),
            max_retries: parse_or("LLM_MAX_RETRIES", 2),
            batch_size: parse_or("LLM_BATCH_SIZE", 5),
        };

        let validation = ValidationConfig {
            min_confidence: parse_or("VALIDATION_MIN_CONFIDENCE", 0.7),
            strict: parse_or("VALIDATION_STRICT", false),
            min_price: parse_or("VALIDATION_MIN_PRICE", 10_000.0),
            max_price: parse_or("VALIDATION_MAX_PRICE", 10_000_000.0),
            min_sqft: parse_or("VALIDATION_MIN_SQFT", 100),
            max_sqft: parse_or("VALIDATION_MAX_SQFT", 20_000),
        };

        let processing = ProcessingConfig {
            batch_size: parse_or("PROCESSING_BATCH_SIZE", 10),
            max_concurrent: parse_or("PROCESSING_MAX_CONCURRENT", 3),
            enable_storage: parse_or("PROCESSING_ENABLE_STORAGE", true),
            enable_fallback: parse_or("PROCESSING_ENABLE_FALLBACK", true),
        };

        let mode = match env_opt("ORCHESTRATION_MODE").as_deref() {
            Some("parallel") => OrchestrationMode::Parallel,
            _ => OrchestrationMode::Sequential,
        };
        let orchestration = OrchestrationConfig {
            mode,
            budget: Duration::from_secs(parse_or::<u64>("ORCHESTRATION_BUDGET_MINUTES", 75) * 60),
            per_collector_timeout: Duration::from_secs(
                parse_or::<u64>("ORCHESTRATION_PER_COLLECTOR_TIMEOUT_MINUTES", 30) * 60,
            ),
        };

        Ok(Config {
            target_zip_codes,
            assessor,
            mls,
            proxy,
            llm,
            validation,
            processing,
            orchestration,
            database_url: env_var("DATABASE_URL")?,
            selector_config_path: env_opt("MLS_SELECTOR_CONFIG_PATH")
                .unwrap_or_else(|| "config/selectors.yaml".to_string()),
            reports_dir: env_opt("REPORTS_DIR").unwrap_or_else(|| "reports".to_string()),
        })
    }
}

fn parse_proxy_endpoint(raw: &str) -> Result<ProxyEndpointConfig, ConfigError> {
    let (host, port) = raw.trim().rsplit_once(':').ok_or_else(|| ConfigError::InvalidValue {
        key: "PROXY_ENDPOINTS",
        reason: format!("expected host:port, got '{raw}'"),
    })?;
    let port: u16 = port.parse().map_err(|_| ConfigError::InvalidValue {
        key: "PROXY_ENDPOINTS",
        reason: format!("invalid port in '{raw}'"),
    })?;
    Ok(ProxyEndpointConfig {
        host: host.to_string(),
        port,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_proxy_endpoint() {
        let ep = parse_proxy_endpoint("10.0.0.1:8080").unwrap();
        assert_eq!(ep.host, "10.0.0.1");
        assert_eq!(ep.port, 8080);
    }

    #[test]
    fn rejects_malformed_proxy_endpoint() {
        assert!(parse_proxy_endpoint("not-an-endpoint").is_err());
    }

    #[test]
    fn missing_required_env_var_is_config_error() {
        // Deliberately not setting TARGET_ZIP_CODES in this process's env.
        env::remove_var("TARGET_ZIP_CODES");
        let err = env_var("TARGET_ZIP_CODES").unwrap_err();
        assert!(matches!(err, ConfigError::MissingKey("TARGET_ZIP_CODES")));
    }
}
