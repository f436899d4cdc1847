//! Orchestrator entry point (§4.11, §6.6): one invocation runs the daily
//! collection across every configured region and collector, writes the
//! `DailyReport` to the repository, writes the JSON execution report
//! under `reports/`, and exits non-zero on failure.

use std::sync::Arc;

use phoenix_property_pipeline::collector::api::AssessorApiCollector;
use phoenix_property_pipeline::collector::scrape::MlsScrapeCollector;
use phoenix_property_pipeline::collector::selectors::SelectorConfig;
use phoenix_property_pipeline::collector::Collector;
use phoenix_property_pipeline::config::Config;
use phoenix_property_pipeline::llm::client::LlmClient;
use phoenix_property_pipeline::llm::extractor::PropertyExtractor;
use phoenix_property_pipeline::metrics::{Metrics, MetricsRateLimitObserver};
use phoenix_property_pipeline::orchestrator::Orchestrator;
use phoenix_property_pipeline::pipeline::ProcessingPipeline;
use phoenix_property_pipeline::proxy_pool::ProxyPool;
use phoenix_property_pipeline::rate_limiter::RateLimiter;
use phoenix_property_pipeline::repository::{PgRepository, Repository};
use phoenix_property_pipeline::validation::ProcessingValidator;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = Config::from_env().unwrap_or_else(|err| {
        // ConfigError is the one kind that crashes the run before any
        // component is constructed (§7, §9).
        tracing::error!(error = %err, "configuration error; refusing to start");
        std::process::exit(1);
    });

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .expect("failed to connect to repository backend");
    let repository: Arc<dyn Repository> = Arc::new(PgRepository::new(pool));

    let metrics = Metrics::new();
    let rate_observer = Arc::new(MetricsRateLimitObserver { metrics: metrics.clone() });

    let mut assessor_limiter = RateLimiter::new(Duration::from_secs(3600));
    assessor_limiter.configure_source(
        "assessor_api",
        config.assessor.rate_limit_per_hour,
        config.assessor.safety_margin,
    );
    let assessor_limiter = Arc::new(assessor_limiter.with_observer(rate_observer.clone()));

    // MLS pacing comes from Anti-Detection humanized delays between pages
    // (§4.5), not the sliding-window limiter; a generous per-second cap
    // here only guards against a runaway retry loop hammering the site.
    let mut mls_limiter = RateLimiter::new(Duration::from_secs(1));
    mls_limiter.configure_source("mls_scrape", 5, 0.0);
    let mls_limiter = Arc::new(mls_limiter.with_observer(rate_observer));

    let selectors = SelectorConfig::load(&config.selector_config_path)
        .unwrap_or_else(|err| {
            tracing::warn!(error = %err, path = %config.selector_config_path, "falling back to built-in selector config");
            SelectorConfig::default_config()
        });

    let proxy_pool = Arc::new(ProxyPool::new(&config.proxy));

    let mut collectors: Vec<Arc<dyn Collector>> = Vec::new();

    let assessor = AssessorApiCollector::new(config.assessor.clone(), assessor_limiter.clone());
    if let Err(err) = assessor.validate_config() {
        tracing::error!(error = %err, "assessor collector misconfigured; disabled for this run");
    } else {
        collectors.push(Arc::new(assessor));
    }

    let scrape = MlsScrapeCollector::new(config.mls.clone(), proxy_pool.clone(), mls_limiter.clone(), selectors);
    if let Err(err) = scrape.validate_config() {
        tracing::error!(error = %err, "MLS scrape collector misconfigured; disabled for this run");
    } else {
        collectors.push(Arc::new(scrape));
    }

    if collectors.is_empty() {
        tracing::error!("no collectors could be constructed; refusing to start");
        std::process::exit(1);
    }

    let llm = LlmClient::new(config.llm.clone());
    let current_year = chrono::Datelike::year(&chrono::Utc::now());
    let validator = ProcessingValidator::new(config.validation.clone(), current_year);
    let extractor = Arc::new(PropertyExtractor::new(
        llm,
        validator,
        config.processing.enable_fallback,
        config.llm.batch_size,
    ));

    let pipeline = Arc::new(ProcessingPipeline::new(
        extractor.clone(),
        repository.clone(),
        metrics.clone(),
        config.processing.batch_size,
        config.processing.max_concurrent,
    ));

    let orchestrator = Orchestrator::new(&config, collectors, pipeline, extractor, repository.clone(), metrics);

    tracing::info!(regions = ?config.target_zip_codes, "starting daily run");
    let run = orchestrator.run().await;

    match Orchestrator::write_execution_report(&config.reports_dir, &run.execution).await {
        Ok(path) => tracing::info!(path = %path.display(), "execution report written"),
        Err(err) => tracing::warn!(error = %err, "failed to write execution report"),
    }

    tracing::info!(
        total_processed = run.report.total_processed,
        new_properties = run.report.new_properties,
        updated_properties = run.report.updated_properties,
        error_count = run.report.error_count,
        duration_seconds = run.report.duration_seconds,
        "daily run finished"
    );

    if !run.success {
        std::process::exit(1);
    }
}
