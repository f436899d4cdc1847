//! Automated property data pipeline for a single metropolitan area:
//! collection (§4.1-§4.5), processing (§4.6-§4.10) and the daily
//! orchestrated run (§4.11) that drives one into the other.

pub mod anti_detection;
pub mod collector;
pub mod config;
pub mod domain;
pub mod error;
pub mod hashing;
pub mod llm;
pub mod metrics;
pub mod orchestrator;
pub mod pipeline;
pub mod proxy_pool;
pub mod rate_limiter;
pub mod repository;
pub mod validation;
