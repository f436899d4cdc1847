//! LLM-first field extraction with deterministic rule-based fallback
//! (§4.6-§4.8).

pub mod client;
pub mod extractor;
pub mod rule_fallback;

pub use client::LlmClient;
pub use extractor::PropertyExtractor;
