//! Client to a local LLM HTTP server, Ollama-shaped (§4.6, §6.2).

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;

use crate::config::LlmConfig;
use crate::error::ProcessingError;

const STOP_TOKENS: &[&str] = &["</output>", "\n\n---"];
const MAX_CONTENT_CHARS: usize = 4000;

#[derive(Debug, Clone, Serialize)]
pub struct FieldSchema {
    #[serde(rename = "type")]
    pub field_type: String,
    pub description: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    models: Vec<ModelInfo>,
}

#[derive(Debug, Deserialize)]
struct ModelInfo {
    name: String,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
    #[serde(default)]
    #[allow(dead_code)]
    eval_count: Option<u64>,
}

pub struct LlmClient {
    config: LlmConfig,
    client: Client,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Self {
        let client = Client::builder()
            // §5: "LLM client uses a connection pool with a small cap (e.g. 5)"
            .pool_max_idle_per_host(5)
            .timeout(Duration::from_secs(config.timeout_s))
            .build()
            .expect("reqwest client builds with static config");
        Self { config, client }
    }

    /// Liveness plus confirmation the configured model is actually loaded.
    pub async fn health(&self) -> bool {
        let version_ok = self
            .client
            .get(format!("{}/api/version", self.config.base_url.trim_end_matches('/')))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false);
        if !version_ok {
            return false;
        }

        let tags = self
            .client
            .get(format!("{}/api/tags", self.config.base_url.trim_end_matches('/')))
            .send()
            .await
            .ok();
        match tags {
            Some(response) if response.status().is_success() => {
                match response.json::<TagsResponse>().await {
                    Ok(tags) => tags.models.iter().any(|m| m.name == self.config.model),
                    Err(_) => false,
                }
            }
            _ => false,
        }
    }

    /// Single-shot, non-streaming completion. Retries transient failures
    /// (`max_retries` default 2, base 1s, factor 2).
    pub async fn complete(
        &self,
        prompt: &str,
        system: Option<&str>,
        max_tokens: u32,
    ) -> Result<String, ProcessingError> {
        let base_delay = Duration::from_secs(1);
        let mut attempt = 0;
        loop {
            let body = json!({
                "model": self.config.model,
                "prompt": prompt,
                "system": system,
                "options": {
                    "num_predict": max_tokens,
                    "temperature": 0.1,
                    "top_p": 0.9,
                    "stop": STOP_TOKENS,
                },
                "stream": false,
            });

            let result = self
                .client
                .post(format!("{}/api/generate", self.config.base_url.trim_end_matches('/')))
                .json(&body)
                .send()
                .await;

            match result {
                Ok(response) if response.status().is_success() => {
                    let parsed = response.json::<GenerateResponse>().await;
                    match parsed {
                        Ok(parsed) if !parsed.response.trim().is_empty() => return Ok(parsed.response),
                        _ => {
                            if attempt + 1 >= self.config.max_retries {
                                return Err(ProcessingError::LlmUnavailable(
                                    "empty completion".to_string(),
                                ));
                            }
                        }
                    }
                }
                _ => {
                    if attempt + 1 >= self.config.max_retries {
                        return Err(ProcessingError::LlmUnavailable(
                            "non-2xx or network error".to_string(),
                        ));
                    }
                }
            }
            tokio::time::sleep(base_delay * 2_u32.pow(attempt)).await;
            attempt += 1;
        }
    }

    /// Compose a system prompt from `schema`, truncate `content`, call the
    /// model and parse its reply into a field mapping, or `None` on parse
    /// failure (never propagates a parse error to the caller - §4.13). A
    /// reply that fails to parse is retried once before giving up, per the
    /// "LLM parse invalid JSON" row of the collector failure-semantics
    /// table.
    pub async fn extract(
        &self,
        content: &str,
        schema: &HashMap<String, FieldSchema>,
        content_type: &str,
    ) -> Option<Value> {
        let truncated: String = content.chars().take(MAX_CONTENT_CHARS).collect();
        let system = build_system_prompt(schema, content_type);
        let prompt = format!("<content>\n{truncated}\n</content>");

        for attempt in 0..2 {
            let raw = self.complete(&prompt, Some(&system), 512).await.ok()?;
            match parse_structured_reply(&raw) {
                Some(value) => return Some(value),
                None if attempt == 0 => {
                    tracing::warn!("LLM reply did not parse as structured JSON; retrying once");
                }
                None => {}
            }
        }
        None
    }
}

fn build_system_prompt(schema: &HashMap<String, FieldSchema>, content_type: &str) -> String {
    let mut fields: Vec<&String> = schema.keys().collect();
    fields.sort();
    let field_lines: String = fields
        .iter()
        .map(|name| {
            let field = &schema[*name];
            format!("- {name} ({}): {}", field.field_type, field.description)
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "You extract structured real estate fields from {content_type} content. \
         Respond with a single JSON object wrapped in <output></output> tags \
         containing exactly these fields when present:\n{field_lines}"
    )
}

/// Extract text between `<output>...</output>` markers if present,
/// otherwise the first balanced `{ ... }` substring (§4.6).
fn parse_structured_reply(raw: &str) -> Option<Value> {
    let candidate = if let (Some(start), Some(end)) = (raw.find("<output>"), raw.find("</output>")) {
        let inner_start = start + "<output>".len();
        if inner_start <= end {
            raw[inner_start..end].trim()
        } else {
            raw.trim()
        }
    } else {
        first_balanced_object(raw)?
    };

    serde_json::from_str(candidate).ok()
}

fn first_balanced_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let mut depth = 0_i32;
    for (offset, ch) in raw[start..].char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&raw[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_output_tagged_reply() {
        let raw = r#"some preamble <output>{"address": "123 Main St", "price": 300000}</output> trailer"#;
        let value = parse_structured_reply(raw).unwrap();
        assert_eq!(value["address"], "123 Main St");
        assert_eq!(value["price"], 300000);
    }

    #[test]
    fn falls_back_to_first_balanced_object_without_markers() {
        let raw = r#"Here is the JSON: {"bedrooms": 3, "nested": {"a": 1}} done."#;
        let value = parse_structured_reply(raw).unwrap();
        assert_eq!(value["bedrooms"], 3);
        assert_eq!(value["nested"]["a"], 1);
    }

    #[test]
    fn unparseable_reply_yields_none() {
        assert!(parse_structured_reply("no json here at all").is_none());
    }

    #[test]
    fn system_prompt_lists_every_schema_field() {
        let mut schema = HashMap::new();
        schema.insert(
            "bedrooms".to_string(),
            FieldSchema {
                field_type: "integer".to_string(),
                description: "number of bedrooms".to_string(),
            },
        );
        let prompt = build_system_prompt(&schema, "html");
        assert!(prompt.contains("bedrooms"));
        assert!(prompt.contains("html"));
    }
}
