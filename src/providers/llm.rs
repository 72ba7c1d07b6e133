// =============================================================================
// LLM client — OpenAI-compatible chat completions
// =============================================================================
//
// One client per (base_url, model). Enrichment prompts demand strict JSON;
// `extract_json` tolerates the usual model wrappers (markdown fences, prose
// prefixes) with brace matching.
//
// `llm_compare_models` entries have the form `provider|model`; known
// provider names map to their public endpoints, anything else is treated as
// a base URL for a self-hosted OpenAI-compatible server.
// =============================================================================

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument};

use crate::config::Settings;
use crate::error::{MeridianError, Result};
use crate::providers::{LlmProvider, LlmResponse};

const DEFAULT_TIMEOUT_SECS: u64 = 60;

pub struct ChatCompletionsClient {
    base_url: String,
    model: String,
    api_key: String,
    /// When set (llm_temperature), overrides the per-call temperature.
    temperature_override: Option<f64>,
    client: reqwest::Client,
}

impl ChatCompletionsClient {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, api_key: impl Into<String>, timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .expect("failed to build reqwest client");

        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: api_key.into(),
            temperature_override: None,
            client,
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature_override = Some(temperature);
        self
    }

    /// Build the primary client from settings, or `None` when `use_llm` is
    /// off or no model is configured.
    pub fn from_settings(settings: &Settings) -> Option<Self> {
        if !settings.use_llm() {
            return None;
        }
        let model = settings.get("llm_model")?.to_string();
        let base_url = settings
            .get_or("llm_base_url", "https://api.openai.com/v1")
            .to_string();
        let api_key = settings
            .get("llm_api_key")
            .map(str::to_string)
            .or_else(|| std::env::var("LLM_API_KEY").ok())
            .unwrap_or_default();
        let timeout = settings.get_u64("llm_timeout", DEFAULT_TIMEOUT_SECS);
        let mut client = Self::new(base_url, model, api_key, timeout);
        if let Some(temp) = settings.get("llm_temperature").and_then(|v| v.parse().ok()) {
            client = client.with_temperature(temp);
        }
        Some(client)
    }

    /// Build the side-channel comparison clients from `llm_compare_models`
    /// (`provider|model` entries). Unknown providers are skipped with a log.
    pub fn comparison_clients(settings: &Settings) -> Vec<ChatCompletionsClient> {
        settings
            .llm_compare_models()
            .iter()
            .filter_map(|spec| {
                let (provider, model) = spec.split_once('|')?;
                let base_url = match provider {
                    "openai" => "https://api.openai.com/v1".to_string(),
                    "openrouter" => "https://openrouter.ai/api/v1".to_string(),
                    "groq" => "https://api.groq.com/openai/v1".to_string(),
                    other if other.starts_with("http") => other.to_string(),
                    other => {
                        tracing::warn!(provider = other, "unknown compare provider — skipped");
                        return None;
                    }
                };
                let key_var = format!("{}_API_KEY", provider.to_ascii_uppercase());
                let api_key = std::env::var(key_var).unwrap_or_default();
                let timeout = settings.get_u64("llm_timeout", DEFAULT_TIMEOUT_SECS);
                Some(Self::new(base_url, model.to_string(), api_key, timeout))
            })
            .collect()
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Deserialize, Default)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[async_trait]
impl LlmProvider for ChatCompletionsClient {
    #[instrument(skip(self, system, user), name = "llm::generate", fields(model = %self.model))]
    async fn generate(
        &self,
        system: &str,
        user: &str,
        max_tokens: u32,
        temperature: f64,
    ) -> Result<LlmResponse> {
        let url = format!("{}/chat/completions", self.base_url);
        let temperature = self.temperature_override.unwrap_or(temperature);
        let payload = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
            "max_tokens": max_tokens,
            "temperature": temperature,
        });

        let mut req = self.client.post(&url).json(&payload);
        if !self.api_key.is_empty() {
            req = req.bearer_auth(&self.api_key);
        }

        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let msg = format!("LLM endpoint returned {status}: {body}");
            return if status.is_server_error() || status.as_u16() == 429 {
                Err(MeridianError::Transient(msg))
            } else {
                Err(MeridianError::Permanent(msg))
            };
        }

        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|e| MeridianError::Permanent(format!("LLM response not JSON: {e}")))?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| MeridianError::Permanent("LLM response has no choices".into()))?;

        let usage = parsed.usage.unwrap_or_default();
        debug!(
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            "completion received"
        );

        Ok(LlmResponse {
            text,
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
        })
    }

    fn model_label(&self) -> String {
        self.model.clone()
    }
}

impl std::fmt::Debug for ChatCompletionsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatCompletionsClient")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Strict-JSON extraction
// ---------------------------------------------------------------------------

/// Extract the first JSON object from model output that may carry markdown
/// fences or surrounding prose.
pub fn extract_json(text: &str) -> Result<String> {
    let trimmed = text.trim();

    if trimmed.starts_with('{') && serde_json::from_str::<serde_json::Value>(trimmed).is_ok() {
        return Ok(trimmed.to_string());
    }

    if let Some(inner) = extract_from_fence(trimmed) {
        if serde_json::from_str::<serde_json::Value>(&inner).is_ok() {
            return Ok(inner);
        }
    }

    if let Some(obj) = extract_first_object(trimmed) {
        if serde_json::from_str::<serde_json::Value>(&obj).is_ok() {
            return Ok(obj);
        }
    }

    Err(MeridianError::Permanent(format!(
        "no JSON object found in model output (len={})",
        text.len()
    )))
}

fn extract_from_fence(text: &str) -> Option<String> {
    for marker in ["```json\n", "```json\r\n", "```\n", "```\r\n"] {
        if let Some(start) = text.find(marker) {
            let body_start = start + marker.len();
            if let Some(end) = text[body_start..].find("```") {
                return Some(text[body_start..body_start + end].trim().to_string());
            }
        }
    }
    None
}

/// First balanced `{ … }`, string-literal aware.
fn extract_first_object(text: &str) -> Option<String> {
    let mut depth = 0;
    let mut start = None;
    let mut in_string = false;
    let mut escape = false;

    for (i, ch) in text.char_indices() {
        if escape {
            escape = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape = true,
            '"' => in_string = !in_string,
            '{' if !in_string => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = start {
                        return Some(text[s..=i].to_string());
                    }
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
    fn extract_clean_json() {
        let input = r#"{"score": 0.75, "insight": "solid quarter"}"#;
        assert_eq!(extract_json(input).unwrap(), input);
    }

    #[test]
    fn extract_from_markdown_fence() {
        let input = "Sure, here you go:\n```json\n{\"score\": 0.2}\n```\nanything else?";
        assert_eq!(extract_json(input).unwrap(), "{\"score\": 0.2}");
    }

    #[test]
    fn extract_with_prose_prefix() {
        let input = "The assessment is {\"score\": 0.5, \"insight\": \"mixed {signals}\"} overall.";
        let got = extract_json(input).unwrap();
        let v: serde_json::Value = serde_json::from_str(&got).unwrap();
        assert_eq!(v["score"], 0.5);
    }

    #[test]
    fn braces_inside_strings_do_not_confuse() {
        let input = r#"{"insight": "guidance range {low, high}", "score": 0.6}"#;
        assert_eq!(extract_json(input).unwrap(), input);
    }

    #[test]
    fn no_json_is_an_error() {
        assert!(extract_json("I cannot help with that.").is_err());
    }
}
