//! Text-generation provider abstraction and the Gemini implementation.
//!
//! Defines the [`TextGenerator`] trait consumed by the filter, SQL, and
//! answer synthesizers, and [`GeminiClient`], which calls the Gemini
//! `generateContent` REST endpoint. Error messages embed the HTTP status
//! code and response body, which is what the retry classifier in
//! [`crate::retry`] inspects to distinguish transient overload from
//! terminal failures.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::time::Duration;

use crate::config::LlmConfig;

/// A service that turns a prompt into text.
///
/// Implementations must be cheap to share (`Arc<dyn TextGenerator>`); one
/// instance serves all requests.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// Gemini REST client.
///
/// Calls `POST /v1beta/models/{model}:generateContent` with a low sampling
/// temperature, suitable for schema-constrained filter and SQL generation.
pub struct GeminiClient {
    client: reqwest::Client,
    model: String,
    api_key: String,
    base_url: String,
}

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

impl GeminiClient {
    /// Create a client from configuration, reading the API key from the
    /// configured environment variable.
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| anyhow::anyhow!("{} environment variable not set", config.api_key_env))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            model: config.model.clone(),
            api_key,
            base_url: GEMINI_BASE_URL.to_string(),
        })
    }

    /// Override the endpoint base URL (self-hosted proxies, tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );

        let body = serde_json::json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
            "generationConfig": { "temperature": 0.1, "topP": 1.0 },
        });

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Gemini API error {}: {}", status, body_text);
        }

        let json: serde_json::Value = response.json().await?;
        parse_gemini_response(&json)
    }
}

/// Extract the first candidate's text from a `generateContent` response.
fn parse_gemini_response(json: &serde_json::Value) -> Result<String> {
    let text = json
        .get("candidates")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("content"))
        .and_then(|c| c.get("parts"))
        .and_then(|p| p.as_array())
        .and_then(|p| p.first())
        .and_then(|p| p.get("text"))
        .and_then(|t| t.as_str())
        .ok_or_else(|| anyhow::anyhow!("Invalid Gemini response: missing candidate text"))?;

    Ok(text.to_string())
}

/// Strip Markdown code-fence markup from generated text.
///
/// Models wrap structured output in ```` ```json ````, ```` ```sql ````, or
/// bare ```` ``` ```` fences despite instructions not to; the synthesizers
/// only want the payload.
pub fn strip_code_fences(text: &str) -> String {
    text.trim()
        .replace("```json", "")
        .replace("```sql", "")
        .replace("```", "")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_gemini_response() {
        let json = serde_json::json!({
            "candidates": [{
                "content": { "parts": [{ "text": "SELECT 1;" }] }
            }]
        });
        assert_eq!(parse_gemini_response(&json).unwrap(), "SELECT 1;");
    }

    #[test]
    fn test_parse_gemini_response_empty() {
        let json = serde_json::json!({ "candidates": [] });
        assert!(parse_gemini_response(&json).is_err());
    }

    #[test]
    fn test_strip_json_fence() {
        let fenced = "```json\n{\"latitude\": {\"$gte\": 8}}\n```";
        assert_eq!(strip_code_fences(fenced), "{\"latitude\": {\"$gte\": 8}}");
    }

    #[test]
    fn test_strip_sql_fence() {
        let fenced = "```sql\nSELECT avg_temperature FROM \"Average_Ocean_Profiles\";\n```";
        assert_eq!(
            strip_code_fences(fenced),
            "SELECT avg_temperature FROM \"Average_Ocean_Profiles\";"
        );
    }

    #[test]
    fn test_strip_noop_on_plain_text() {
        assert_eq!(strip_code_fences("  {} "), "{}");
    }
}
