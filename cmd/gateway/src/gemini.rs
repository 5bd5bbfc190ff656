//! Google Gemini completion client.
//!
//! Sends the user query as a single-turn `generateContent` request and
//! returns the first text part of the first candidate.

use std::time::Duration;

use async_trait::async_trait;
use chatlog_history::{Completer, CompletionError};
use reqwest::Client;
use serde_json::{Value, json};

pub const DEFAULT_MODEL: &str = "gemini-1.5-flash-latest";
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

const API_KEY_HEADER: &str = "x-goog-api-key";

/// Gemini client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeminiConfig {
    /// API key for authentication
    pub api_key: String,
    /// Model name (e.g., "gemini-1.5-flash-latest")
    pub model: String,
    /// API base URL without trailing slash
    pub base_url: String,
    /// Request timeout
    pub timeout: Duration,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(60),
        }
    }
}

pub struct GeminiCompleter {
    client: Client,
    config: GeminiConfig,
}

impl GeminiCompleter {
    pub fn new(config: GeminiConfig) -> Result<Self, CompletionError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| CompletionError::Request(e.to_string()))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &GeminiConfig {
        &self.config
    }

    /// Endpoint URL. The API key travels in a header so it never shows up
    /// in URLs or in errors derived from them.
    fn api_url(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            self.config.model,
        )
    }
}

fn request_body(query: &str) -> Value {
    json!({
        "contents": [{
            "role": "user",
            "parts": [{"text": query}],
        }]
    })
}

/// First text part of the first candidate. Empty when the model returned
/// no candidates or a non-text part.
pub fn extract_text(body: &Value) -> String {
    body["candidates"][0]["content"]["parts"][0]["text"]
        .as_str()
        .unwrap_or_default()
        .to_string()
}

#[async_trait]
impl Completer for GeminiCompleter {
    async fn complete(&self, query: &str) -> Result<String, CompletionError> {
        let response = self
            .client
            .post(self.api_url())
            .header("Content-Type", "application/json")
            .header(API_KEY_HEADER, self.config.api_key.as_str())
            .json(&request_body(query))
            .send()
            .await
            .map_err(|e| CompletionError::Request(e.without_url().to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            return Err(CompletionError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| CompletionError::Response(e.without_url().to_string()))?;
        Ok(extract_text(&body))
    }
}
