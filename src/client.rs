use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::Settings;
use crate::prompt::SYSTEM_PROMPT;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("API key is not configured")]
    MissingApiKey,
    #[error("request failed: {0}")]
    Transport(String),
    #[error("upstream returned HTTP {status}: {body}")]
    UpstreamStatus { status: u16, body: String },
    #[error("malformed response envelope: {0}")]
    MalformedEnvelope(String),
}

/// Anything that turns a prompt into raw completion text.
pub trait Completer {
    fn complete(&self, prompt: &str) -> Result<String, ClientError>;
    fn provider(&self) -> &str;
    fn model(&self) -> &str;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
    max_tokens: u32,
    temperature: f64,
    stream: bool,
}

pub struct ApiClient {
    client: reqwest::blocking::Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f64,
}

impl ApiClient {
    pub fn from_settings(settings: &Settings) -> Result<Self, ClientError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(settings.timeout))
            .build()
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: settings.api_base.clone(),
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
        })
    }

    pub fn endpoint(&self) -> String {
        endpoint_for(&self.base_url)
    }
}

/// Resolve the chat completions endpoint from the base URL.
pub fn endpoint_for(base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if base.ends_with("/chat/completions") {
        base.to_string()
    } else if base.ends_with("/v1") {
        format!("{}/chat/completions", base)
    } else {
        format!("{}/v1/chat/completions", base)
    }
}

impl Completer for ApiClient {
    fn complete(&self, prompt: &str) -> Result<String, ClientError> {
        if self.api_key.trim().is_empty() {
            return Err(ClientError::MissingApiKey);
        }

        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                Message {
                    role: "user".to_string(),
                    content: prompt.to_string(),
                },
            ],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            stream: false,
        };

        let url = self.endpoint();
        debug!(url = %url, model = %self.model, prompt_len = prompt.len(), "sending completion request");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        let status = resp.status();
        let text = resp
            .text()
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        if status.as_u16() != 200 {
            return Err(ClientError::UpstreamStatus {
                status: status.as_u16(),
                body: excerpt(&text, 500),
            });
        }

        extract_content(&text)
    }

    fn provider(&self) -> &str {
        "deepseek"
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Pull `choices[0].message.content` out of a chat completion body.
pub fn extract_content(body: &str) -> Result<String, ClientError> {
    let json: serde_json::Value = serde_json::from_str(body)
        .map_err(|e| ClientError::MalformedEnvelope(format!("invalid JSON: {}", e)))?;
    json["choices"]
        .get(0)
        .and_then(|c| c["message"]["content"].as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| {
            ClientError::MalformedEnvelope("missing choices[0].message.content".to_string())
        })
}

pub fn excerpt(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max).collect();
        format!("{}...", cut)
    }
}
