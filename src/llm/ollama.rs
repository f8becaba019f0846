//! Ollama chat client (`POST {base_url}/api/chat`, non-streaming).

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{ExtractionFailure, LlmClient, Message};
use crate::config::LlmConfig;
use crate::throttle::Throttle;

pub struct OllamaClient {
    base_url: String,
    model: String,
    options: ChatOptions,
    client: reqwest::Client,
    throttle: Throttle,
}

#[derive(Debug, Clone, Copy, Serialize)]
struct ChatOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'static str>,
    options: ChatOptions,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: Option<ChatMessage>,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}

impl OllamaClient {
    pub fn new(config: &LlmConfig, throttle: Throttle) -> Result<Self, ExtractionFailure> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ExtractionFailure::Request(format!("cannot build HTTP client: {e}")))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            options: ChatOptions {
                temperature: config.temperature,
                num_predict: config.max_tokens,
            },
            client,
            throttle,
        })
    }
}

#[async_trait]
impl LlmClient for OllamaClient {
    async fn chat(&self, messages: &[Message], json_mode: bool) -> Result<String, ExtractionFailure> {
        let request = ChatRequest {
            model: &self.model,
            messages,
            stream: false,
            format: json_mode.then_some("json"),
            options: self.options,
        };

        // Held until the body is read.
        let _permit = self.throttle.acquire().await;
        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ExtractionFailure::Timeout
                } else {
                    ExtractionFailure::Request(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), model = %self.model, "Ollama chat error");
            return Err(ExtractionFailure::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ExtractionFailure::UnreadableResponse(e.to_string()))?;

        parsed.message.map(|m| m.content).ok_or_else(|| {
            ExtractionFailure::UnreadableResponse("response has no 'message'".to_string())
        })
    }

    fn model(&self) -> &str {
        &self.model
    }
}
