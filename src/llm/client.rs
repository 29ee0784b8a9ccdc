use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, warn};

use super::ChatCompleter;
use super::error::LlmError;
use super::types::{ChatMessage, ChatOptions, ChatRequest, ChatResponse};
use crate::config::LlmConfig;

/// Exponential backoff for transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Base delay in milliseconds for exponential backoff.
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
        }
    }
}

impl RetryPolicy {
    /// delay = base_delay_ms * 2^(attempt - 1)
    pub fn delay_for_attempt(&self, attempt: u32) -> u64 {
        self.base_delay_ms
            .saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)))
    }
}

/// HTTP client for an Ollama-style `/api/chat` endpoint.
pub struct ChatClient {
    client: Client,
    url: String,
    model: String,
    options: ChatOptions,
    retry: RetryPolicy,
}

impl ChatClient {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: config.url.clone(),
            model: config.model.clone(),
            options: ChatOptions {
                temperature: config.temperature,
                top_p: config.top_p,
                ..ChatOptions::default()
            },
            retry: RetryPolicy {
                max_retries: config.max_retries,
                base_delay_ms: config.retry_base_delay_ms,
            },
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn send_once(&self, req: &ChatRequest) -> Result<String, LlmError> {
        let response = self.client.post(&self.url).json(req).send().await?;
        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|secs| secs * 1000)
                .unwrap_or(1000);
            return Err(LlmError::RateLimited {
                retry_after_ms: retry_after,
            });
        }

        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(LlmError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        let body = response.json::<ChatResponse>().await?;
        body.content()
            .map(str::to_string)
            .ok_or(LlmError::EmptyResponse)
    }
}

#[async_trait]
impl ChatCompleter for ChatClient {
    async fn complete(&self, messages: Vec<ChatMessage>) -> Result<String, LlmError> {
        let req = ChatRequest {
            model: self.model.clone(),
            messages,
            stream: false,
            format: Some("json".to_string()),
            options: self.options,
        };

        let mut attempt = 0;
        loop {
            match self.send_once(&req).await {
                Ok(content) => {
                    debug!(model = %self.model, attempt, chars = content.len(), "model replied");
                    return Ok(content);
                }
                Err(e) if e.is_retryable() && attempt < self.retry.max_retries => {
                    attempt += 1;
                    let mut delay_ms = self.retry.delay_for_attempt(attempt);
                    if let LlmError::RateLimited { retry_after_ms } = &e {
                        delay_ms = delay_ms.max(*retry_after_ms);
                    }
                    warn!(
                        model = %self.model,
                        attempt,
                        max_retries = self.retry.max_retries,
                        delay_ms,
                        error = %e,
                        "model call failed, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
