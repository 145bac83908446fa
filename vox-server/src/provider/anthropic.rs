//! Anthropic (Claude) Messages API backend.

use super::{ChatMessage, ChatRole, LanguageModel, ProviderError, TokenStream};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use vox_common::LlmConfig;

/// Anthropic API provider.
pub struct Anthropic {
    client: reqwest::Client,
    base_url: String,
    model: String,
    system_prompt: String,
    temperature: f32,
    max_tokens: u32,
}

impl Anthropic {
    /// Create a provider from the LLM configuration.
    pub fn new(config: &LlmConfig, api_key: &str, system_prompt: impl Into<String>) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(api_key).unwrap_or_else(|_| HeaderValue::from_static("")),
        );
        headers.insert("anthropic-version", HeaderValue::from_static("2023-06-01"));

        Self {
            client: reqwest::Client::builder()
                .default_headers(headers)
                .timeout(std::time::Duration::from_secs(120))
                .connect_timeout(std::time::Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            base_url: config.effective_base_url(),
            model: config.effective_model(),
            system_prompt: system_prompt.into(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }

    fn error(&self, message: impl Into<String>, status_code: Option<u16>) -> ProviderError {
        ProviderError {
            provider: "anthropic".into(),
            message: message.into(),
            status_code,
        }
    }

    fn request_body(&self, history: &[ChatMessage], stream: bool) -> MessagesRequest {
        MessagesRequest {
            model: self.model.clone(),
            system: self.system_prompt.clone(),
            messages: to_wire_messages(history),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stream: stream.then_some(true),
        }
    }

    async fn complete(&self, request: &MessagesRequest) -> Result<String, ProviderError> {
        let url = format!("{}/v1/messages", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| self.error(format!("Request failed: {e}"), None))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(self.error(
                format!("API error ({}): {}", status.as_u16(), error_text),
                Some(status.as_u16()),
            ));
        }

        let result: MessagesResponse = response
            .json()
            .await
            .map_err(|e| self.error(format!("Failed to parse response: {e}"), None))?;

        let content = result
            .content
            .iter()
            .filter(|block| block.block_type == "text")
            .map(|block| block.text.as_str())
            .collect::<Vec<_>>()
            .join("");

        if content.is_empty() {
            return Err(self.error("Model returned an empty response", None));
        }

        Ok(content)
    }
}

#[async_trait]
impl LanguageModel for Anthropic {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn generate(&self, history: &[ChatMessage]) -> Result<String, ProviderError> {
        let content = self.complete(&self.request_body(history, false)).await?;
        tracing::debug!(
            provider = "anthropic",
            chars = content.len(),
            "Model response complete"
        );
        Ok(content)
    }

    async fn stream(&self, history: &[ChatMessage]) -> Result<TokenStream, ProviderError> {
        let url = format!("{}/v1/messages", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(&self.request_body(history, true))
            .send()
            .await
            .map_err(|e| self.error(format!("Request failed: {e}"), None))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(self.error(
                format!("API error ({}): {}", status.as_u16(), error_text),
                Some(status.as_u16()),
            ));
        }

        let (tx, rx) = mpsc::channel(super::TOKEN_CHANNEL_CAPACITY);

        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut buffer = String::new();

            while let Some(chunk) = stream.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        let _ = tx
                            .send(Err(ProviderError {
                                provider: "anthropic".into(),
                                message: format!("Stream failed: {e}"),
                                status_code: None,
                            }))
                            .await;
                        return;
                    }
                };

                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(pos) = buffer.find("\n\n") {
                    let event_text = buffer[..pos].to_string();
                    buffer = buffer[pos + 2..].to_string();

                    let Some(data) = super::sse_data(&event_text) else {
                        continue;
                    };

                    match serde_json::from_str::<StreamEvent>(data) {
                        Ok(StreamEvent::ContentBlockDelta { delta }) => {
                            if !delta.text.is_empty() && tx.send(Ok(delta.text)).await.is_err() {
                                return;
                            }
                        }
                        Ok(StreamEvent::MessageStop) => return,
                        Ok(StreamEvent::Error { error }) => {
                            let _ = tx
                                .send(Err(ProviderError {
                                    provider: "anthropic".into(),
                                    message: format!("Stream error: {}", error.message),
                                    status_code: None,
                                }))
                                .await;
                            return;
                        }
                        Ok(StreamEvent::Other) => {}
                        Err(e) => {
                            tracing::debug!(
                                provider = "anthropic",
                                error = %e,
                                "Skipping malformed stream event"
                            );
                        }
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn summarize(&self, history: &[ChatMessage]) -> Result<String, ProviderError> {
        let request = MessagesRequest {
            model: self.model.clone(),
            system: super::SUMMARY_INSTRUCTION.into(),
            messages: vec![WireMessage {
                role: "user".into(),
                content: super::format_transcript(history),
            }],
            temperature: super::SUMMARY_TEMPERATURE,
            max_tokens: super::SUMMARY_MAX_TOKENS,
            stream: None,
        };
        self.complete(&request).await
    }
}

/// Convert history to Messages API form.
///
/// The persona lives in the top-level `system` field, so system-role
/// messages are dropped here, except conversation summaries which ride
/// along as user context. The API requires the first message to come
/// from the user.
fn to_wire_messages(history: &[ChatMessage]) -> Vec<WireMessage> {
    let mut messages: Vec<WireMessage> = Vec::with_capacity(history.len());
    for message in history {
        match message.role {
            ChatRole::User | ChatRole::Assistant => messages.push(WireMessage {
                role: message.role.as_str().into(),
                content: message.content.clone(),
            }),
            ChatRole::System if message.content.to_lowercase().contains("summary") => {
                messages.push(WireMessage {
                    role: "user".into(),
                    content: format!("[Context] {}", message.content),
                });
            }
            ChatRole::System => {}
        }
    }

    if messages.is_empty() {
        return vec![WireMessage {
            role: "user".into(),
            content: "Hello".into(),
        }];
    }
    if messages[0].role != "user" {
        messages.insert(
            0,
            WireMessage {
                role: "user".into(),
                content: "(continuing conversation)".into(),
            },
        );
    }
    messages
}

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    system: String,
    messages: Vec<WireMessage>,
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    ContentBlockDelta { delta: StreamDelta },
    MessageStop,
    Error { error: StreamError },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct StreamError {
    #[serde(default)]
    message: String,
}
