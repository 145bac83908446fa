//! OpenAI-compatible chat backends (Grok, Groq, OpenAI).
//!
//! All three speak the `/chat/completions` API with bearer auth; only base
//! URL and default model differ.

use super::{ChatMessage, LanguageModel, ProviderError, TokenStream};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use vox_common::LlmConfig;

/// Provider for any OpenAI-compatible chat completion API.
pub struct OpenAiCompatible {
    name: String,
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
    system_prompt: String,
    temperature: f32,
    max_tokens: u32,
}

impl OpenAiCompatible {
    /// Create a provider from the LLM configuration.
    pub fn new(
        config: &LlmConfig,
        api_key: impl Into<String>,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            name: config.provider.to_lowercase(),
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(120))
                .connect_timeout(std::time::Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url: config.effective_base_url(),
            model: config.effective_model(),
            api_key: api_key.into(),
            system_prompt: system_prompt.into(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }

    fn error(&self, message: impl Into<String>, status_code: Option<u16>) -> ProviderError {
        ProviderError {
            provider: self.name.clone(),
            message: message.into(),
            status_code,
        }
    }

    /// Build a request with the persona prompt prepended as a system message.
    fn request_body(&self, history: &[ChatMessage], stream: bool) -> ChatCompletionRequest {
        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(WireMessage {
            role: "system".into(),
            content: self.system_prompt.clone(),
        });
        for message in history {
            messages.push(WireMessage {
                role: message.role.as_str().into(),
                content: message.content.clone(),
            });
        }

        ChatCompletionRequest {
            model: self.model.clone(),
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stream,
        }
    }

    async fn complete(&self, request: &ChatCompletionRequest) -> Result<String, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
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

        let result: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| self.error(format!("Failed to parse response: {e}"), None))?;

        let content = result
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();

        if content.is_empty() {
            return Err(self.error("Model returned an empty response", None));
        }

        Ok(content)
    }
}

#[async_trait]
impl LanguageModel for OpenAiCompatible {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, history: &[ChatMessage]) -> Result<String, ProviderError> {
        let content = self.complete(&self.request_body(history, false)).await?;
        tracing::debug!(provider = %self.name, chars = content.len(), "Model response complete");
        Ok(content)
    }

    async fn stream(&self, history: &[ChatMessage]) -> Result<TokenStream, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
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
        let provider = self.name.clone();

        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut buffer = String::new();

            while let Some(chunk) = stream.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        let _ = tx
                            .send(Err(ProviderError {
                                provider,
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
                    if data == "[DONE]" {
                        return;
                    }

                    match serde_json::from_str::<StreamChunk>(data) {
                        Ok(chunk) => {
                            let token = chunk
                                .choices
                                .into_iter()
                                .next()
                                .and_then(|choice| choice.delta.content)
                                .unwrap_or_default();
                            // Receiver dropping means the turn was abandoned.
                            if !token.is_empty() && tx.send(Ok(token)).await.is_err() {
                                return;
                            }
                        }
                        Err(e) => {
                            tracing::debug!(
                                provider = %provider,
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
        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![
                WireMessage {
                    role: "system".into(),
                    content: super::SUMMARY_INSTRUCTION.into(),
                },
                WireMessage {
                    role: "user".into(),
                    content: super::format_transcript(history),
                },
            ],
            temperature: super::SUMMARY_TEMPERATURE,
            max_tokens: super::SUMMARY_MAX_TOKENS,
            stream: false,
        };
        self.complete(&request).await
    }
}

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<WireMessage>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}
