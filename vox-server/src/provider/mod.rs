//! Language model backends for conversational response generation.
//!
//! Provides a unified interface over OpenAI-compatible APIs (Grok, Groq,
//! OpenAI) and the Anthropic Messages API, with token streaming and retry
//! support.

mod anthropic;
mod openai;
mod resilient;

pub use anthropic::Anthropic;
pub use openai::OpenAiCompatible;
pub use resilient::{ResilienceConfig, ResilientModel};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use vox_common::LlmConfig;

/// Tokens buffered between the SSE reader task and the consumer.
const TOKEN_CHANNEL_CAPACITY: usize = 64;

/// Instruction used when compacting conversation history.
const SUMMARY_INSTRUCTION: &str = "Summarize this conversation concisely, preserving key \
     facts and context. Write it as a brief narrative paragraph.";

/// Sampling settings for summarization calls.
const SUMMARY_TEMPERATURE: f32 = 0.3;
const SUMMARY_MAX_TOKENS: u32 = 200;

// ============================================================================
// Model Trait
// ============================================================================

/// Token-by-token output of a streaming completion.
///
/// The channel closes after the final token. A mid-stream failure arrives
/// as a single `Err` item before the channel closes.
pub type TokenStream = mpsc::Receiver<Result<String, ProviderError>>;

/// Unified interface for conversational language models.
///
/// Implementations carry their persona prompt and sampling settings, so
/// callers only supply the conversation history.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Get the provider name.
    fn name(&self) -> &str;

    /// Generate a complete reply in one call.
    async fn generate(&self, history: &[ChatMessage]) -> Result<String, ProviderError>;

    /// Stream a reply token by token.
    async fn stream(&self, history: &[ChatMessage]) -> Result<TokenStream, ProviderError>;

    /// Condense conversation history into a short narrative paragraph.
    async fn summarize(&self, history: &[ChatMessage]) -> Result<String, ProviderError>;
}

/// Error from a model backend.
#[derive(Debug, Clone)]
pub struct ProviderError {
    pub provider: String,
    pub message: String,
    pub status_code: Option<u16>,
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.provider, self.message)
    }
}

impl std::error::Error for ProviderError {}

// ============================================================================
// Conversation Types
// ============================================================================

/// Speaker of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(self) -> &'static str {
        match self {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        }
    }
}

/// A message in the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(ChatRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(ChatRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(ChatRole::Assistant, content)
    }
}

/// Render history as "role: content" lines for summarization prompts.
fn format_transcript(history: &[ChatMessage]) -> String {
    history
        .iter()
        .map(|m| format!("{}: {}", m.role.as_str(), m.content))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Extract the payload of the first `data:` line in an SSE event.
fn sse_data(event_text: &str) -> Option<&str> {
    event_text
        .lines()
        .find_map(|line| line.strip_prefix("data:"))
        .map(str::trim)
}

// ============================================================================
// Factory
// ============================================================================

/// Build the configured model backend, wrapped with retry support.
pub fn create_model(
    config: &LlmConfig,
    api_key: &str,
    system_prompt: &str,
) -> anyhow::Result<Arc<dyn LanguageModel>> {
    let inner: Arc<dyn LanguageModel> = match config.provider.to_lowercase().as_str() {
        "grok" | "groq" | "openai" => {
            Arc::new(OpenAiCompatible::new(config, api_key, system_prompt))
        }
        "anthropic" => Arc::new(Anthropic::new(config, api_key, system_prompt)),
        other => anyhow::bail!("Unsupported LLM provider: {other}"),
    };

    tracing::info!(
        provider = inner.name(),
        model = %config.effective_model(),
        "Language model initialized"
    );

    Ok(Arc::new(ResilientModel::new(
        inner,
        ResilienceConfig::default(),
    )))
}
