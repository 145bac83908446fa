//! Per-session conversation memory.
//!
//! Stores the message history for each connected session and keeps it
//! bounded, either with a sliding window or by compacting older messages
//! into an LLM-written summary.

use crate::provider::{ChatMessage, ChatRole, LanguageModel};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use vox_common::MemoryConfig;

struct StoredMessage {
    role: ChatRole,
    content: String,
}

struct SessionRecord {
    messages: Vec<StoredMessage>,
    summary: String,
    created_at: DateTime<Utc>,
}

impl SessionRecord {
    fn new() -> Self {
        Self {
            messages: Vec::new(),
            summary: String::new(),
            created_at: Utc::now(),
        }
    }
}

/// Conversation history for all active sessions.
///
/// One record per WebSocket session. All methods take the session id, so
/// a single instance serves the whole server.
pub struct ConversationMemory {
    config: MemoryConfig,
    summarizer: Option<Arc<dyn LanguageModel>>,
    sessions: RwLock<HashMap<String, SessionRecord>>,
}

impl ConversationMemory {
    /// Create a store. The summarizer is only consulted when
    /// `use_summarization` is enabled.
    pub fn new(config: MemoryConfig, summarizer: Option<Arc<dyn LanguageModel>>) -> Self {
        Self {
            config,
            summarizer,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Initialize a new session.
    pub async fn create_session(&self, session_id: &str) {
        let mut sessions = self.sessions.write().await;
        sessions.insert(session_id.to_string(), SessionRecord::new());
        tracing::info!(session_id, "Memory session created");
    }

    /// Append a message to a session's history.
    pub async fn add_message(&self, session_id: &str, role: ChatRole, content: &str) {
        let mut sessions = self.sessions.write().await;
        let Some(record) = sessions.get_mut(session_id) else {
            tracing::warn!(session_id, "Message for unknown memory session");
            return;
        };
        record.messages.push(StoredMessage {
            role,
            content: content.to_string(),
        });
        tracing::debug!(
            session_id,
            role = role.as_str(),
            chars = content.len(),
            "Message stored"
        );
    }

    /// Conversation history shaped for a model request.
    ///
    /// A non-empty summary leads as a system message, followed by the most
    /// recent messages up to the window size.
    pub async fn history(&self, session_id: &str) -> Vec<ChatMessage> {
        let sessions = self.sessions.read().await;
        let Some(record) = sessions.get(session_id) else {
            return Vec::new();
        };

        let mut history = Vec::new();
        if !record.summary.is_empty() {
            history.push(ChatMessage::system(format!(
                "Previous conversation summary: {}",
                record.summary
            )));
        }

        let start = record
            .messages
            .len()
            .saturating_sub(self.config.max_messages);
        for message in &record.messages[start..] {
            history.push(ChatMessage::new(message.role, message.content.clone()));
        }
        history
    }

    /// Bound a session's history after a completed exchange.
    pub async fn compact(&self, session_id: &str) {
        if self.config.use_summarization && self.summarizer.is_some() {
            self.summarize_and_compact(session_id).await;
        } else {
            self.apply_window(session_id).await;
        }
    }

    /// Drop the oldest messages beyond the window size.
    async fn apply_window(&self, session_id: &str) {
        let mut sessions = self.sessions.write().await;
        let Some(record) = sessions.get_mut(session_id) else {
            return;
        };
        if record.messages.len() > self.config.max_messages {
            let removed = record.messages.len() - self.config.max_messages;
            record.messages.drain(..removed);
            tracing::debug!(session_id, removed, "Sliding window dropped old messages");
        }
    }

    /// Fold older messages into the running summary, keeping the recent
    /// tail verbatim. Falls back to the sliding window when the summary
    /// call fails.
    async fn summarize_and_compact(&self, session_id: &str) {
        let to_summarize = {
            let sessions = self.sessions.read().await;
            let Some(record) = sessions.get(session_id) else {
                return;
            };
            if record.messages.len() <= self.config.summarize_after {
                return;
            }
            let keep_recent = self.config.summarize_after / 2;
            let split = record.messages.len() - keep_recent;
            record.messages[..split]
                .iter()
                .map(|m| ChatMessage::new(m.role, m.content.clone()))
                .collect::<Vec<_>>()
        };

        let summarizer = match &self.summarizer {
            Some(summarizer) => Arc::clone(summarizer),
            None => return,
        };

        match summarizer.summarize(&to_summarize).await {
            Ok(summary) => {
                let mut sessions = self.sessions.write().await;
                let Some(record) = sessions.get_mut(session_id) else {
                    return;
                };
                // History may have grown while the summary call was in
                // flight; only drop the prefix that was summarized.
                let count = to_summarize.len().min(record.messages.len());
                record.messages.drain(..count);
                record.summary = if record.summary.is_empty() {
                    summary
                } else {
                    format!("{}\n\nUpdate: {}", record.summary, summary)
                };
                tracing::info!(
                    session_id,
                    summarized = count,
                    keeping = record.messages.len(),
                    "Compacted history with summary"
                );
            }
            Err(e) => {
                tracing::error!(session_id, error = %e, "Summarization failed, applying window");
                self.apply_window(session_id).await;
            }
        }
    }

    /// Number of stored messages for a session.
    pub async fn message_count(&self, session_id: &str) -> usize {
        let sessions = self.sessions.read().await;
        sessions
            .get(session_id)
            .map_or(0, |record| record.messages.len())
    }

    /// Reset a session's history and summary, keeping the session alive.
    pub async fn clear(&self, session_id: &str) {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(session_id) {
            sessions.insert(session_id.to_string(), SessionRecord::new());
            tracing::info!(session_id, "Memory session reset");
        }
    }

    /// Drop a session entirely.
    pub async fn remove(&self, session_id: &str) {
        let mut sessions = self.sessions.write().await;
        if let Some(record) = sessions.remove(session_id) {
            let age = Utc::now().signed_duration_since(record.created_at);
            tracing::info!(
                session_id,
                messages = record.messages.len(),
                duration_secs = age.num_seconds(),
                "Memory session removed"
            );
        }
    }

    /// Ids of all sessions currently held in memory.
    pub async fn active_sessions(&self) -> Vec<String> {
        let sessions = self.sessions.read().await;
        sessions.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ProviderError, TokenStream};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockSummarizer {
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    impl MockSummarizer {
        fn new(fail: bool) -> (Arc<Self>, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            (
                Arc::new(Self {
                    calls: Arc::clone(&calls),
                    fail,
                }),
                calls,
            )
        }
    }

    #[async_trait]
    impl LanguageModel for MockSummarizer {
        fn name(&self) -> &str {
            "mock"
        }

        async fn generate(&self, _history: &[ChatMessage]) -> Result<String, ProviderError> {
            unimplemented!()
        }

        async fn stream(&self, _history: &[ChatMessage]) -> Result<TokenStream, ProviderError> {
            unimplemented!()
        }

        async fn summarize(&self, history: &[ChatMessage]) -> Result<String, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ProviderError {
                    provider: "mock".into(),
                    message: "summarizer down".into(),
                    status_code: None,
                });
            }
            Ok(format!("summary of {} messages", history.len()))
        }
    }

    fn window_config(max_messages: usize) -> MemoryConfig {
        MemoryConfig {
            max_messages,
            use_summarization: false,
            summarize_after: 15,
        }
    }

    fn summarizing_config(summarize_after: usize) -> MemoryConfig {
        MemoryConfig {
            max_messages: 20,
            use_summarization: true,
            summarize_after,
        }
    }

    async fn fill(memory: &ConversationMemory, session_id: &str, count: usize) {
        for i in 0..count {
            let role = if i % 2 == 0 {
                ChatRole::User
            } else {
                ChatRole::Assistant
            };
            memory.add_message(session_id, role, &format!("message {i}")).await;
        }
    }

    #[tokio::test]
    async fn history_applies_sliding_window() {
        let memory = ConversationMemory::new(window_config(3), None);
        memory.create_session("s1").await;
        fill(&memory, "s1", 5).await;

        let history = memory.history("s1").await;
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].content, "message 2");
        assert_eq!(history[2].content, "message 4");
    }

    #[tokio::test]
    async fn unknown_session_history_is_empty() {
        let memory = ConversationMemory::new(window_config(3), None);
        assert!(memory.history("missing").await.is_empty());
        assert_eq!(memory.message_count("missing").await, 0);
    }

    #[tokio::test]
    async fn window_compaction_bounds_storage() {
        let memory = ConversationMemory::new(window_config(4), None);
        memory.create_session("s1").await;
        fill(&memory, "s1", 7).await;

        memory.compact("s1").await;
        assert_eq!(memory.message_count("s1").await, 4);

        let history = memory.history("s1").await;
        assert_eq!(history[0].content, "message 3");
    }

    #[tokio::test]
    async fn summarization_compacts_and_prepends_summary() {
        let (summarizer, calls) = MockSummarizer::new(false);
        let memory = ConversationMemory::new(summarizing_config(4), Some(summarizer));
        memory.create_session("s1").await;
        fill(&memory, "s1", 6).await;

        memory.compact("s1").await;

        // keep_recent = 4 / 2 = 2, so 4 of 6 messages were summarized
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(memory.message_count("s1").await, 2);

        let history = memory.history("s1").await;
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].role, ChatRole::System);
        assert_eq!(
            history[0].content,
            "Previous conversation summary: summary of 4 messages"
        );
        assert_eq!(history[1].content, "message 4");
    }

    #[tokio::test]
    async fn repeated_summaries_concatenate() {
        let (summarizer, _) = MockSummarizer::new(false);
        let memory = ConversationMemory::new(summarizing_config(4), Some(summarizer));
        memory.create_session("s1").await;

        fill(&memory, "s1", 6).await;
        memory.compact("s1").await;
        fill(&memory, "s1", 4).await;
        memory.compact("s1").await;

        let history = memory.history("s1").await;
        assert!(history[0].content.contains("\n\nUpdate: "));
    }

    #[tokio::test]
    async fn summarization_below_threshold_is_a_noop() {
        let (summarizer, calls) = MockSummarizer::new(false);
        let memory = ConversationMemory::new(summarizing_config(10), Some(summarizer));
        memory.create_session("s1").await;
        fill(&memory, "s1", 4).await;

        memory.compact("s1").await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(memory.message_count("s1").await, 4);
    }

    #[tokio::test]
    async fn failed_summarization_falls_back_to_window() {
        let (summarizer, calls) = MockSummarizer::new(true);
        let mut config = summarizing_config(4);
        config.max_messages = 5;
        let memory = ConversationMemory::new(config, Some(summarizer));
        memory.create_session("s1").await;
        fill(&memory, "s1", 8).await;

        memory.compact("s1").await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        // Window fallback still bounded the history.
        assert_eq!(memory.message_count("s1").await, 5);
        let history = memory.history("s1").await;
        assert_eq!(history[0].content, "message 3");
    }

    #[tokio::test]
    async fn clear_resets_history_but_keeps_session() {
        let memory = ConversationMemory::new(window_config(10), None);
        memory.create_session("s1").await;
        fill(&memory, "s1", 3).await;

        memory.clear("s1").await;
        assert_eq!(memory.message_count("s1").await, 0);
        assert_eq!(memory.active_sessions().await, vec!["s1".to_string()]);

        // Still usable after the reset.
        memory.add_message("s1", ChatRole::User, "fresh start").await;
        assert_eq!(memory.message_count("s1").await, 1);
    }

    #[tokio::test]
    async fn remove_drops_the_session() {
        let memory = ConversationMemory::new(window_config(10), None);
        memory.create_session("s1").await;
        fill(&memory, "s1", 3).await;

        memory.remove("s1").await;
        assert!(memory.active_sessions().await.is_empty());
        assert!(memory.history("s1").await.is_empty());
    }
}
