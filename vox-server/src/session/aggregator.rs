//! Pending-utterance accumulation.

/// Collects finalized transcript fragments into one utterance.
///
/// Fragments arrive in recognition order and are space-joined. The buffer
/// holds them until an utterance-complete signal drains it; what happens
/// to the drained utterance is the session's decision.
#[derive(Debug, Default)]
pub struct UtteranceAggregator {
    buffer: String,
}

impl UtteranceAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a finalized transcript fragment. Whitespace-only fragments
    /// are dropped.
    pub fn append_final(&mut self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        if !self.buffer.is_empty() {
            self.buffer.push(' ');
        }
        self.buffer.push_str(text);
    }

    /// Drain the accumulated utterance.
    ///
    /// Returns `None` when nothing accumulated. Draining is what makes
    /// completion handling idempotent: a duplicate end-of-utterance signal
    /// finds an empty buffer and is a no-op.
    pub fn take(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut self.buffer))
    }

    /// Whether any speech is waiting for dispatch.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}
