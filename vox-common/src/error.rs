//! Error types for the Vox services.

use thiserror::Error;

/// Result type alias using the Vox error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for Vox services.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input or request
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Speech recognition collaborator failure
    #[error("Speech recognition error: {0}")]
    Stt(String),

    /// Speech synthesis collaborator failure
    #[error("Speech synthesis error: {0}")]
    Tts(String),

    /// Language model collaborator failure
    #[error("Language model error: {0}")]
    Model(String),

    /// Client transport failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Session state lookup failure
    #[error("Unknown session: {0}")]
    UnknownSession(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Channel send error
    #[error("Channel send error")]
    ChannelSend,

    /// Timeout error
    #[error("Operation timed out")]
    Timeout,

    /// Other error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create an error with additional context.
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Whether the session can keep running after this error.
    ///
    /// Collaborator failures degrade a single turn. Transport and channel
    /// failures mean the client is gone and the session must be torn down.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Stt(_)
            | Self::Tts(_)
            | Self::Model(_)
            | Self::InvalidInput(_)
            | Self::Timeout => true,
            Self::WithContext { source, .. } => source.is_recoverable(),
            _ => false,
        }
    }

    /// Check if this error originated in a collaborator call.
    pub const fn is_collaborator(&self) -> bool {
        matches!(self, Self::Stt(_) | Self::Tts(_) | Self::Model(_))
    }
}

/// Extension trait for adding context to any error type.
pub trait ResultExt<T> {
    /// Add context to an error.
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_context(context))
    }
}
