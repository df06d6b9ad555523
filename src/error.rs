//! Error types for the mail relay.

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Transport errors from the mail session or the outbound channel.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel {name} failed to start: {reason}")]
    StartupFailed { name: String, reason: String },

    #[error("Channel {name} disconnected: {reason}")]
    Disconnected { name: String, reason: String },

    #[error("Failed to fetch from channel {name}: {reason}")]
    FetchFailed { name: String, reason: String },

    #[error("Failed to send on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("Authentication failed for channel {name}: {reason}")]
    AuthFailed { name: String, reason: String },
}

/// Header or body text could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("Unsupported charset: {0}")]
    UnknownCharset(String),

    #[error("Malformed {charset} bytes in encoded text")]
    Malformed { charset: String },

    #[error("Invalid encoded word: {0}")]
    InvalidEncodedWord(String),
}

/// A single MIME part could not be turned into an attachment.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PartExtractionError {
    #[error("Attachment part ({content_type}) has no filename")]
    MissingFilename { content_type: String },

    #[error("Filename could not be decoded: {0}")]
    Filename(#[from] DecodeError),
}

/// Per-message pipeline errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Message could not be parsed as MIME ({size} bytes)")]
    Unparseable { size: usize },

    #[error("Delivery failed: {0}")]
    Transport(#[from] ChannelError),
}

impl PipelineError {
    /// Transport failures end the current poll cycle; everything else only
    /// skips the message.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

