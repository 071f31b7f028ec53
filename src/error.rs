//! Error types for url-blocker.

use thiserror::Error;

/// Error type for url-blocker operations.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A URL that had to be absolute could not be parsed
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// A subscription feed answered with something unusable
    #[error("feed {url}: {reason}")]
    Feed { url: String, reason: String },

    /// The pattern is already present in the local blacklist
    #[error("pattern already in blacklist: {0}")]
    DuplicatePattern(String),

    /// The subscription source is already registered
    #[error("subscription already exists: {0}")]
    DuplicateSubscription(String),

    /// The subscription source is not registered
    #[error("unknown subscription: {0}")]
    UnknownSubscription(String),

    /// Every rule ID in the allocator range is taken
    #[error("rule ID space exhausted")]
    IdSpaceExhausted,

    /// The rule engine rejected an update batch
    #[error("rule engine rejected update: {0}")]
    Engine(String),

    /// The command channel was torn down before a response arrived
    #[error("command channel closed")]
    ChannelClosed,

    /// No response arrived within the allotted time
    #[error("timed out waiting for response")]
    Timeout,

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type alias for url-blocker operations.
pub type Result<T> = std::result::Result<T, Error>;
