use thiserror::Error;

/// Errors surfaced by the work feed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeedError {
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("LRP not found: {0}")]
    LrpNotFound(String),

    #[error("Task {guid} is {actual}, expected {expected}")]
    StateMismatch {
        guid: String,
        expected: String,
        actual: String,
    },

    #[error("Item already desired: {0}")]
    AlreadyDesired(String),

    #[error("Presence lease for {0} was lost")]
    PresenceLost(String),

    #[error("Watch fell behind the feed by {0} events")]
    WatchLagged(u64),

    #[error("Feed call timed out")]
    Timeout,

    #[error("Feed unavailable: {0}")]
    Unavailable(String),
}

/// Errors surfaced by the execution agent client.
#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("Executor request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Executor request timed out")]
    Timeout,

    #[error("Executor rejected request with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Invalid executor response: {0}")]
    InvalidResponse(String),

    #[error("Invalid executor URL: {0}")]
    InvalidUrl(String),
}

/// Errors decoding the opaque metadata carried through the executor.
#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("Metadata is not a task document: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Unsupported metadata version {0}")]
    UnsupportedVersion(u32),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("A stack must be specified")]
    MissingStack,

    #[error("Presence TTL ({ttl_ms}ms) must exceed the heartbeat interval ({interval_ms}ms)")]
    TtlTooShort { ttl_ms: u128, interval_ms: u128 },

    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),

    #[error("Invalid executor URL: {0}")]
    InvalidExecutorUrl(String),
}

#[derive(Error, Debug)]
pub enum RepError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Executor error: {0}")]
    Executor(#[from] ExecutorError),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, RepError>;
