//! Unified error types for the Xcatcher client

use thiserror::Error;

/// Reasons a payment/task handshake ends in the Failed state
///
/// Carried by the orchestrator's `Failed` state, so it stays `Clone + Eq`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandshakeFailure {
    #[error("missing payment_required_b64/payment_required in response details")]
    MissingChallenge,

    #[error("payment_required missing quote_id")]
    MissingQuote,

    #[error("invalid settlement network '{0}': must be base|solana")]
    InvalidNetwork(String),

    #[error("payment evidence unavailable: {0}")]
    EvidenceUnavailable(String),

    #[error("x402_topup failed: {code}")]
    TopupFailed { code: String },

    #[error("create_crawl_task still failed after topup: {code}")]
    RetryFailed { code: String },

    #[error("create_crawl_task failed (not PAYMENT_REQUIRED): {code}")]
    CreateFailed { code: String },

    #[error("missing task_id")]
    MissingTaskId,

    #[error("timeout waiting for result of task {task_id} after {waited_secs}s")]
    Timeout { task_id: String, waited_secs: u64 },

    #[error("failed to get download_url")]
    MissingDownloadUrl,

    #[error("invalid handshake transition: {0}")]
    InvalidTransition(String),
}

impl HandshakeFailure {
    /// Process exit code for this failure
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::MissingChallenge => 3,
            Self::InvalidNetwork(_) => 4,
            Self::TopupFailed { .. } => 5,
            Self::RetryFailed { .. } => 6,
            Self::CreateFailed { .. } => 7,
            Self::MissingTaskId => 8,
            Self::Timeout { .. } => 9,
            Self::MissingDownloadUrl => 10,
            Self::MissingQuote => 13,
            Self::EvidenceUnavailable(_) => 15,
            Self::InvalidTransition(_) => 1,
        }
    }
}

/// Unified error type for all Xcatcher client operations
#[derive(Error, Debug)]
pub enum XcatError {
    // Configuration errors
    #[error("missing env XCAT_API_KEY")]
    MissingApiKey,

    #[error("Invalid configuration: {0}")]
    Config(String),

    // Tool discovery errors
    #[error("tool list empty; server returned no tools")]
    NoTools,

    #[error("Missing tool: {name}. Available: {available:?}")]
    MissingTool { name: String, available: Vec<String> },

    // Protocol errors
    #[error(transparent)]
    Handshake(#[from] HandshakeFailure),

    // Transport errors
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("MCP error {code}: {message}")]
    Rpc { code: i64, message: String },

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(String),
}

impl XcatError {
    /// Process exit code, distinct per failure condition
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::MissingApiKey => 2,
            Self::NoTools => 11,
            Self::MissingTool { .. } => 12,
            Self::Handshake(failure) => failure.exit_code(),
            Self::Transport(_) | Self::Rpc { .. } => 14,
            Self::Config(_) => 16,
            Self::Io(_) | Self::Serialization(_) | Self::Other(_) => 1,
        }
    }
}

/// Result type alias using XcatError
pub type Result<T> = std::result::Result<T, XcatError>;
