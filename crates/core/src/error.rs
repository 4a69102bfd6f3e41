//! Error types for the cairn domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each collaborator boundary has its own error enum; the top-level
//! [`Error`] is what a request returns to its caller. Tool and knowledge
//! failures never end a request, so they have no variant there.

use thiserror::Error;

/// The top-level error type for all cairn operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Completion provider errors (terminal for a request) ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// The caller went away before the request finished.
    #[error("Request cancelled")]
    Cancelled,

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Boundary errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

/// Errors from tool providers and the tool gateway.
///
/// Every variant maps onto the `{code, message, retryable}` shape tool
/// providers report, see [`ToolError::code`] and [`ToolError::is_retryable`].
#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Tool provider unavailable: {provider}: {reason}")]
    Unavailable { provider: String, reason: String },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    /// An error reported by the tool provider itself.
    #[error("{code}: {message}")]
    Remote {
        code: String,
        message: String,
        retryable: bool,
    },
}

impl ToolError {
    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::ExecutionFailed { .. } => "execution_failed",
            Self::Timeout { .. } => "timeout",
            Self::Unavailable { .. } => "unavailable",
            Self::InvalidArguments(_) => "invalid_arguments",
            Self::Remote { code, .. } => code,
        }
    }

    /// Whether calling again with the same input could plausibly succeed.
    ///
    /// Timeouts and connection-level failures are retryable; malformed
    /// input and unknown tools are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Unavailable { .. } => true,
            Self::NotFound(_) | Self::InvalidArguments(_) | Self::ExecutionFailed { .. } => false,
            Self::Remote { retryable, .. } => *retryable,
        }
    }

    /// The call itself was wrong (unknown tool, bad arguments). Says nothing
    /// about whether the provider is working.
    pub fn is_caller_fault(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::InvalidArguments(_))
    }
}

#[derive(Debug, Clone, Error)]
pub enum KnowledgeError {
    #[error("Lookup failed: {0}")]
    LookupFailed(String),

    #[error("Lookup timed out after {0}s")]
    Timeout(u64),

    #[error("Storage error: {0}")]
    Storage(String),
}
