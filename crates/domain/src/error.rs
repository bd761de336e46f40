/// Shared error type used across all conclave crates.
///
/// Variants map directly onto the orchestrator's error taxonomy; gateway-layer
/// code is responsible for translating these into JSON-RPC error codes or
/// HTTP statuses, never the other way around.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("transient: {0}")]
    Transient(String),

    #[error("slow consumer disconnected")]
    SlowConsumer,

    #[error("fatal: {0}")]
    Fatal(String),

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config: {0}")]
    Config(String),
}

impl Error {
    /// Short machine-stable tag, used for log fields and JSON-RPC code mapping.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Conflict(_) => "conflict",
            Error::NotFound(_) => "not_found",
            Error::InvalidArgument(_) => "invalid_argument",
            Error::Transient(_) => "transient",
            Error::SlowConsumer => "slow_consumer",
            Error::Fatal(_) => "fatal",
            Error::Io(_) => "io",
            Error::Json(_) => "json",
            Error::Config(_) => "config",
        }
    }

    /// Whether a caller may usefully retry the same operation with the same
    /// `clientRequestId`.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transient(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
