use thiserror::Error;

/// A convenience `Result` alias using [`UbosError`].
pub type UbosResult<T> = Result<T, UbosError>;

/// Top-level error type for the orchestration crates.
///
/// Agent-level failures (`InvalidInput`, `Provider`) are normally converted
/// into a failed `AgentResult` at the agent boundary; structural failures
/// (`Configuration`) propagate and abort a plan run. Resource exhaustion is
/// not an error: the resource manager reports it as a `false` allocation.
#[derive(Error, Debug)]
pub enum UbosError {
    /// Malformed `run` options, e.g. a missing or non-string `input`.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A plan or agent spec that cannot be executed as written.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A completion provider or other external collaborator failed.
    #[error("Provider error: {0}")]
    Provider(String),

    /// Message bus delivery or request/reply failure.
    #[error("Bus error: {0}")]
    Bus(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
