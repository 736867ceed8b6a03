use thiserror::Error;

/// Top-level failure type crossing every component boundary.
///
/// Nothing in this crate panics across a boundary; fallible operations return
/// `Result<_, CoreError>` and callers decide whether a failure is terminal
/// (sync recovery), skippable (event stream) or surfaced (message sending).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    #[error(transparent)]
    Network(#[from] NetworkFailure),
    #[error(transparent)]
    Storage(#[from] StorageFailure),
    #[error(transparent)]
    Crypto(#[from] CryptoFailure),
    #[error("protocol mismatch for conversation {conversation}: stored protocol is {stored}")]
    ProtocolMismatch {
        conversation: String,
        stored: &'static str,
    },
    #[error("unknown failure: {0}")]
    Unknown(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetworkFailure {
    #[error("no connectivity")]
    NoConnectivity,
    #[error("server miscommunication: {0}")]
    ServerMiscommunication(String),
    #[error("proxy error: {0}")]
    Proxy(String),
    #[error("federated backend failure: {0}")]
    Federation(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageFailure {
    #[error("data not found")]
    NotFound,
    #[error("storage error: {0}")]
    Underlying(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoFailure {
    #[error("no session for the given peer or group")]
    SessionNotFound,
    #[error("message was encrypted for a stale epoch")]
    StaleEpoch,
    #[error("duplicate message, already decrypted")]
    DuplicateMessage,
    #[error("crypto provider error: {0}")]
    Provider(String),
}

impl CoreError {
    /// A transient failure worth retrying at the call site. Everything else
    /// is treated as a definitive rejection.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            CoreError::Network(NetworkFailure::NoConnectivity)
                | CoreError::Network(NetworkFailure::Proxy(_))
        )
    }
}
