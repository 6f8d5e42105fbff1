#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A required identifier was missing. Raised before any network call.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    /// The role lookup failed. Nothing is cached, the caller may retry.
    #[error("Role fetch failed: {0}")]
    RoleFetchFailed(String),
    #[error("Avatar fetch failed: {0}")]
    AvatarFetchFailed(String),
    #[error("Encoding failed: {0}")]
    EncodingFailed(String),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Configuration error: {0}")]
    Config(String),
    #[cfg(feature = "http")]
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Backend error during {operation}: status={status:?} {detail}")]
    Backend {
        operation: &'static str,
        status: Option<u16>,
        detail: String,
    },
}
