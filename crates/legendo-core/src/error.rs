use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    /// Absent, swept, or failed authentication. Callers cannot tell these apart.
    #[error("entry not found")]
    NotFound,

    #[error("AEAD decryption failed (authentication tag mismatch)")]
    AuthenticationFailure,

    #[error("AEAD encryption failed")]
    Encryption,

    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("payload serialisation: {0}")]
    Serialisation(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CacheError>;
