use thiserror::Error;

pub type SealResult<T> = Result<T, SealError>;

#[derive(Debug, Error)]
pub enum SealError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("stream ended without terminal marker")]
    MissingTerminal,

    #[error("extra data after terminal marker")]
    TrailingData,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("metadata record too large: {size} bytes (limit {limit})")]
    MetadataTooLarge { size: usize, limit: usize },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Coarse failure category surfaced to callers of a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The plaintext source or a local sink failed.
    Source,
    /// A tag did not verify; no plaintext was released.
    Authentication,
    /// The ciphertext stream or the remote replied with an unexpected shape.
    Protocol,
    /// Connection failures and non-success responses.
    Transport,
    /// Everything raised before any data moved (keys, config, sealing).
    Setup,
}

impl SealError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SealError::Io(_) => ErrorKind::Source,
            SealError::Authentication(_) => ErrorKind::Authentication,
            SealError::MissingTerminal | SealError::TrailingData | SealError::Protocol(_) => {
                ErrorKind::Protocol
            }
            SealError::Transport(_) => ErrorKind::Transport,
            SealError::Crypto(_)
            | SealError::MetadataTooLarge { .. }
            | SealError::InvalidKey(_)
            | SealError::Config(_)
            | SealError::Other(_) => ErrorKind::Setup,
        }
    }
}
