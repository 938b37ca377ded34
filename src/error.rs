use thiserror::Error;

/// Errors surfaced by channel construction and the readiness loop.
#[derive(Debug, Error)]
pub enum Error {
    #[error("socket I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid link specification {0:?}, expected LOCAL+REMOTE")]
    InvalidLinkSpec(String),

    #[error("invalid socket address: {0}")]
    InvalidAddress(String),
}

pub type Result<T> = std::result::Result<T, Error>;
