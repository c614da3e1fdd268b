use thiserror::Error;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("sample timeout")]
    Timeout,
    #[error("host transport error: {0}")]
    Transport(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, HostError>;
