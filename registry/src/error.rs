use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Node not found: {0}")]
    NotFound(String),

    #[error("Registry is closed")]
    Closed,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("Unknown registry driver: {0}")]
    UnknownDriver(String),

    #[error("Registry backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Seed error: {0}")]
    Seed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
