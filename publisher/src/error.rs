use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Registry error: {0}")]
    Registry(#[from] svc_registry::Error),

    #[error("Publish failed ({path}): {source}")]
    Publish {
        path: String,
        #[source]
        source: svc_registry::Error,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}
