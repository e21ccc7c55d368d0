use thiserror::Error;

/// Top-level error type for Privlex configuration and shared plumbing.
///
/// Agent-level failures live in `privlex-agents`; this type covers what every
/// crate shares: loading configuration and (de)serializing it.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PrivlexError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Unknown corpus tag: {0}")]
    UnknownCorpus(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<toml::de::Error> for PrivlexError {
    fn from(err: toml::de::Error) -> Self {
        PrivlexError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for PrivlexError {
    fn from(err: toml::ser::Error) -> Self {
        PrivlexError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for PrivlexError {
    fn from(err: serde_json::Error) -> Self {
        PrivlexError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for Privlex operations.
pub type Result<T> = std::result::Result<T, PrivlexError>;
