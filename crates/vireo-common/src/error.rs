//! Common error types for Vireo.

use thiserror::Error;

/// Result type alias using Vireo's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for Vireo operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Hardware decoder reported a failure.
    #[error("decoder error: {0}")]
    Decoder(String),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Create a decoder error from any displayable type.
    pub fn decoder(msg: impl std::fmt::Display) -> Self {
        Self::Decoder(msg.to_string())
    }

    /// Create a config error from any displayable type.
    pub fn config(msg: impl std::fmt::Display) -> Self {
        Self::Config(msg.to_string())
    }
}
