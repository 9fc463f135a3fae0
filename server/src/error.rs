//! Worker error types.

use crate::auth::AuthError;
use crate::config::ConfigError;

/// Errors that stop a worker from starting or serving.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Identity provider could not be constructed.
    #[error("identity provider setup failed: {0}")]
    Auth(#[from] AuthError),

    /// Listen address did not resolve.
    #[error("failed to resolve listen address {0}")]
    Resolve(String),

    /// Socket or serve failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
