//! Error types for ldapgate

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to load configuration: {0}")]
    ConfigLoad(String),

    #[error("TLS configuration error: {0}")]
    Tls(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Short machine-readable code, used in structured log fields
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidConfig(_) => "InvalidConfig",
            Error::ConfigLoad(_) => "ConfigLoad",
            Error::Tls(_) => "Tls",
            Error::InternalError(_) | Error::Io(_) => "InternalError",
        }
    }
}
