//! ldapgate Core Library
//!
//! Configuration records and the shared error type for the ldapgate
//! directory-backed Basic authentication gateway.

pub mod config;
pub mod error;

pub use config::{
    AuthMode, DirectoryConfig, FilterConfig, GatewayConfig, LoggingConfig, RouteConfig,
    ServerConfig, TlsSettings,
};
pub use error::{Error, Result};

/// ldapgate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Connect timeout used when the configuration leaves it unset or zero (seconds)
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Default port for plain and StartTLS directory connections
pub const DEFAULT_LDAP_PORT: u16 = 389;

/// Default port for implicit TLS directory connections
pub const DEFAULT_LDAPS_PORT: u16 = 636;

/// Placeholder substituted with the username in search filters
pub const FILTER_PLACEHOLDER: &str = "%s";
