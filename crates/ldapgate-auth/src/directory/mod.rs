//! Directory access
//!
//! The authenticator talks to the directory through the [`Connector`] and
//! [`DirectorySession`] traits. [`LdapConnector`] is the production
//! implementation on top of `ldap3`; `MemoryDirectory` is test support,
//! available to other crates with the `test-util` feature.

mod ldap;
#[cfg(any(test, feature = "test-util"))]
mod memory;
mod tls;

pub use ldap::LdapConnector;
#[cfg(any(test, feature = "test-util"))]
pub use memory::{MemoryDirectory, MemoryEntry};
pub use tls::client_config;

use async_trait::async_trait;
use ldapgate_core::DirectoryConfig;
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

/// Errors raised while talking to the directory
#[derive(Error, Debug)]
pub enum DirectoryError {
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("TLS setup failed: {0}")]
    Tls(String),

    #[error("Bind failed: {0}")]
    Bind(String),

    #[error("Search failed: {0}")]
    Search(String),

    #[error("LDAP error: {0}")]
    Ldap(#[from] ldap3::LdapError),
}

/// A subtree search for entries matching `filter`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub base_dn: String,
    pub filter: String,
    pub attributes: Vec<String>,
}

/// One entry returned by a search
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub dn: String,
    pub attributes: HashMap<String, Vec<String>>,
}

/// Opens sessions to a directory server
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a session, applying the transport settings in `config`
    async fn connect(
        &self,
        config: &DirectoryConfig,
    ) -> Result<Box<dyn DirectorySession>, DirectoryError>;
}

/// An open directory session.
///
/// Owners must call [`close`](DirectorySession::close) exactly once when
/// they are done, whatever the outcome of the operations in between.
#[async_trait]
pub trait DirectorySession: Send {
    /// Simple bind; `Ok` only when the server accepted the credentials
    async fn simple_bind(&mut self, dn: &str, password: &str) -> Result<(), DirectoryError>;

    async fn search(&mut self, request: &SearchRequest)
        -> Result<Vec<DirectoryEntry>, DirectoryError>;

    async fn close(&mut self);
}

/// Open a session and bind it with the service account from `config`.
///
/// The session is closed before returning when the service bind fails.
pub async fn connect_authenticated(
    connector: &dyn Connector,
    config: &DirectoryConfig,
) -> Result<Box<dyn DirectorySession>, DirectoryError> {
    let mut session = connector.connect(config).await?;

    if let Err(e) = session.simple_bind(&config.bind_dn, &config.bind_password).await {
        debug!("Service bind as {:?} failed: {}", config.bind_dn, e);
        session.close().await;
        return Err(e);
    }

    Ok(session)
}
