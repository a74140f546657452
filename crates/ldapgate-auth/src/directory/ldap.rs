//! `ldap3` backed directory sessions
//!
//! Supports plain LDAP, LDAPS and StartTLS connections.

use super::{tls, Connector, DirectoryEntry, DirectoryError, DirectorySession, SearchRequest};
use async_trait::async_trait;
use ldap3::{DerefAliases, Ldap, LdapConnAsync, LdapConnSettings, Scope, SearchEntry, SearchOptions};
use ldapgate_core::DirectoryConfig;
use rustls::ClientConfig;
use std::sync::Arc;
use tracing::{debug, warn};

/// Connector for a real directory server
pub struct LdapConnector {
    tls_config: Option<Arc<ClientConfig>>,
}

impl LdapConnector {
    /// Prepare a connector for `config`, loading its trusted roots once
    pub fn new(config: &DirectoryConfig) -> Result<Self, DirectoryError> {
        // ldap3 builds its own client config when none is supplied; ignore "already installed"
        let _ = rustls::crypto::ring::default_provider().install_default();

        Ok(Self {
            tls_config: tls::client_config(&config.tls)?,
        })
    }

    fn settings(&self, config: &DirectoryConfig) -> LdapConnSettings {
        let mut settings = LdapConnSettings::new()
            .set_conn_timeout(config.timeout)
            .set_starttls(config.tls.enabled && config.tls.start_tls)
            .set_no_tls_verify(config.tls.insecure_skip_verify);

        if let Some(tls_config) = &self.tls_config {
            settings = settings.set_config(tls_config.clone());
        }

        settings
    }
}

#[async_trait]
impl Connector for LdapConnector {
    async fn connect(
        &self,
        config: &DirectoryConfig,
    ) -> Result<Box<dyn DirectorySession>, DirectoryError> {
        let url = config.url();
        debug!("Connecting to LDAP server: {}", url);

        let (conn, ldap) = LdapConnAsync::with_settings(self.settings(config), &url)
            .await
            .map_err(|e| DirectoryError::Connect(format!("{}: {}", url, e)))?;

        ldap3::drive!(conn);

        Ok(Box::new(LdapSession { ldap, closed: false }))
    }
}

struct LdapSession {
    ldap: Ldap,
    closed: bool,
}

#[async_trait]
impl DirectorySession for LdapSession {
    async fn simple_bind(&mut self, dn: &str, password: &str) -> Result<(), DirectoryError> {
        let result = self.ldap.simple_bind(dn, password).await?;

        if result.rc != 0 {
            return Err(DirectoryError::Bind(format!(
                "rc={} {}",
                result.rc, result.text
            )));
        }

        Ok(())
    }

    async fn search(
        &mut self,
        request: &SearchRequest,
    ) -> Result<Vec<DirectoryEntry>, DirectoryError> {
        let (entries, _) = self
            .ldap
            .with_search_options(SearchOptions::new().deref(DerefAliases::Never))
            .search(
                &request.base_dn,
                Scope::Subtree,
                &request.filter,
                request.attributes.clone(),
            )
            .await?
            .success()
            .map_err(|e| DirectoryError::Search(e.to_string()))?;

        Ok(entries
            .into_iter()
            .map(|entry| {
                let entry = SearchEntry::construct(entry);
                DirectoryEntry {
                    dn: entry.dn,
                    attributes: entry.attrs,
                }
            })
            .collect())
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if let Err(e) = self.ldap.unbind().await {
            warn!("Failed to close LDAP connection: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ldapgate_core::FilterConfig;
    use std::time::Duration;

    fn config(tls: bool) -> DirectoryConfig {
        DirectoryConfig::try_from(&FilterConfig {
            host: "127.0.0.1".into(),
            // nothing listens on the discard port
            port: 9,
            base_dn: "dc=example,dc=com".into(),
            attribute: "cn".into(),
            timeout: 2,
            tls,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_new_without_root_ca() {
        let connector = LdapConnector::new(&config(true)).unwrap();
        assert!(connector.tls_config.is_none());
    }

    #[tokio::test]
    async fn test_connect_refused_is_a_connect_error() {
        let config = config(false);
        let connector = LdapConnector::new(&config).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(10), connector.connect(&config))
            .await
            .unwrap();
        assert!(matches!(result, Err(DirectoryError::Connect(_))));
    }
}
