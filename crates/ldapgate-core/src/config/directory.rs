//! Validated directory configuration
//!
//! [`DirectoryConfig`] is what the authentication engine consumes. It is
//! built once from a [`FilterConfig`] and never changes afterwards.

use super::filter::{redacted, FilterConfig};
use crate::{Error, Result};
use crate::{DEFAULT_LDAPS_PORT, DEFAULT_LDAP_PORT, DEFAULT_TIMEOUT_SECS, FILTER_PLACEHOLDER};
use std::fmt;
use std::time::Duration;
use tracing::warn;

/// Authentication strategy, derived from whether a search filter is set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// Bind directly as `attribute=username,base_dn`
    Bind,
    /// Find the user's DN with the service account, then bind as it
    Search,
}

impl AuthMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMode::Bind => "bind",
            AuthMode::Search => "search",
        }
    }
}

/// Secure transport settings for the directory connection
#[derive(Clone, Default, PartialEq, Eq)]
pub struct TlsSettings {
    pub enabled: bool,
    pub start_tls: bool,
    pub insecure_skip_verify: bool,
    /// PEM bundle of trusted roots; `None` uses the default trust store
    pub root_ca: Option<String>,
}

impl fmt::Debug for TlsSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsSettings")
            .field("enabled", &self.enabled)
            .field("start_tls", &self.start_tls)
            .field("insecure_skip_verify", &self.insecure_skip_verify)
            .field("root_ca", &self.root_ca.as_ref().map(|_| "<pem>"))
            .finish()
    }
}

/// Validated, immutable directory configuration
#[derive(Clone, PartialEq, Eq)]
pub struct DirectoryConfig {
    pub host: String,
    pub port: u16,
    pub base_dn: String,
    pub attribute: String,
    pub bind_dn: String,
    pub bind_password: String,
    /// Search filter template; `None` means bind mode
    pub filter: Option<String>,
    /// Bound on each connection attempt
    pub timeout: Duration,
    pub tls: TlsSettings,
}

impl fmt::Debug for DirectoryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectoryConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("base_dn", &self.base_dn)
            .field("attribute", &self.attribute)
            .field("bind_dn", &self.bind_dn)
            .field("bind_password", &redacted(&self.bind_password))
            .field("filter", &self.filter)
            .field("timeout", &self.timeout)
            .field("tls", &self.tls)
            .finish()
    }
}

impl DirectoryConfig {
    /// Strategy selected by this configuration
    pub fn mode(&self) -> AuthMode {
        if self.filter.is_some() {
            AuthMode::Search
        } else {
            AuthMode::Bind
        }
    }

    /// Implicit TLS is requested (as opposed to plain or StartTLS)
    pub fn implicit_tls(&self) -> bool {
        self.tls.enabled && !self.tls.start_tls
    }

    /// Connection URL, `ldaps://` for implicit TLS and `ldap://` otherwise
    pub fn url(&self) -> String {
        let scheme = if self.implicit_tls() { "ldaps" } else { "ldap" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }
}

impl TryFrom<&FilterConfig> for DirectoryConfig {
    type Error = Error;

    fn try_from(raw: &FilterConfig) -> Result<Self> {
        if raw.host.is_empty() {
            return Err(Error::InvalidConfig("host is required".into()));
        }
        if raw.base_dn.is_empty() {
            return Err(Error::InvalidConfig("base_dn is required".into()));
        }
        if raw.attribute.is_empty() {
            return Err(Error::InvalidConfig("attribute is required".into()));
        }

        let filter = if raw.filter.is_empty() {
            None
        } else {
            let placeholders = raw.filter.matches(FILTER_PLACEHOLDER).count();
            if placeholders != 1 {
                return Err(Error::InvalidConfig(format!(
                    "filter must contain exactly one {} placeholder, found {}",
                    FILTER_PLACEHOLDER, placeholders
                )));
            }
            if raw.bind_dn.is_empty() {
                warn!("search filter set without bind_dn, searches will use an anonymous bind");
            }
            Some(raw.filter.clone())
        };

        let tls = tls_settings(raw)?;

        let port = match raw.port {
            0 if tls.enabled && !tls.start_tls => DEFAULT_LDAPS_PORT,
            0 => DEFAULT_LDAP_PORT,
            port => port,
        };

        let timeout = match raw.timeout {
            0 => DEFAULT_TIMEOUT_SECS,
            secs => secs,
        };

        Ok(Self {
            host: raw.host.clone(),
            port,
            base_dn: raw.base_dn.clone(),
            attribute: raw.attribute.clone(),
            bind_dn: raw.bind_dn.clone(),
            bind_password: raw.bind_password.clone(),
            filter,
            timeout: Duration::from_secs(timeout),
            tls,
        })
    }
}

fn tls_settings(raw: &FilterConfig) -> Result<TlsSettings> {
    if !raw.tls {
        if raw.start_tls || raw.insecure_skip_verify || !raw.root_ca.is_empty() {
            warn!("start_tls, insecure_skip_verify and root_ca are ignored while tls is disabled");
        }
        return Ok(TlsSettings::default());
    }

    let root_ca = if raw.root_ca.trim().is_empty() {
        None
    } else {
        let count = count_pem_certificates(&raw.root_ca)?;
        if count == 0 {
            return Err(Error::Tls(
                "root_ca does not contain any PEM certificate".into(),
            ));
        }
        Some(raw.root_ca.clone())
    };

    if raw.insecure_skip_verify {
        warn!("directory certificate verification is disabled");
    }

    Ok(TlsSettings {
        enabled: true,
        start_tls: raw.start_tls,
        insecure_skip_verify: raw.insecure_skip_verify,
        root_ca,
    })
}

/// Count the certificates in a PEM bundle
pub fn count_pem_certificates(pem: &str) -> Result<usize> {
    let mut reader = pem.as_bytes();
    let mut count = 0;
    for cert in rustls_pemfile::certs(&mut reader) {
        cert.map_err(|e| Error::Tls(format!("Failed to parse root_ca: {}", e)))?;
        count += 1;
    }
    Ok(count)
}
