//! Raw directory filter configuration
//!
//! This is the decoded-but-unvalidated record. Every field is optional at
//! decode time; [`DirectoryConfig::try_from`](super::DirectoryConfig) does
//! the validation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Directory filter configuration as written by the operator
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Directory server host name
    pub host: String,

    /// Directory server port (0 selects 389, or 636 for implicit TLS)
    pub port: u16,

    /// Base DN for bind DNs and searches
    /// Example: "dc=example,dc=com"
    #[serde(alias = "baseDn", alias = "baseDN")]
    pub base_dn: String,

    /// Attribute used to build bind DNs and requested on searches
    /// Example: "cn" or "uid"
    pub attribute: String,

    /// Service account DN, search mode only
    #[serde(alias = "bindDn", alias = "bindDN")]
    pub bind_dn: String,

    /// Service account password, search mode only
    #[serde(alias = "bindPassword")]
    pub bind_password: String,

    /// Search filter with a single `%s` placeholder for the username.
    /// Setting it switches the engine to search mode.
    /// Example: "(&(objectClass=inetOrgPerson)(uid=%s))"
    pub filter: String,

    /// Verdict cache TTL in seconds (0 disables the cache)
    #[serde(alias = "cacheTTL", alias = "cacheTtl")]
    pub cache_ttl: u64,

    /// Connect timeout in seconds (0 selects the default of 60)
    pub timeout: u64,

    /// Use a secure transport
    pub tls: bool,

    /// Upgrade a plain connection with StartTLS instead of implicit TLS
    #[serde(alias = "startTLS", alias = "startTls")]
    pub start_tls: bool,

    /// Skip server certificate verification (not recommended for production)
    #[serde(alias = "insecureSkipVerify")]
    pub insecure_skip_verify: bool,

    /// PEM bundle of trusted root certificates for the directory server
    #[serde(alias = "rootCA", alias = "rootCa")]
    pub root_ca: String,
}

impl fmt::Debug for FilterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("base_dn", &self.base_dn)
            .field("attribute", &self.attribute)
            .field("bind_dn", &self.bind_dn)
            .field("bind_password", &redacted(&self.bind_password))
            .field("filter", &self.filter)
            .field("cache_ttl", &self.cache_ttl)
            .field("timeout", &self.timeout)
            .field("tls", &self.tls)
            .field("start_tls", &self.start_tls)
            .field("insecure_skip_verify", &self.insecure_skip_verify)
            .field("root_ca", &if self.root_ca.is_empty() { "" } else { "<pem>" })
            .finish()
    }
}

pub(crate) fn redacted(secret: &str) -> &'static str {
    if secret.is_empty() {
        ""
    } else {
        "<redacted>"
    }
}

impl FilterConfig {
    /// Merge a child record over this one.
    ///
    /// Non-empty strings and non-zero numbers in `child` win. Booleans are
    /// OR-ed: a child `true` turns a flag on, a child `false` never turns a
    /// parent `true` off.
    pub fn merge(&self, child: &FilterConfig) -> FilterConfig {
        FilterConfig {
            host: pick_str(&self.host, &child.host),
            port: pick_num(self.port, child.port),
            base_dn: pick_str(&self.base_dn, &child.base_dn),
            attribute: pick_str(&self.attribute, &child.attribute),
            bind_dn: pick_str(&self.bind_dn, &child.bind_dn),
            bind_password: pick_str(&self.bind_password, &child.bind_password),
            filter: pick_str(&self.filter, &child.filter),
            cache_ttl: pick_num(self.cache_ttl, child.cache_ttl),
            timeout: pick_num(self.timeout, child.timeout),
            tls: self.tls || child.tls,
            start_tls: self.start_tls || child.start_tls,
            insecure_skip_verify: self.insecure_skip_verify || child.insecure_skip_verify,
            root_ca: pick_str(&self.root_ca, &child.root_ca),
        }
    }

    /// Verdict cache TTL, `None` when caching is disabled
    pub fn cache_ttl(&self) -> Option<Duration> {
        (self.cache_ttl > 0).then(|| Duration::from_secs(self.cache_ttl))
    }
}

fn pick_str(parent: &str, child: &str) -> String {
    if child.is_empty() {
        parent.to_string()
    } else {
        child.to_string()
    }
}

fn pick_num<T: Copy + Default + PartialEq>(parent: T, child: T) -> T {
    if child == T::default() {
        parent
    } else {
        child
    }
}
