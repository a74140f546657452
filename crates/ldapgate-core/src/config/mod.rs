//! Configuration for ldapgate

mod directory;
mod filter;

pub use directory::{count_pem_certificates, AuthMode, DirectoryConfig, TlsSettings};
pub use filter::FilterConfig;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Directory settings shared by every route
    #[serde(default)]
    pub ldap: FilterConfig,

    /// Path prefixes with their own directory settings, merged over `ldap`
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
}

impl GatewayConfig {
    pub fn from_file(path: &str) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::ConfigLoad(format!("Failed to read config: {}", e)))?;

        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> crate::Result<Self> {
        toml::from_str(content)
            .map_err(|e| crate::Error::ConfigLoad(format!("Failed to parse config: {}", e)))
    }

    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Override fields from `LDAPGATE_*` environment variables
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Override fields from `LDAPGATE_*` variables resolved by `lookup`.
    ///
    /// Unparseable numbers are ignored. Flags are set by `true`, `1` or `yes`
    /// and, like merged route flags, never turned off.
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let flag = |key: &str| {
            lookup(key)
                .is_some_and(|v| matches!(v.to_ascii_lowercase().as_str(), "true" | "1" | "yes"))
        };

        if let Some(addr) = lookup("LDAPGATE_BIND_ADDRESS") {
            self.server.bind_address = addr;
        }
        if let Some(p) = lookup("LDAPGATE_PORT").and_then(|v| v.parse().ok()) {
            self.server.port = p;
        }
        if let Some(realm) = lookup("LDAPGATE_REALM") {
            self.server.realm = realm;
        }
        if let Some(level) = lookup("LDAPGATE_LOG_LEVEL") {
            self.logging.level = level;
        }

        // Directory from environment
        if let Some(host) = lookup("LDAPGATE_LDAP_HOST") {
            self.ldap.host = host;
        }
        if let Some(p) = lookup("LDAPGATE_LDAP_PORT").and_then(|v| v.parse().ok()) {
            self.ldap.port = p;
        }
        if let Some(base_dn) = lookup("LDAPGATE_LDAP_BASE_DN") {
            self.ldap.base_dn = base_dn;
        }
        if let Some(attribute) = lookup("LDAPGATE_LDAP_ATTRIBUTE") {
            self.ldap.attribute = attribute;
        }
        if let Some(bind_dn) = lookup("LDAPGATE_LDAP_BIND_DN") {
            self.ldap.bind_dn = bind_dn;
        }
        if let Some(password) = lookup("LDAPGATE_LDAP_BIND_PASSWORD") {
            self.ldap.bind_password = password;
        }
        if let Some(filter) = lookup("LDAPGATE_LDAP_FILTER") {
            self.ldap.filter = filter;
        }
        if let Some(ttl) = lookup("LDAPGATE_LDAP_CACHE_TTL").and_then(|v| v.parse().ok()) {
            self.ldap.cache_ttl = ttl;
        }
        if let Some(timeout) = lookup("LDAPGATE_LDAP_TIMEOUT").and_then(|v| v.parse().ok()) {
            self.ldap.timeout = timeout;
        }
        if let Some(root_ca) = lookup("LDAPGATE_LDAP_ROOT_CA") {
            self.ldap.root_ca = root_ca;
        }
        if flag("LDAPGATE_LDAP_TLS") {
            self.ldap.tls = true;
        }
        if flag("LDAPGATE_LDAP_START_TLS") {
            self.ldap.start_tls = true;
        }
        if flag("LDAPGATE_LDAP_INSECURE_SKIP_VERIFY") {
            self.ldap.insecure_skip_verify = true;
        }
    }

    /// Effective directory settings for each route, in declaration order
    pub fn route_filters(&self) -> Vec<(String, FilterConfig)> {
        self.routes
            .iter()
            .map(|route| (route.prefix.clone(), self.ldap.merge(&route.ldap)))
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    /// Realm advertised in `WWW-Authenticate` challenges
    pub realm: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 10000,
            realm: "ldapgate".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    /// "pretty" or "json"
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

/// Directory settings for requests whose path starts with `prefix`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    pub prefix: String,
    #[serde(default)]
    pub ldap: FilterConfig,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
        [server]
        bind_address = "127.0.0.1"
        port = 8080
        realm = "corp"

        [logging]
        level = "debug"
        format = "json"

        [ldap]
        host = "ldap.example.com"
        port = 389
        base_dn = "dc=example,dc=com"
        attribute = "cn"
        cache_ttl = 30

        [[routes]]
        prefix = "/admin"

        [routes.ldap]
        bind_dn = "cn=svc,dc=example,dc=com"
        bind_password = "secret"
        filter = "(&(cn=%s)(memberOf=cn=admins,dc=example,dc=com))"
    "#;

    #[test]
    fn test_parse_gateway_config() {
        let config = GatewayConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.realm, "corp");
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.ldap.host, "ldap.example.com");
        assert_eq!(config.routes.len(), 1);
    }

    #[test]
    fn test_route_filters_merge_over_parent() {
        let config = GatewayConfig::from_toml_str(SAMPLE).unwrap();
        let routes = config.route_filters();
        let (prefix, filter) = &routes[0];
        assert_eq!(prefix, "/admin");
        assert_eq!(filter.host, "ldap.example.com");
        assert_eq!(filter.cache_ttl, 30);
        assert_eq!(filter.bind_dn, "cn=svc,dc=example,dc=com");

        let directory = DirectoryConfig::try_from(filter).unwrap();
        assert_eq!(directory.mode(), AuthMode::Search);
    }

    #[test]
    fn test_defaults_for_missing_sections() {
        let config = GatewayConfig::from_toml_str("").unwrap();
        assert_eq!(config.server.bind_address, "0.0.0.0");
        assert_eq!(config.server.port, 10000);
        assert_eq!(config.logging.level, "info");
        assert!(config.routes.is_empty());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = GatewayConfig::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.ldap.base_dn, "dc=example,dc=com");
    }

    #[test]
    fn test_env_overrides() {
        let env = std::collections::HashMap::from([
            ("LDAPGATE_PORT", "9000"),
            ("LDAPGATE_LDAP_HOST", "ldap.internal"),
            ("LDAPGATE_LDAP_CACHE_TTL", "120"),
            ("LDAPGATE_LDAP_TIMEOUT", "not-a-number"),
            ("LDAPGATE_LDAP_START_TLS", "true"),
            ("LDAPGATE_LDAP_INSECURE_SKIP_VERIFY", "1"),
            ("LDAPGATE_LDAP_TLS", "false"),
            ("LDAPGATE_LDAP_ROOT_CA", "-----BEGIN CERTIFICATE-----"),
        ]);

        let mut config = GatewayConfig::from_toml_str(SAMPLE).unwrap();
        config.ldap.timeout = 5;
        config.apply_env_from(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.realm, "corp");
        assert_eq!(config.ldap.host, "ldap.internal");
        assert_eq!(config.ldap.cache_ttl, 120);
        assert_eq!(config.ldap.timeout, 5);
        assert!(config.ldap.start_tls);
        assert!(config.ldap.insecure_skip_verify);
        assert!(!config.ldap.tls);
        assert_eq!(config.ldap.root_ca, "-----BEGIN CERTIFICATE-----");
        assert_eq!(config.ldap.cache_ttl(), Some(std::time::Duration::from_secs(120)));
    }

    #[test]
    fn test_from_file_errors() {
        let err = GatewayConfig::from_file("/nonexistent/ldapgate.toml").unwrap_err();
        assert!(matches!(err, crate::Error::ConfigLoad(_)));

        let err = GatewayConfig::from_toml_str("[server]\nport = \"high\"").unwrap_err();
        assert!(matches!(err, crate::Error::ConfigLoad(_)));
    }
}
