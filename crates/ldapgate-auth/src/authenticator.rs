//! Directory credential checks
//!
//! Two strategies, selected by [`DirectoryConfig::mode`]:
//!
//! - **bind**: bind directly as `attribute=username,base_dn`.
//! - **search**: bind as the service account, find exactly one entry
//!   matching the filter, then bind as that entry's DN on the same
//!   connection.
//!
//! Every failure collapses to `false`. The session is closed on every
//! exit path, including a panic inside the directory client.

use crate::credentials::Credentials;
use crate::directory::{
    connect_authenticated, Connector, DirectoryError, DirectorySession, SearchRequest,
};
use crate::telemetry;
use futures::FutureExt;
use ldapgate_core::{AuthMode, DirectoryConfig, FILTER_PLACEHOLDER};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, warn};

/// Validates credentials against the directory
#[derive(Clone)]
pub struct Authenticator {
    config: Arc<DirectoryConfig>,
    connector: Arc<dyn Connector>,
}

impl Authenticator {
    pub fn new(config: DirectoryConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            config: Arc::new(config),
            connector,
        }
    }

    pub fn config(&self) -> &DirectoryConfig {
        &self.config
    }

    /// Check `credentials`; `true` only when the directory accepted them
    pub async fn authenticate(&self, credentials: &Credentials) -> bool {
        if credentials.password.is_empty() {
            debug!("Rejecting empty password for {:?}", credentials.username);
            return false;
        }

        let mode = self.config.mode();
        let started = Instant::now();

        let allowed = match mode {
            AuthMode::Bind => self.bind_mode(credentials).await,
            AuthMode::Search => self.search_mode(credentials).await,
        };

        telemetry::record_directory_check(mode.as_str(), allowed, started.elapsed());
        allowed
    }

    /// Bind DN for `username` in bind mode
    pub fn user_dn(&self, username: &str) -> String {
        format!(
            "{}={},{}",
            self.config.attribute,
            ldap3::dn_escape(username),
            self.config.base_dn
        )
    }

    /// Search filter for `username` in search mode
    pub fn user_filter(&self, username: &str) -> Option<String> {
        self.config.filter.as_ref().map(|template| {
            template.replacen(FILTER_PLACEHOLDER, &ldap3::ldap_escape(username), 1)
        })
    }

    async fn bind_mode(&self, credentials: &Credentials) -> bool {
        let mut session = match self.connector.connect(&self.config).await {
            Ok(session) => session,
            Err(e) => {
                warn!("Directory connection failed: {}", e);
                return false;
            }
        };

        let dn = self.user_dn(&credentials.username);
        let result = guarded(session.simple_bind(&dn, &credentials.password)).await;
        session.close().await;

        match result {
            Some(Ok(())) => true,
            Some(Err(e)) => {
                debug!("Bind as {:?} rejected: {}", dn, e);
                false
            }
            None => false,
        }
    }

    async fn search_mode(&self, credentials: &Credentials) -> bool {
        let mut session = match connect_authenticated(self.connector.as_ref(), &self.config).await
        {
            Ok(session) => session,
            Err(e) => {
                warn!("Directory service connection failed: {}", e);
                return false;
            }
        };

        let result = guarded(self.search_and_bind(session.as_mut(), credentials)).await;
        session.close().await;

        match result {
            Some(Ok(allowed)) => allowed,
            Some(Err(e)) => {
                debug!("Search for {:?} failed: {}", credentials.username, e);
                false
            }
            None => false,
        }
    }

    async fn search_and_bind(
        &self,
        session: &mut dyn DirectorySession,
        credentials: &Credentials,
    ) -> Result<bool, DirectoryError> {
        let Some(filter) = self.user_filter(&credentials.username) else {
            return Ok(false);
        };

        let request = SearchRequest {
            base_dn: self.config.base_dn.clone(),
            filter,
            attributes: vec![self.config.attribute.clone()],
        };
        debug!("Searching for user with filter: {}", request.filter);

        let entries = session.search(&request).await?;
        if entries.len() != 1 {
            debug!(
                "Expected exactly one entry for {:?}, found {}",
                credentials.username,
                entries.len()
            );
            return Ok(false);
        }

        let dn = &entries[0].dn;
        match session.simple_bind(dn, &credentials.password).await {
            Ok(()) => Ok(true),
            Err(e) => {
                debug!("Bind as {:?} rejected: {}", dn, e);
                Ok(false)
            }
        }
    }
}

/// Run a directory operation, turning a panic into `None`
async fn guarded<F: std::future::Future>(operation: F) -> Option<F::Output> {
    match AssertUnwindSafe(operation).catch_unwind().await {
        Ok(output) => Some(output),
        Err(_) => {
            error!("Directory operation panicked");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{MemoryDirectory, MemoryEntry};
    use ldapgate_core::FilterConfig;

    const BASE_DN: &str = "dc=glauth,dc=com";
    const SERVICE_DN: &str = "cn=serviceuser,ou=svcaccts,dc=glauth,dc=com";

    fn creds(username: &str, password: &str) -> Credentials {
        Credentials {
            username: username.into(),
            password: password.into(),
        }
    }

    fn directory() -> MemoryDirectory {
        MemoryDirectory::new()
            .with_entry(MemoryEntry::new(SERVICE_DN).with_password("mysecret"))
            .with_entry(
                MemoryEntry::new("cn=hackers,dc=glauth,dc=com")
                    .with_password("dogood")
                    .with_attribute("cn", "hackers"),
            )
            .with_entry(
                MemoryEntry::new("cn=hackers,ou=superheros,dc=glauth,dc=com")
                    .with_password("dogood")
                    .with_attribute("cn", "hackers")
                    .with_attribute("ou", "superheros"),
            )
            .with_entry(
                MemoryEntry::new("cn=johndoe,ou=people,dc=glauth,dc=com")
                    .with_password("dogood")
                    .with_attribute("cn", "johndoe"),
            )
    }

    fn bind_authenticator(dir: &MemoryDirectory) -> Authenticator {
        let config = DirectoryConfig::try_from(&FilterConfig {
            host: "localhost".into(),
            port: 3893,
            base_dn: BASE_DN.into(),
            attribute: "cn".into(),
            ..Default::default()
        })
        .unwrap();
        Authenticator::new(config, Arc::new(dir.clone()))
    }

    fn search_authenticator(dir: &MemoryDirectory, filter: &str) -> Authenticator {
        let config = DirectoryConfig::try_from(&FilterConfig {
            host: "localhost".into(),
            port: 3893,
            base_dn: BASE_DN.into(),
            attribute: "cn".into(),
            bind_dn: SERVICE_DN.into(),
            bind_password: "mysecret".into(),
            filter: filter.into(),
            ..Default::default()
        })
        .unwrap();
        Authenticator::new(config, Arc::new(dir.clone()))
    }

    #[test]
    fn test_user_dn_and_filter_are_escaped() {
        let dir = directory();
        let auth = bind_authenticator(&dir);
        assert_eq!(auth.user_dn("hackers"), "cn=hackers,dc=glauth,dc=com");
        let dn = auth.user_dn("evil,ou=admins");
        assert!(dn.starts_with("cn=evil"));
        assert!(dn.ends_with(",dc=glauth,dc=com"));
        assert!(!dn.contains("evil,ou"));
        assert_eq!(auth.user_filter("hackers"), None);

        let auth = search_authenticator(&dir, "(&(objectClass=*)(cn=%s))");
        assert_eq!(
            auth.user_filter("hackers").as_deref(),
            Some("(&(objectClass=*)(cn=hackers))")
        );
        let filter = auth.user_filter("*)(cn=*").unwrap().to_ascii_lowercase();
        assert_eq!(filter, "(&(objectclass=*)(cn=\\2a\\29\\28cn=\\2a))");
    }

    #[tokio::test]
    async fn test_bind_mode() {
        let dir = directory();
        let auth = bind_authenticator(&dir);

        assert!(auth.authenticate(&creds("hackers", "dogood")).await);
        assert!(!auth.authenticate(&creds("hackers", "wrong")).await);
        assert!(!auth.authenticate(&creds("nobody", "dogood")).await);

        assert_eq!(dir.opened(), 3);
        assert_eq!(dir.closed(), 3);
    }

    #[tokio::test]
    async fn test_empty_password_never_reaches_directory() {
        let dir = directory();
        let auth = bind_authenticator(&dir);

        assert!(!auth.authenticate(&creds("hackers", "")).await);
        assert_eq!(dir.opened(), 0);

        let auth = search_authenticator(&dir, "(cn=%s)");
        assert!(!auth.authenticate(&creds("johndoe", "")).await);
        assert_eq!(dir.opened(), 0);
    }

    #[tokio::test]
    async fn test_search_mode_single_match() {
        let dir = directory();
        let auth = search_authenticator(&dir, "(cn=%s)");

        assert!(auth.authenticate(&creds("johndoe", "dogood")).await);
        assert!(!auth.authenticate(&creds("johndoe", "wrong")).await);
        assert!(!auth.authenticate(&creds("nobody", "dogood")).await);

        assert_eq!(dir.opened(), 3);
        assert_eq!(dir.closed(), 3);
    }

    #[tokio::test]
    async fn test_search_mode_multiple_matches_deny() {
        let dir = directory();
        let auth = search_authenticator(&dir, "(cn=%s)");

        // two entries carry cn=hackers
        assert!(!auth.authenticate(&creds("hackers", "dogood")).await);

        let auth = search_authenticator(&dir, "(&(cn=%s)(ou=superheros))");
        assert!(auth.authenticate(&creds("hackers", "dogood")).await);
    }

    #[tokio::test]
    async fn test_search_mode_rejects_injection() {
        let dir = directory();
        let auth = search_authenticator(&dir, "(cn=%s)");

        assert!(!auth.authenticate(&creds("*", "dogood")).await);
        assert!(!auth.authenticate(&creds("john*", "dogood")).await);
    }

    #[tokio::test]
    async fn test_search_mode_service_bind_failure() {
        let dir = directory();
        let config = DirectoryConfig {
            bind_password: "wrong".into(),
            ..search_authenticator(&dir, "(cn=%s)").config().clone()
        };
        let auth = Authenticator::new(config, Arc::new(dir.clone()));

        assert!(!auth.authenticate(&creds("johndoe", "dogood")).await);
        assert_eq!(dir.opened(), 1);
        assert_eq!(dir.closed(), 1);
    }

    #[tokio::test]
    async fn test_connect_failure_denies() {
        let dir = directory();
        dir.fail_connect(true);

        assert!(!bind_authenticator(&dir).authenticate(&creds("hackers", "dogood")).await);
        assert!(!search_authenticator(&dir, "(cn=%s)")
            .authenticate(&creds("johndoe", "dogood"))
            .await);
        assert_eq!(dir.opened(), 0);
    }

    #[tokio::test]
    async fn test_panic_mid_search_denies_and_closes() {
        let dir = directory();
        dir.panic_on_search(true);
        let auth = search_authenticator(&dir, "(cn=%s)");

        assert!(!auth.authenticate(&creds("johndoe", "dogood")).await);
        assert_eq!(dir.opened(), 1);
        assert_eq!(dir.closed(), 1);
    }

    #[tokio::test]
    async fn test_search_error_denies() {
        let dir = directory();
        // the test directory cannot parse OR filters
        let auth = search_authenticator(&dir, "(|(cn=%s)(uid=x))");

        assert!(!auth.authenticate(&creds("johndoe", "dogood")).await);
        assert_eq!(dir.closed(), 1);
    }
}
