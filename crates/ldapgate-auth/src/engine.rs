//! Authentication engine
//!
//! Turns the `Authorization` header of a request into a [`Verdict`]:
//!
//! 1. no header: deny with "no Authorization"
//! 2. header cached as recently allowed: allow without touching the directory
//! 3. not HTTP Basic: deny with "invalid Authorization format"
//! 4. rejected by the directory: deny with "invalid username or password"
//! 5. otherwise cache the header (when enabled) and allow
//!
//! Hosts drive the engine through [`Engine::on_request_headers`], which
//! never blocks: it answers cache hits straight away and hands back a
//! [`PendingVerdict`] for everything else.

use crate::authenticator::Authenticator;
use crate::cache::VerdictCache;
use crate::credentials::parse_basic_auth;
use crate::directory::{Connector, DirectoryError, LdapConnector};
use crate::telemetry;
use http::{HeaderMap, StatusCode};
use ldapgate_core::{DirectoryConfig, FilterConfig};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::BuildHasher;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument};

const AUTHORIZATION: &str = "authorization";
const DETAILS: &str = "bad-request";

/// Why a request was denied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DenyReason {
    NoAuthorization,
    InvalidFormat,
    InvalidCredentials,
}

impl DenyReason {
    /// Message sent back to the client
    pub fn as_str(&self) -> &'static str {
        match self {
            DenyReason::NoAuthorization => "no Authorization",
            DenyReason::InvalidFormat => "invalid Authorization format",
            DenyReason::InvalidCredentials => "invalid username or password",
        }
    }

    /// Metric label
    pub fn label(&self) -> &'static str {
        match self {
            DenyReason::NoAuthorization => "no_authorization",
            DenyReason::InvalidFormat => "invalid_format",
            DenyReason::InvalidCredentials => "invalid_credentials",
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Deny(DenyReason),
}

impl Verdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Verdict::Allow)
    }
}

/// Immediate answer from [`Engine::on_request_headers`]
#[derive(Debug)]
pub enum HeaderStatus {
    /// Allowed without I/O; let the request through
    Continue,
    /// Directory check in flight; await the verdict
    Pending(PendingVerdict),
}

/// How the host should resume a request once the verdict is known
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resume {
    Continue,
    Terminate(LocalReply),
}

/// Response sent in place of the upstream one for a denied request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalReply {
    pub status: StatusCode,
    pub body: String,
    pub headers: HashMap<String, String>,
    pub details: &'static str,
}

impl LocalReply {
    /// 401 for `reason`, with a Basic challenge when `realm` is set
    pub fn unauthorized(reason: DenyReason, realm: Option<&str>) -> Self {
        let mut headers = HashMap::new();
        if let Some(realm) = realm {
            headers.insert(
                "www-authenticate".to_string(),
                format!("Basic realm=\"{}\"", realm.replace('"', "")),
            );
        }

        Self {
            status: StatusCode::UNAUTHORIZED,
            body: reason.as_str().to_string(),
            headers,
            details: DETAILS,
        }
    }
}

/// Case-insensitive request header lookup
pub trait RequestHeaders {
    fn header(&self, name: &str) -> Option<String>;
}

impl RequestHeaders for HeaderMap {
    fn header(&self, name: &str) -> Option<String> {
        self.get(name.to_ascii_lowercase().as_str())
            .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
    }
}

impl<S: BuildHasher> RequestHeaders for HashMap<String, String, S> {
    fn header(&self, name: &str) -> Option<String> {
        self.iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.clone())
    }
}

/// Verdict of a directory check running on its own task.
///
/// The check runs to completion even if this handle is dropped.
#[derive(Debug)]
pub struct PendingVerdict {
    handle: JoinHandle<Resume>,
    realm: Option<String>,
}

impl Future for PendingVerdict {
    type Output = Resume;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Resume> {
        let joined = ready!(Pin::new(&mut self.handle).poll(cx));

        Poll::Ready(joined.unwrap_or_else(|e| {
            error!("Authentication task failed: {}", e);
            Resume::Terminate(LocalReply::unauthorized(
                DenyReason::InvalidCredentials,
                self.realm.as_deref(),
            ))
        }))
    }
}

/// Per-route authentication engine
pub struct Engine {
    authenticator: Authenticator,
    cache: Option<VerdictCache>,
    realm: Option<String>,
}

impl Engine {
    /// Engine backed by a real directory server
    pub fn new(
        config: DirectoryConfig,
        cache_ttl: Option<Duration>,
    ) -> Result<Self, DirectoryError> {
        let connector = LdapConnector::new(&config)?;
        Ok(Self::with_connector(config, Arc::new(connector), cache_ttl))
    }

    /// Validate `raw` and build an engine for it
    pub fn from_config(raw: &FilterConfig) -> ldapgate_core::Result<Self> {
        let config = DirectoryConfig::try_from(raw)?;
        Self::new(config, raw.cache_ttl())
            .map_err(|e| ldapgate_core::Error::Tls(e.to_string()))
    }

    pub fn with_connector(
        config: DirectoryConfig,
        connector: Arc<dyn Connector>,
        cache_ttl: Option<Duration>,
    ) -> Self {
        info!(
            "Directory {} in {} mode, cache {}",
            config.url(),
            config.mode().as_str(),
            cache_ttl.map_or("disabled".to_string(), |ttl| format!("{:?}", ttl))
        );

        Self {
            authenticator: Authenticator::new(config, connector),
            cache: cache_ttl.map(VerdictCache::new),
            realm: None,
        }
    }

    /// Advertise `realm` in the challenge of every denial
    pub fn with_realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = Some(realm.into());
        self
    }

    pub fn config(&self) -> &DirectoryConfig {
        self.authenticator.config()
    }

    pub fn cache(&self) -> Option<&VerdictCache> {
        self.cache.as_ref()
    }

    pub fn realm(&self) -> Option<&str> {
        self.realm.as_deref()
    }

    /// Decide on a request given its raw `Authorization` header value
    #[instrument(skip(self, header), fields(mode = self.config().mode().as_str()))]
    pub async fn authenticate(&self, header: Option<&str>) -> Verdict {
        if header.is_some_and(|raw| self.cached(raw)) {
            return finish(Verdict::Allow);
        }
        self.verify(header).await
    }

    /// Start deciding on a request.
    ///
    /// Must be called from within a tokio runtime.
    pub fn on_request_headers<H>(self: &Arc<Self>, headers: &H) -> HeaderStatus
    where
        H: RequestHeaders + ?Sized,
    {
        let header = headers.header(AUTHORIZATION);

        if header.as_deref().is_some_and(|raw| self.cached(raw)) {
            finish(Verdict::Allow);
            return HeaderStatus::Continue;
        }

        let engine = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let verdict = engine.verify(header.as_deref()).await;
            engine.resume(verdict)
        });

        HeaderStatus::Pending(PendingVerdict {
            handle,
            realm: self.realm.clone(),
        })
    }

    /// Map a verdict to what the host should do with the request
    pub fn resume(&self, verdict: Verdict) -> Resume {
        match verdict {
            Verdict::Allow => Resume::Continue,
            Verdict::Deny(reason) => {
                Resume::Terminate(LocalReply::unauthorized(reason, self.realm.as_deref()))
            }
        }
    }

    fn cached(&self, raw: &str) -> bool {
        let Some(cache) = &self.cache else {
            return false;
        };
        let hit = cache.lookup(raw);
        telemetry::record_cache_lookup(hit);
        if hit {
            debug!("Verdict cache hit");
        }
        hit
    }

    async fn verify(&self, header: Option<&str>) -> Verdict {
        let Some(raw) = header else {
            return finish(Verdict::Deny(DenyReason::NoAuthorization));
        };

        let Some(credentials) = parse_basic_auth(raw) else {
            return finish(Verdict::Deny(DenyReason::InvalidFormat));
        };

        if !self.authenticator.authenticate(&credentials).await {
            debug!("Directory rejected {:?}", credentials.username);
            return finish(Verdict::Deny(DenyReason::InvalidCredentials));
        }

        if let Some(cache) = &self.cache {
            cache.store(raw);
        }
        debug!("Directory accepted {:?}", credentials.username);
        finish(Verdict::Allow)
    }
}

fn finish(verdict: Verdict) -> Verdict {
    match verdict {
        Verdict::Allow => telemetry::record_verdict("allow", "ok"),
        Verdict::Deny(reason) => telemetry::record_verdict("deny", reason.label()),
    }
    verdict
}
