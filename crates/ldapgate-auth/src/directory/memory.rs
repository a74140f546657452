//! In-memory directory
//!
//! Answers binds and equality searches from a fixed set of entries, counts
//! opened and closed sessions, and can be told to fail or panic. Test
//! support only; other crates enable it with the `test-util` feature.

use super::{Connector, DirectoryEntry, DirectoryError, DirectorySession, SearchRequest};
use async_trait::async_trait;
use ldapgate_core::DirectoryConfig;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A directory entry with an optional bind password
#[derive(Debug, Clone, Default)]
pub struct MemoryEntry {
    pub dn: String,
    pub password: Option<String>,
    pub attributes: HashMap<String, Vec<String>>,
}

impl MemoryEntry {
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            ..Default::default()
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes
            .entry(name.into())
            .or_default()
            .push(value.into());
        self
    }

    fn values(&self, name: &str) -> Option<&Vec<String>> {
        self.attributes
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, values)| values)
    }

    fn in_subtree(&self, base_dn: &str) -> bool {
        let dn = self.dn.to_ascii_lowercase();
        let base = base_dn.to_ascii_lowercase();
        dn == base || dn.ends_with(&format!(",{}", base))
    }
}

#[derive(Default)]
struct Inner {
    entries: RwLock<Vec<MemoryEntry>>,
    opened: AtomicUsize,
    closed: AtomicUsize,
    fail_connect: AtomicBool,
    panic_on_search: AtomicBool,
    latency: RwLock<Option<Duration>>,
}

/// Shared handle to an in-memory directory; clones see the same state
#[derive(Clone, Default)]
pub struct MemoryDirectory {
    inner: Arc<Inner>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(self, entry: MemoryEntry) -> Self {
        self.insert(entry);
        self
    }

    pub fn insert(&self, entry: MemoryEntry) {
        self.inner.entries.write().push(entry);
    }

    /// Sessions opened so far
    pub fn opened(&self) -> usize {
        self.inner.opened.load(Ordering::SeqCst)
    }

    /// Sessions closed so far
    pub fn closed(&self) -> usize {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Refuse new connections
    pub fn fail_connect(&self, fail: bool) {
        self.inner.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// Panic inside every search
    pub fn panic_on_search(&self, panic: bool) {
        self.inner.panic_on_search.store(panic, Ordering::SeqCst);
    }

    /// Delay every connect by `latency`
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.inner.latency.write() = latency;
    }
}

#[async_trait]
impl Connector for MemoryDirectory {
    async fn connect(
        &self,
        _config: &DirectoryConfig,
    ) -> Result<Box<dyn DirectorySession>, DirectoryError> {
        let latency = *self.inner.latency.read();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        if self.inner.fail_connect.load(Ordering::SeqCst) {
            return Err(DirectoryError::Connect("connection refused".into()));
        }

        self.inner.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemorySession {
            inner: self.inner.clone(),
            closed: false,
        }))
    }
}

struct MemorySession {
    inner: Arc<Inner>,
    closed: bool,
}

#[async_trait]
impl DirectorySession for MemorySession {
    async fn simple_bind(&mut self, dn: &str, password: &str) -> Result<(), DirectoryError> {
        // Anonymous and unauthenticated binds succeed, as on most servers
        if password.is_empty() {
            return Ok(());
        }

        let entries = self.inner.entries.read();
        let accepted = entries.iter().any(|entry| {
            entry.dn.eq_ignore_ascii_case(dn) && entry.password.as_deref() == Some(password)
        });

        if accepted {
            Ok(())
        } else {
            Err(DirectoryError::Bind("rc=49 invalid credentials".into()))
        }
    }

    async fn search(
        &mut self,
        request: &SearchRequest,
    ) -> Result<Vec<DirectoryEntry>, DirectoryError> {
        if self.inner.panic_on_search.load(Ordering::SeqCst) {
            panic!("search panicked");
        }

        let filter = Filter::parse(&request.filter)
            .ok_or_else(|| DirectoryError::Search(format!("bad filter {}", request.filter)))?;

        let entries = self.inner.entries.read();
        Ok(entries
            .iter()
            .filter(|entry| entry.in_subtree(&request.base_dn) && filter.matches(entry))
            .map(|entry| DirectoryEntry {
                dn: entry.dn.clone(),
                attributes: entry
                    .attributes
                    .iter()
                    .filter(|(name, _)| {
                        request.attributes.is_empty()
                            || request
                                .attributes
                                .iter()
                                .any(|wanted| wanted.eq_ignore_ascii_case(name))
                    })
                    .map(|(name, values)| (name.clone(), values.clone()))
                    .collect(),
            })
            .collect())
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.inner.closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Equality, presence and `&` filters
#[derive(Debug, PartialEq)]
enum Filter {
    And(Vec<Filter>),
    Present(String),
    Equal(String, String),
}

impl Filter {
    fn parse(input: &str) -> Option<Filter> {
        let body = input.strip_prefix('(')?.strip_suffix(')')?;

        if let Some(rest) = body.strip_prefix('&') {
            return split_components(rest)?
                .into_iter()
                .map(Filter::parse)
                .collect::<Option<Vec<_>>>()
                .map(Filter::And);
        }

        let (attr, value) = body.split_once('=')?;
        let valid_attr = |c: char| c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == ';';
        if attr.is_empty() || !attr.chars().all(valid_attr) {
            return None;
        }
        if value == "*" {
            return Some(Filter::Present(attr.to_string()));
        }
        Some(Filter::Equal(attr.to_string(), unescape(value)?))
    }

    fn matches(&self, entry: &MemoryEntry) -> bool {
        match self {
            Filter::And(parts) => parts.iter().all(|part| part.matches(entry)),
            Filter::Present(attr) => entry.values(attr).is_some_and(|v| !v.is_empty()),
            Filter::Equal(attr, value) => entry
                .values(attr)
                .is_some_and(|values| values.iter().any(|v| v.eq_ignore_ascii_case(value))),
        }
    }
}

fn split_components(input: &str) -> Option<Vec<&str>> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;

    for (i, c) in input.char_indices() {
        match c {
            '(' => {
                if depth == 0 {
                    start = i;
                }
                depth += 1;
            }
            ')' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    parts.push(&input[start..=i]);
                }
            }
            _ if depth == 0 => return None,
            _ => {}
        }
    }

    (depth == 0 && !parts.is_empty()).then_some(parts)
}

/// Decode RFC 4515 `\XX` escapes
fn unescape(value: &str) -> Option<String> {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'\\' {
            let hex = value.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }

    String::from_utf8(out).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory() -> MemoryDirectory {
        MemoryDirectory::new()
            .with_entry(
                MemoryEntry::new("cn=hackers,ou=superheros,dc=glauth,dc=com")
                    .with_password("dogood")
                    .with_attribute("cn", "hackers")
                    .with_attribute("objectClass", "posixAccount"),
            )
            .with_entry(
                MemoryEntry::new("cn=a*b,ou=people,dc=glauth,dc=com")
                    .with_attribute("cn", "a*b"),
            )
    }

    fn request(filter: &str) -> SearchRequest {
        SearchRequest {
            base_dn: "dc=glauth,dc=com".into(),
            filter: filter.into(),
            attributes: vec!["cn".into()],
        }
    }

    async fn session(dir: &MemoryDirectory) -> Box<dyn DirectorySession> {
        let config = DirectoryConfig::try_from(&ldapgate_core::FilterConfig {
            host: "memory".into(),
            base_dn: "dc=glauth,dc=com".into(),
            attribute: "cn".into(),
            ..Default::default()
        })
        .unwrap();
        dir.connect(&config).await.unwrap()
    }

    #[test]
    fn test_parse_filters() {
        assert_eq!(
            Filter::parse("(cn=x)"),
            Some(Filter::Equal("cn".into(), "x".into()))
        );
        assert_eq!(
            Filter::parse("(&(objectClass=*)(cn=a\\2ab))"),
            Some(Filter::And(vec![
                Filter::Present("objectClass".into()),
                Filter::Equal("cn".into(), "a*b".into()),
            ]))
        );
        assert_eq!(Filter::parse("cn=x"), None);
        assert_eq!(Filter::parse("(&(cn=x)junk)"), None);
        assert_eq!(Filter::parse("(cn=\\zz)"), None);
        assert_eq!(Filter::parse("(|(cn=x)(uid=y))"), None);
    }

    #[tokio::test]
    async fn test_bind() {
        let dir = directory();
        let mut session = session(&dir).await;

        assert!(session
            .simple_bind("cn=hackers,ou=superheros,dc=glauth,dc=com", "dogood")
            .await
            .is_ok());
        assert!(session
            .simple_bind("cn=hackers,ou=superheros,dc=glauth,dc=com", "wrong")
            .await
            .is_err());
        // unauthenticated bind
        assert!(session
            .simple_bind("cn=hackers,ou=superheros,dc=glauth,dc=com", "")
            .await
            .is_ok());
        session.close().await;
    }

    #[tokio::test]
    async fn test_search() {
        let dir = directory();
        let mut session = session(&dir).await;

        let found = session.search(&request("(cn=hackers)")).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].dn, "cn=hackers,ou=superheros,dc=glauth,dc=com");
        assert!(found[0].attributes.contains_key("cn"));
        assert!(!found[0].attributes.contains_key("objectClass"));

        // an escaped asterisk is a literal, not a wildcard
        let found = session.search(&request("(cn=a\\2ab)")).await.unwrap();
        assert_eq!(found.len(), 1);

        let found = session.search(&request("(cn=*)")).await.unwrap();
        assert_eq!(found.len(), 2);

        let mut outside = request("(cn=hackers)");
        outside.base_dn = "dc=other,dc=com".into();
        assert!(session.search(&outside).await.unwrap().is_empty());

        session.close().await;
    }

    #[tokio::test]
    async fn test_counts_sessions_once() {
        let dir = directory();
        let mut session = session(&dir).await;
        session.close().await;
        session.close().await;

        assert_eq!(dir.opened(), 1);
        assert_eq!(dir.closed(), 1);
    }
}
