//! Directory-backed HTTP Basic authentication for ldapgate
//!
//! The [`Engine`] turns the value of an `Authorization` header into an
//! allow/deny [`Verdict`] by validating the credentials against an LDAP
//! directory, either by binding directly as the user or by searching for
//! the user's entry with a service account first.

pub mod authenticator;
pub mod cache;
pub mod credentials;
pub mod directory;
pub mod engine;
pub mod telemetry;

pub use authenticator::Authenticator;
pub use cache::VerdictCache;
pub use credentials::{parse_basic_auth, Credentials};
pub use directory::{Connector, DirectoryError, DirectorySession, LdapConnector};
#[cfg(any(test, feature = "test-util"))]
pub use directory::{MemoryDirectory, MemoryEntry};
pub use engine::{
    DenyReason, Engine, HeaderStatus, LocalReply, PendingVerdict, RequestHeaders, Resume,
    Verdict,
};
