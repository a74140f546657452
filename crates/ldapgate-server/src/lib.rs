//! HTTP adapter for ldapgate
//!
//! Serves an `auth_request`-style check endpoint guarded by the
//! [`ldap_auth`] middleware, plus health and Prometheus metrics endpoints.

pub mod metrics;
pub mod middleware;
pub mod server;

pub use metrics::MetricsRecorder;
pub use middleware::{ldap_auth, EngineRoutes};
pub use server::{router, AppState, GatewayServer};
