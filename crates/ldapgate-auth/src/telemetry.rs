//! Authentication metrics
//!
//! Emitted through the `metrics` facade; nothing is recorded until the
//! host process installs a recorder.

use metrics::{counter, histogram};
use std::time::Duration;

/// Metric names
pub mod names {
    pub const VERDICTS_TOTAL: &str = "ldapgate_verdicts_total";
    pub const CACHE_HITS_TOTAL: &str = "ldapgate_cache_hits_total";
    pub const CACHE_MISSES_TOTAL: &str = "ldapgate_cache_misses_total";
    pub const DIRECTORY_DURATION_SECONDS: &str = "ldapgate_directory_duration_seconds";
}

pub(crate) fn record_verdict(outcome: &'static str, reason: &'static str) {
    counter!(names::VERDICTS_TOTAL, "outcome" => outcome, "reason" => reason).increment(1);
}

pub(crate) fn record_cache_lookup(hit: bool) {
    if hit {
        counter!(names::CACHE_HITS_TOTAL).increment(1);
    } else {
        counter!(names::CACHE_MISSES_TOTAL).increment(1);
    }
}

pub(crate) fn record_directory_check(mode: &'static str, allowed: bool, elapsed: Duration) {
    let result = if allowed { "allow" } else { "deny" };
    histogram!(names::DIRECTORY_DURATION_SECONDS, "mode" => mode, "result" => result)
        .record(elapsed.as_secs_f64());
}
