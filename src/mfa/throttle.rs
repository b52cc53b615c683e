//! Per-IP throttle for failed `TOTP` submissions, derived from the security log.

use crate::audit::AuditEntry;
use chrono::{DateTime, Duration, Utc};

pub const EVENT_VERIFY_SUCCESS: &str = "MFA VERIFY SUCCESS";
pub const EVENT_VERIFY_FAIL: &str = "MFA VERIFY FAIL";
pub const EVENT_SETUP_SUCCESS: &str = "MFA SETUP SUCCESS";
pub const EVENT_SETUP_FAIL: &str = "MFA SETUP FAIL";
pub const EVENT_THROTTLED: &str = "MFA THROTTLED";

#[derive(Clone, Copy, Debug)]
pub struct FailureThrottle {
    limit: usize,
    window: Duration,
}

impl FailureThrottle {
    #[must_use]
    pub fn new(limit: usize, window: Duration) -> Self {
        Self { limit, window }
    }

    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Failures for `ip` inside the window, counted from its most recent success.
    #[must_use]
    pub fn recent_failures(&self, entries: &[AuditEntry], ip: &str, now: DateTime<Utc>) -> usize {
        let since = now - self.window;
        entries
            .iter()
            .filter(|entry| entry.timestamp >= since && entry.has_field("IP", ip))
            .fold(0, |failures, entry| match entry.event.as_str() {
                EVENT_VERIFY_SUCCESS | EVENT_SETUP_SUCCESS => 0,
                EVENT_VERIFY_FAIL | EVENT_SETUP_FAIL => failures + 1,
                _ => failures,
            })
    }

    #[must_use]
    pub fn is_throttled(&self, entries: &[AuditEntry], ip: &str, now: DateTime<Utc>) -> bool {
        self.limit > 0 && self.recent_failures(entries, ip, now) >= self.limit
    }
}
