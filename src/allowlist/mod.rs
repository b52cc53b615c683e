//! IP allowlist: a fixed base set plus addresses persisted at runtime.

use crate::{
    audit::AuditLog,
    storage::{self, StorageError},
};
use chrono::{DateTime, Duration, Utc};
use secrecy::{ExposeSecret, SecretString};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const EVENT_WHITELIST: &str = "WHITELIST";
pub const EVENT_FAIL_PASSWORD: &str = "WHITELIST FAIL PASSWORD";
pub const EVENT_RATE_LIMIT: &str = "WHITELIST RATE LIMIT";

const DEFAULT_SELF_ENROLL_WINDOW_SECONDS: i64 = 60 * 60;

/// Who added an address.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EnrollSource {
    /// Password-gated self-service.
    Page,
    /// Reached the admin surface.
    Admin,
}

impl EnrollSource {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Page => "page",
            Self::Admin => "admin",
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EnrollDecision {
    Enrolled,
    WrongPassword,
    RateLimited,
}

#[derive(Clone, Debug)]
pub struct IpAllowlist {
    base: Vec<String>,
    path: PathBuf,
    log: AuditLog,
    password: SecretString,
    self_enroll_window: Duration,
}

impl IpAllowlist {
    #[must_use]
    pub fn new(base: Vec<String>, path: PathBuf, log: AuditLog, password: SecretString) -> Self {
        Self {
            base,
            path,
            log,
            password,
            self_enroll_window: Duration::seconds(DEFAULT_SELF_ENROLL_WINDOW_SECONDS),
        }
    }

    #[must_use]
    pub fn with_self_enroll_window(mut self, window: Duration) -> Self {
        self.self_enroll_window = window;
        self
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn dynamic(&self) -> Vec<String> {
        storage::read_json_or_default(&self.path)
    }

    /// Base set followed by persisted addresses, without duplicates.
    #[must_use]
    pub fn effective(&self) -> Vec<String> {
        let mut ips = self.base.clone();
        for ip in self.dynamic() {
            if !ips.contains(&ip) {
                ips.push(ip);
            }
        }
        ips
    }

    #[must_use]
    pub fn is_allowed(&self, ip: &str) -> bool {
        let ip = ip.trim();
        if ip.is_empty() {
            return false;
        }
        self.base.iter().any(|base| base == ip)
            || self.dynamic().iter().any(|dynamic| dynamic == ip)
    }

    /// Persist `ip`; returns whether it was newly inserted. Insertions are
    /// written to the whitelist log.
    ///
    /// # Errors
    /// Returns an error if the allowlist or its log cannot be written.
    pub fn add(&self, ip: &str, source: EnrollSource) -> Result<bool, StorageError> {
        self.add_at(ip, source, Utc::now())
    }

    fn add_at(
        &self,
        ip: &str,
        source: EnrollSource,
        now: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        let ip = ip.trim();
        if ip.is_empty() {
            return Ok(false);
        }

        let inserted = storage::update_json(&self.path, |ips: &mut Vec<String>| {
            if ips.iter().any(|existing| existing == ip) {
                (false, false)
            } else {
                ips.push(ip.to_string());
                (true, true)
            }
        })?;

        if inserted {
            self.log.append_at(
                now,
                EVENT_WHITELIST,
                &[("IP", ip), ("SOURCE", source.as_str())],
            )?;
            info!("Allowlisted {ip} (source: {})", source.as_str());
        }
        Ok(inserted)
    }

    /// Password-gated self-enrollment, once per window per address.
    ///
    /// # Errors
    /// Returns an error if the whitelist log or allowlist cannot be accessed.
    pub fn self_enroll(&self, ip: &str, password: &str) -> Result<EnrollDecision, StorageError> {
        self.self_enroll_at(ip, password, Utc::now())
    }

    /// # Errors
    /// See [`IpAllowlist::self_enroll`].
    pub fn self_enroll_at(
        &self,
        ip: &str,
        password: &str,
        now: DateTime<Utc>,
    ) -> Result<EnrollDecision, StorageError> {
        let ip = ip.trim();
        if password != self.password.expose_secret() {
            warn!("Self-enrollment from {ip} with wrong password");
            self.log.append_at(now, EVENT_FAIL_PASSWORD, &[("IP", ip)])?;
            return Ok(EnrollDecision::WrongPassword);
        }

        // Check and append under one lock so two requests cannot both pass.
        let _guard = self.log.lock()?;
        let page = EnrollSource::Page.as_str();
        let recent = self
            .log
            .entries_since(now - self.self_enroll_window)
            .iter()
            .any(|entry| {
                entry.event == EVENT_WHITELIST
                    && entry.has_field("IP", ip)
                    && entry.has_field("SOURCE", page)
            });
        if recent {
            self.log
                .append_at(now, EVENT_RATE_LIMIT, &[("IP", ip), ("SOURCE", page)])?;
            return Ok(EnrollDecision::RateLimited);
        }

        if !self.add_at(ip, EnrollSource::Page, now)? {
            // Already listed; still counts against the window.
            self.log
                .append_at(now, EVENT_WHITELIST, &[("IP", ip), ("SOURCE", page)])?;
        }
        Ok(EnrollDecision::Enrolled)
    }
}
