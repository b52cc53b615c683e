//! Multi-factor authentication (MFA) gate for admin operations.
//!
//! Flow Overview:
//! 1) With no secret enrolled, every gated request is sent to setup.
//! 2) Setup generates a secret held in the session until the first valid code
//!    confirms it; confirmation saves the secret and marks the session.
//! 3) Once enrolled, a session passes the gate for `max_age` seconds after its
//!    last successful verification.
//!
//! Security boundaries:
//! - An enrolled secret is never shown again; replacing it needs a verified session.
//! - Failed codes are written to the security log and throttled per IP.

pub mod throttle;

use crate::{
    audit::AuditLog,
    storage::StorageError,
    totp::{self, SecretStore},
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use throttle::{
    FailureThrottle, EVENT_SETUP_FAIL, EVENT_SETUP_SUCCESS, EVENT_THROTTLED, EVENT_VERIFY_FAIL,
    EVENT_VERIFY_SUCCESS,
};
use tracing::{info, warn};
use utoipa::ToSchema;

const DEFAULT_MAX_AGE_SECONDS: i64 = 60 * 60;
const DEFAULT_FAILURE_LIMIT: usize = 5;
const DEFAULT_FAILURE_WINDOW_SECONDS: i64 = 15 * 60;

pub const SETUP_PATH: &str = "/v1/mfa/setup/start";
pub const VERIFY_PATH: &str = "/v1/mfa/verify";

#[derive(Debug, thiserror::Error)]
pub enum MfaError {
    #[error("MFA is already configured; verify before re-enrolling")]
    VerificationRequired,
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Per-session MFA state.
#[derive(Clone, Default)]
pub struct SessionState {
    /// Unix seconds of the last successful verification.
    pub mfa_passed_at: Option<i64>,
    /// Secret generated by setup and not yet confirmed.
    pub pending_secret: Option<String>,
}

impl fmt::Debug for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionState")
            .field("mfa_passed_at", &self.mfa_passed_at)
            .field(
                "pending_secret",
                &self.pending_secret.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum MfaState {
    Unconfigured,
    ConfiguredUnverified,
    ConfiguredVerified,
}

impl MfaState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unconfigured => "unconfigured",
            Self::ConfiguredUnverified => "configured_unverified",
            Self::ConfiguredVerified => "configured_verified",
        }
    }
}

/// Outcome of the gate for a protected operation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum MfaDecision {
    Allow,
    RedirectToSetup,
    RedirectToVerify { redirect: String },
}

impl MfaDecision {
    /// `Location` for a challenge; `None` when the request may proceed.
    #[must_use]
    pub fn location(&self) -> Option<String> {
        match self {
            Self::Allow => None,
            Self::RedirectToSetup => Some(SETUP_PATH.to_string()),
            Self::RedirectToVerify { redirect } => {
                let encoded: String =
                    url::form_urlencoded::byte_serialize(redirect.as_bytes()).collect();
                Some(format!("{VERIFY_PATH}?redirect={encoded}"))
            }
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Enrollment {
    pub secret: String,
    pub otpauth_uri: String,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EnrollmentOutcome {
    Confirmed,
    InvalidCode,
    NoPendingEnrollment,
    Throttled,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum VerifyOutcome {
    Verified,
    InvalidCode,
    NotConfigured,
    Throttled,
}

#[derive(Clone, Debug)]
pub struct MfaConfig {
    max_age_seconds: i64,
    reset_on_reenroll: bool,
    failure_limit: usize,
    failure_window_seconds: i64,
    issuer: String,
    account: String,
}

impl Default for MfaConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl MfaConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_age_seconds: DEFAULT_MAX_AGE_SECONDS,
            reset_on_reenroll: false,
            failure_limit: DEFAULT_FAILURE_LIMIT,
            failure_window_seconds: DEFAULT_FAILURE_WINDOW_SECONDS,
            issuer: "SecureUploadAdmin".to_string(),
            account: "admin@yourdomain".to_string(),
        }
    }

    #[must_use]
    pub fn with_max_age_seconds(mut self, seconds: i64) -> Self {
        self.max_age_seconds = seconds;
        self
    }

    /// Treat passes granted before the current secret was saved as expired.
    #[must_use]
    pub fn with_reset_on_reenroll(mut self, reset: bool) -> Self {
        self.reset_on_reenroll = reset;
        self
    }

    #[must_use]
    pub fn with_failure_limit(mut self, limit: usize, window_seconds: i64) -> Self {
        self.failure_limit = limit;
        self.failure_window_seconds = window_seconds;
        self
    }

    #[must_use]
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = issuer.into();
        self
    }

    #[must_use]
    pub fn with_account(mut self, account: impl Into<String>) -> Self {
        self.account = account.into();
        self
    }

    #[must_use]
    pub fn max_age_seconds(&self) -> i64 {
        self.max_age_seconds
    }

    #[must_use]
    pub fn reset_on_reenroll(&self) -> bool {
        self.reset_on_reenroll
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    #[must_use]
    pub fn account(&self) -> &str {
        &self.account
    }

    fn throttle(&self) -> FailureThrottle {
        FailureThrottle::new(
            self.failure_limit,
            Duration::seconds(self.failure_window_seconds),
        )
    }
}

#[derive(Clone, Debug)]
pub struct MfaSession {
    secrets: SecretStore,
    security_log: AuditLog,
    config: MfaConfig,
}

impl MfaSession {
    #[must_use]
    pub fn new(secrets: SecretStore, security_log: AuditLog, config: MfaConfig) -> Self {
        Self {
            secrets,
            security_log,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &MfaConfig {
        &self.config
    }

    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.secrets.is_configured()
    }

    pub fn state(&self, session: &mut SessionState) -> MfaState {
        self.state_at(session, Utc::now())
    }

    pub fn state_at(&self, session: &mut SessionState, now: DateTime<Utc>) -> MfaState {
        if !self.is_configured() {
            MfaState::Unconfigured
        } else if self.is_verified_at(session, now) {
            MfaState::ConfiguredVerified
        } else {
            MfaState::ConfiguredUnverified
        }
    }

    /// Whether the session holds a live pass. An expired pass is cleared.
    pub fn is_verified(&self, session: &mut SessionState) -> bool {
        self.is_verified_at(session, Utc::now())
    }

    pub fn is_verified_at(&self, session: &mut SessionState, now: DateTime<Utc>) -> bool {
        let Some(secret) = self.secrets.get() else {
            return false;
        };
        let Some(passed_at) = session.mfa_passed_at else {
            return false;
        };

        let expired = now.timestamp() - passed_at > self.config.max_age_seconds;
        let superseded =
            self.config.reset_on_reenroll && passed_at < secret.created_at().timestamp();
        if expired || superseded {
            session.mfa_passed_at = None;
            return false;
        }
        true
    }

    pub fn mark_verified(&self, session: &mut SessionState) {
        self.mark_verified_at(session, Utc::now());
    }

    pub fn mark_verified_at(&self, session: &mut SessionState, now: DateTime<Utc>) {
        session.mfa_passed_at = Some(now.timestamp());
    }

    /// Gate a protected operation; `target` is where verification returns to.
    pub fn require_or_challenge(&self, session: &mut SessionState, target: &str) -> MfaDecision {
        self.require_or_challenge_at(session, target, Utc::now())
    }

    pub fn require_or_challenge_at(
        &self,
        session: &mut SessionState,
        target: &str,
        now: DateTime<Utc>,
    ) -> MfaDecision {
        match self.state_at(session, now) {
            MfaState::Unconfigured => MfaDecision::RedirectToSetup,
            MfaState::ConfiguredUnverified => MfaDecision::RedirectToVerify {
                redirect: target.to_string(),
            },
            MfaState::ConfiguredVerified => MfaDecision::Allow,
        }
    }

    /// Start (or resume) enrollment, returning the pending secret.
    ///
    /// # Errors
    /// Returns [`MfaError::VerificationRequired`] when a secret is already
    /// enrolled and the session has no live pass.
    pub fn begin_enrollment(&self, session: &mut SessionState) -> Result<Enrollment, MfaError> {
        self.begin_enrollment_at(session, Utc::now())
    }

    /// # Errors
    /// See [`MfaSession::begin_enrollment`].
    pub fn begin_enrollment_at(
        &self,
        session: &mut SessionState,
        now: DateTime<Utc>,
    ) -> Result<Enrollment, MfaError> {
        if self.state_at(session, now) == MfaState::ConfiguredUnverified {
            return Err(MfaError::VerificationRequired);
        }

        let secret = session
            .pending_secret
            .get_or_insert_with(totp::generate_secret)
            .clone();
        let otpauth_uri = totp::otpauth_uri(&self.config.issuer, &self.config.account, &secret);
        Ok(Enrollment {
            secret,
            otpauth_uri,
        })
    }

    /// Confirm the pending secret with a first code and persist it.
    ///
    /// # Errors
    /// Returns an error if re-enrollment is attempted without a live pass, or
    /// if the security log or secret store cannot be written.
    pub fn confirm_enrollment(
        &self,
        session: &mut SessionState,
        ip: &str,
        code: &str,
    ) -> Result<EnrollmentOutcome, MfaError> {
        self.confirm_enrollment_at(session, ip, code, Utc::now())
    }

    /// # Errors
    /// See [`MfaSession::confirm_enrollment`].
    pub fn confirm_enrollment_at(
        &self,
        session: &mut SessionState,
        ip: &str,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<EnrollmentOutcome, MfaError> {
        if self.state_at(session, now) == MfaState::ConfiguredUnverified {
            return Err(MfaError::VerificationRequired);
        }
        let Some(pending) = session.pending_secret.clone() else {
            return Ok(EnrollmentOutcome::NoPendingEnrollment);
        };

        let _guard = self.security_log.lock()?;
        // Another session may have enrolled since the first check.
        if self.state_at(session, now) == MfaState::ConfiguredUnverified {
            return Err(MfaError::VerificationRequired);
        }
        if self.throttled(ip, now)? {
            return Ok(EnrollmentOutcome::Throttled);
        }

        if totp::verify_at(
            &pending,
            code,
            totp::engine::DEFAULT_WINDOW,
            totp::engine::step_at(now.timestamp()),
        ) {
            self.secrets.save_at(&pending, now)?;
            session.pending_secret = None;
            self.mark_verified_at(session, now);
            self.security_log
                .append_at(now, EVENT_SETUP_SUCCESS, &[("IP", ip)])?;
            info!("MFA enrollment confirmed from {ip}");
            Ok(EnrollmentOutcome::Confirmed)
        } else {
            self.security_log
                .append_at(now, EVENT_SETUP_FAIL, &[("IP", ip)])?;
            Ok(EnrollmentOutcome::InvalidCode)
        }
    }

    /// Check a code against the enrolled secret and mark the session on success.
    ///
    /// # Errors
    /// Returns an error if the security log cannot be locked or written.
    pub fn verify_code(
        &self,
        session: &mut SessionState,
        ip: &str,
        code: &str,
    ) -> Result<VerifyOutcome, MfaError> {
        self.verify_code_at(session, ip, code, Utc::now())
    }

    /// # Errors
    /// See [`MfaSession::verify_code`].
    pub fn verify_code_at(
        &self,
        session: &mut SessionState,
        ip: &str,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<VerifyOutcome, MfaError> {
        let Some(secret) = self.secrets.get() else {
            return Ok(VerifyOutcome::NotConfigured);
        };

        let _guard = self.security_log.lock()?;
        if self.throttled(ip, now)? {
            return Ok(VerifyOutcome::Throttled);
        }

        if totp::verify_at(
            secret.secret(),
            code,
            totp::engine::DEFAULT_WINDOW,
            totp::engine::step_at(now.timestamp()),
        ) {
            self.mark_verified_at(session, now);
            self.security_log
                .append_at(now, EVENT_VERIFY_SUCCESS, &[("IP", ip)])?;
            Ok(VerifyOutcome::Verified)
        } else {
            self.security_log
                .append_at(now, EVENT_VERIFY_FAIL, &[("IP", ip)])?;
            Ok(VerifyOutcome::InvalidCode)
        }
    }

    // Caller holds the security log lock.
    fn throttled(&self, ip: &str, now: DateTime<Utc>) -> Result<bool, MfaError> {
        let throttle = self.config.throttle();
        let entries = self.security_log.entries_since(now - throttle.window());
        if !throttle.is_throttled(&entries, ip, now) {
            return Ok(false);
        }
        warn!("Refusing MFA attempt from {ip}: too many recent failures");
        self.security_log
            .append_at(now, EVENT_THROTTLED, &[("IP", ip)])?;
        Ok(true)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::totp::engine::{format_code, generate, step_at};
    use chrono::TimeZone;

    struct Fixture {
        _dir: tempfile::TempDir,
        mfa: MfaSession,
        secrets: SecretStore,
        security_log: AuditLog,
    }

    fn fixture(config: MfaConfig) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let secrets = SecretStore::new(dir.path().join("data/mfa_secret.json"));
        let security_log = AuditLog::new(dir.path().join("logs/security.log"));
        let mfa = MfaSession::new(secrets.clone(), security_log.clone(), config);
        Fixture {
            _dir: dir,
            mfa,
            secrets,
            security_log,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 4, 9, 0, 0).unwrap()
    }

    fn code_for(secret: &str, at: DateTime<Utc>) -> String {
        format_code(generate(secret, step_at(at.timestamp())).unwrap())
    }

    #[test]
    fn unconfigured_redirects_to_setup() {
        let fx = fixture(MfaConfig::new());
        let mut session = SessionState::default();
        assert_eq!(fx.mfa.state_at(&mut session, now()), MfaState::Unconfigured);

        let decision = fx.mfa.require_or_challenge_at(&mut session, "/v1/admin/files", now());
        assert_eq!(decision, MfaDecision::RedirectToSetup);
        assert_eq!(decision.location().as_deref(), Some(SETUP_PATH));
    }

    #[test]
    fn configured_without_pass_redirects_to_verify() {
        let fx = fixture(MfaConfig::new());
        fx.secrets.save_at("JBSWY3DPEHPK3PXP", now()).unwrap();
        let mut session = SessionState::default();

        let decision =
            fx.mfa
                .require_or_challenge_at(&mut session, "/v1/admin/files?dir=uploads", now());
        assert_eq!(
            decision,
            MfaDecision::RedirectToVerify {
                redirect: "/v1/admin/files?dir=uploads".to_string()
            }
        );
        assert_eq!(
            decision.location().as_deref(),
            Some("/v1/mfa/verify?redirect=%2Fv1%2Fadmin%2Ffiles%3Fdir%3Duploads")
        );
    }

    #[test]
    fn pass_expires_after_max_age_and_is_cleared() {
        let fx = fixture(MfaConfig::new());
        fx.secrets.save_at("JBSWY3DPEHPK3PXP", now()).unwrap();
        let mut session = SessionState::default();
        fx.mfa.mark_verified_at(&mut session, now());

        assert!(fx.mfa.is_verified_at(&mut session, now() + Duration::seconds(3600)));
        assert!(!fx.mfa.is_verified_at(&mut session, now() + Duration::seconds(3601)));
        assert_eq!(session.mfa_passed_at, None);
    }

    #[test]
    fn pass_is_void_without_a_secret() {
        let fx = fixture(MfaConfig::new());
        let mut session = SessionState::default();
        fx.mfa.mark_verified_at(&mut session, now());
        assert!(!fx.mfa.is_verified_at(&mut session, now()));
    }

    #[test]
    fn second_enrollment_cannot_overwrite_a_confirmed_secret() {
        let fx = fixture(MfaConfig::new());
        let mut first = SessionState::default();
        let mut second = SessionState::default();
        let first_secret = fx.mfa.begin_enrollment_at(&mut first, now()).unwrap().secret;
        let second_secret = fx.mfa.begin_enrollment_at(&mut second, now()).unwrap().secret;

        let outcome = fx
            .mfa
            .confirm_enrollment_at(&mut first, "10.0.0.1", &code_for(&first_secret, now()), now())
            .unwrap();
        assert_eq!(outcome, EnrollmentOutcome::Confirmed);

        let result = fx.mfa.confirm_enrollment_at(
            &mut second,
            "10.0.0.2",
            &code_for(&second_secret, now()),
            now(),
        );
        assert!(matches!(result, Err(MfaError::VerificationRequired)));
        assert_eq!(fx.secrets.get().unwrap().secret(), first_secret);
    }

    #[test]
    fn enrollment_waiting_on_the_lock_rechecks_configuration() {
        let fx = fixture(MfaConfig::new());
        let mut first = SessionState::default();
        let mut second = SessionState::default();
        let first_secret = fx.mfa.begin_enrollment_at(&mut first, now()).unwrap().secret;
        let second_secret = fx.mfa.begin_enrollment_at(&mut second, now()).unwrap().secret;
        let code = code_for(&second_secret, now());

        let guard = fx.security_log.lock().unwrap();
        let result = std::thread::scope(|scope| {
            let waiting =
                scope.spawn(|| fx.mfa.confirm_enrollment_at(&mut second, "10.0.0.2", &code, now()));
            // The second confirmation is parked on the log lock meanwhile.
            std::thread::sleep(std::time::Duration::from_millis(200));
            fx.secrets.save_at(&first_secret, now()).unwrap();
            drop(guard);
            waiting.join().unwrap()
        });

        assert!(matches!(result, Err(MfaError::VerificationRequired)));
        assert_eq!(fx.secrets.get().unwrap().secret(), first_secret);
        assert!(second.pending_secret.is_some());
    }

    #[test]
    fn reenrollment_keeps_passes_by_default() {
        let fx = fixture(MfaConfig::new());
        fx.secrets.save_at("JBSWY3DPEHPK3PXP", now()).unwrap();
        let mut session = SessionState::default();
        fx.mfa.mark_verified_at(&mut session, now());

        fx.secrets
            .save_at("AAAAAAAAAAAAAAAA", now() + Duration::minutes(1))
            .unwrap();
        assert!(fx.mfa.is_verified_at(&mut session, now() + Duration::minutes(2)));
    }

    #[test]
    fn reenrollment_resets_passes_when_enabled() {
        let fx = fixture(MfaConfig::new().with_reset_on_reenroll(true));
        fx.secrets.save_at("JBSWY3DPEHPK3PXP", now()).unwrap();
        let mut session = SessionState::default();
        fx.mfa.mark_verified_at(&mut session, now());
        assert!(fx.mfa.is_verified_at(&mut session, now()));

        fx.secrets
            .save_at("AAAAAAAAAAAAAAAA", now() + Duration::minutes(1))
            .unwrap();
        assert!(!fx.mfa.is_verified_at(&mut session, now() + Duration::minutes(2)));
        assert_eq!(session.mfa_passed_at, None);
    }

    #[test]
    fn enrollment_confirms_pending_secret() {
        let fx = fixture(MfaConfig::new());
        let mut session = SessionState::default();

        let enrollment = fx.mfa.begin_enrollment_at(&mut session, now()).unwrap();
        assert_eq!(enrollment.secret.len(), totp::engine::SECRET_LENGTH);
        assert!(enrollment
            .otpauth_uri
            .starts_with("otpauth://totp/SecureUploadAdmin:admin%40yourdomain?secret="));

        // resuming returns the same pending secret
        let again = fx.mfa.begin_enrollment_at(&mut session, now()).unwrap();
        assert_eq!(again.secret, enrollment.secret);

        let outcome = fx
            .mfa
            .confirm_enrollment_at(&mut session, "10.0.0.1", "000000x", now())
            .unwrap();
        assert_eq!(outcome, EnrollmentOutcome::InvalidCode);
        assert!(!fx.secrets.is_configured());

        let code = code_for(&enrollment.secret, now());
        let outcome = fx
            .mfa
            .confirm_enrollment_at(&mut session, "10.0.0.1", &code, now())
            .unwrap();
        assert_eq!(outcome, EnrollmentOutcome::Confirmed);
        assert_eq!(fx.secrets.get().unwrap().secret(), enrollment.secret);
        assert!(session.pending_secret.is_none());
        assert_eq!(fx.mfa.state_at(&mut session, now()), MfaState::ConfiguredVerified);

        let events: Vec<_> = fx
            .security_log
            .entries()
            .into_iter()
            .map(|entry| entry.event)
            .collect();
        assert_eq!(events, vec![EVENT_SETUP_FAIL, EVENT_SETUP_SUCCESS]);
    }

    #[test]
    fn confirm_without_pending_secret() {
        let fx = fixture(MfaConfig::new());
        let mut session = SessionState::default();
        let outcome = fx
            .mfa
            .confirm_enrollment_at(&mut session, "10.0.0.1", "123456", now())
            .unwrap();
        assert_eq!(outcome, EnrollmentOutcome::NoPendingEnrollment);
    }

    #[test]
    fn reenrollment_requires_verified_session() {
        let fx = fixture(MfaConfig::new());
        fx.secrets.save_at("JBSWY3DPEHPK3PXP", now()).unwrap();
        let mut session = SessionState::default();

        assert!(matches!(
            fx.mfa.begin_enrollment_at(&mut session, now()),
            Err(MfaError::VerificationRequired)
        ));

        fx.mfa.mark_verified_at(&mut session, now());
        let enrollment = fx.mfa.begin_enrollment_at(&mut session, now()).unwrap();
        assert_ne!(enrollment.secret, "JBSWY3DPEHPK3PXP");
    }

    #[test]
    fn verify_code_marks_session() {
        let fx = fixture(MfaConfig::new());
        let mut session = SessionState::default();
        assert_eq!(
            fx.mfa
                .verify_code_at(&mut session, "10.0.0.1", "123456", now())
                .unwrap(),
            VerifyOutcome::NotConfigured
        );

        fx.secrets.save_at("JBSWY3DPEHPK3PXP", now()).unwrap();
        let code = code_for("JBSWY3DPEHPK3PXP", now());
        assert_eq!(
            fx.mfa
                .verify_code_at(&mut session, "10.0.0.1", &code, now())
                .unwrap(),
            VerifyOutcome::Verified
        );
        assert_eq!(session.mfa_passed_at, Some(now().timestamp()));
        assert_eq!(
            fx.mfa
                .require_or_challenge_at(&mut session, "/v1/admin/files", now()),
            MfaDecision::Allow
        );
    }

    #[test]
    fn repeated_failures_are_throttled() {
        let fx = fixture(MfaConfig::new().with_failure_limit(3, 900));
        fx.secrets.save_at("JBSWY3DPEHPK3PXP", now()).unwrap();
        let mut session = SessionState::default();

        // a code from far outside the window is wrong but well-formed
        let wrong = code_for("JBSWY3DPEHPK3PXP", now() - Duration::hours(1));
        for _ in 0..3 {
            assert_eq!(
                fx.mfa
                    .verify_code_at(&mut session, "10.0.0.9", &wrong, now())
                    .unwrap(),
                VerifyOutcome::InvalidCode
            );
        }

        let right = code_for("JBSWY3DPEHPK3PXP", now());
        assert_eq!(
            fx.mfa
                .verify_code_at(&mut session, "10.0.0.9", &right, now())
                .unwrap(),
            VerifyOutcome::Throttled
        );
        assert_eq!(session.mfa_passed_at, None);

        // other clients are unaffected
        assert_eq!(
            fx.mfa
                .verify_code_at(&mut session, "10.0.0.10", &right, now())
                .unwrap(),
            VerifyOutcome::Verified
        );

        // the window slides past the failures
        let later = now() + Duration::minutes(16);
        let fresh = code_for("JBSWY3DPEHPK3PXP", later);
        assert_eq!(
            fx.mfa
                .verify_code_at(&mut SessionState::default(), "10.0.0.9", &fresh, later)
                .unwrap(),
            VerifyOutcome::Verified
        );
    }

    #[test]
    fn debug_redacts_pending_secret() {
        let session = SessionState {
            mfa_passed_at: None,
            pending_secret: Some("JBSWY3DPEHPK3PXP".to_string()),
        };
        assert!(!format!("{session:?}").contains("JBSWY3DPEHPK3PXP"));
    }
}
