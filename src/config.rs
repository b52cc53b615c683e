//! Runtime configuration shared by the server and its components.

use crate::{
    allowlist::IpAllowlist,
    audit::AuditLog,
    mfa::{MfaConfig, MfaSession},
    storage::{self, StorageError},
    totp::SecretStore,
    versioning::VersionedFileStore,
};
use secrecy::SecretString;
use std::path::{Path, PathBuf};

const DEFAULT_UPLOAD_RATE_LIMIT: usize = 60;
const DEFAULT_UPLOAD_RATE_WINDOW_SECONDS: i64 = 60 * 60;
const DEFAULT_SESSION_TTL_SECONDS: u64 = 12 * 60 * 60;

#[derive(Clone, Debug)]
pub struct Config {
    root: PathBuf,
    data_dir: Option<PathBuf>,
    log_dir: Option<PathBuf>,
    directories: Vec<String>,
    base_ips: Vec<String>,
    api_key: SecretString,
    whitelist_password: SecretString,
    trust_proxy: bool,
    upload_rate_limit: usize,
    upload_rate_window_seconds: i64,
    session_ttl_seconds: u64,
    mfa: MfaConfig,
}

impl Config {
    #[must_use]
    pub fn new(root: PathBuf, api_key: SecretString, whitelist_password: SecretString) -> Self {
        Self {
            root,
            data_dir: None,
            log_dir: None,
            directories: vec!["uploads".to_string()],
            base_ips: vec!["127.0.0.1".to_string(), "::1".to_string()],
            api_key,
            whitelist_password,
            trust_proxy: false,
            upload_rate_limit: DEFAULT_UPLOAD_RATE_LIMIT,
            upload_rate_window_seconds: DEFAULT_UPLOAD_RATE_WINDOW_SECONDS,
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
            mfa: MfaConfig::new(),
        }
    }

    #[must_use]
    pub fn with_data_dir(mut self, data_dir: PathBuf) -> Self {
        self.data_dir = Some(data_dir);
        self
    }

    #[must_use]
    pub fn with_log_dir(mut self, log_dir: PathBuf) -> Self {
        self.log_dir = Some(log_dir);
        self
    }

    #[must_use]
    pub fn with_directories(mut self, directories: Vec<String>) -> Self {
        self.directories = directories;
        self
    }

    #[must_use]
    pub fn with_base_ips(mut self, base_ips: Vec<String>) -> Self {
        self.base_ips = base_ips;
        self
    }

    #[must_use]
    pub fn with_trust_proxy(mut self, trust_proxy: bool) -> Self {
        self.trust_proxy = trust_proxy;
        self
    }

    #[must_use]
    pub fn with_upload_rate_limit(mut self, limit: usize, window_seconds: i64) -> Self {
        self.upload_rate_limit = limit;
        self.upload_rate_window_seconds = window_seconds;
        self
    }

    #[must_use]
    pub fn with_session_ttl_seconds(mut self, seconds: u64) -> Self {
        self.session_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_mfa(mut self, mfa: MfaConfig) -> Self {
        self.mfa = mfa;
        self
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(|| self.root.join("data"))
    }

    #[must_use]
    pub fn log_dir(&self) -> PathBuf {
        self.log_dir
            .clone()
            .unwrap_or_else(|| self.root.join("logs"))
    }

    #[must_use]
    pub fn directories(&self) -> &[String] {
        &self.directories
    }

    #[must_use]
    pub fn api_key(&self) -> &SecretString {
        &self.api_key
    }

    #[must_use]
    pub fn trust_proxy(&self) -> bool {
        self.trust_proxy
    }

    #[must_use]
    pub fn upload_rate_limit(&self) -> usize {
        self.upload_rate_limit
    }

    #[must_use]
    pub fn upload_rate_window_seconds(&self) -> i64 {
        self.upload_rate_window_seconds
    }

    #[must_use]
    pub fn session_ttl_seconds(&self) -> u64 {
        self.session_ttl_seconds
    }

    #[must_use]
    pub fn allowed_ips_path(&self) -> PathBuf {
        self.data_dir().join("allowed_ips.json")
    }

    #[must_use]
    pub fn mfa_secret_path(&self) -> PathBuf {
        self.data_dir().join("mfa_secret.json")
    }

    #[must_use]
    pub fn locks_dir(&self) -> PathBuf {
        self.data_dir().join("locks")
    }

    #[must_use]
    pub fn upload_log(&self) -> AuditLog {
        AuditLog::new(self.log_dir().join("upload.log"))
    }

    #[must_use]
    pub fn rate_limit_log(&self) -> AuditLog {
        AuditLog::new(self.log_dir().join("rate_limit.log"))
    }

    #[must_use]
    pub fn powershell_log(&self) -> AuditLog {
        AuditLog::new(self.log_dir().join("powershell.log"))
    }

    #[must_use]
    pub fn whitelist_log(&self) -> AuditLog {
        AuditLog::new(self.log_dir().join("whitelist.log"))
    }

    #[must_use]
    pub fn security_log(&self) -> AuditLog {
        AuditLog::new(self.log_dir().join("security.log"))
    }

    #[must_use]
    pub fn file_store(&self) -> VersionedFileStore {
        VersionedFileStore::new(
            self.root.clone(),
            self.directories.clone(),
            self.locks_dir(),
        )
    }

    #[must_use]
    pub fn allowlist(&self) -> IpAllowlist {
        IpAllowlist::new(
            self.base_ips.clone(),
            self.allowed_ips_path(),
            self.whitelist_log(),
            self.whitelist_password.clone(),
        )
    }

    #[must_use]
    pub fn mfa_session(&self) -> MfaSession {
        MfaSession::new(
            SecretStore::new(self.mfa_secret_path()),
            self.security_log(),
            self.mfa.clone(),
        )
    }

    /// Create the data, log and upload directories plus empty record files.
    ///
    /// # Errors
    /// Returns an error if a directory or seed file cannot be created.
    pub fn ensure_layout(&self) -> Result<(), StorageError> {
        let mut dirs = vec![self.data_dir(), self.log_dir(), self.locks_dir()];
        dirs.extend(self.directories.iter().map(|dir| self.root.join(dir)));
        for dir in dirs {
            std::fs::create_dir_all(&dir).map_err(|source| StorageError::Io {
                path: dir.clone(),
                source,
            })?;
        }

        for (path, seed) in [
            (self.allowed_ips_path(), b"[]".as_slice()),
            (self.mfa_secret_path(), b"{}".as_slice()),
        ] {
            if !path.exists() {
                storage::write_atomic(&path, seed)?;
            }
        }
        Ok(())
    }
}
