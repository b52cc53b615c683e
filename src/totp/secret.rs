//! Single-slot store for the deployment's `TOTP` secret.

use super::base32;
use crate::storage::{self, FileLock, StorageError};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    path::{Path, PathBuf},
};

#[derive(Clone, PartialEq, Eq)]
pub struct TotpSecret {
    secret: String,
    created_at: DateTime<Utc>,
}

impl TotpSecret {
    #[must_use]
    pub fn secret(&self) -> &str {
        &self.secret
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl fmt::Debug for TotpSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TotpSecret")
            .field("secret", &"<redacted>")
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// On-disk shape. Every field is optional so that an empty `{}` (the initial
/// file) or a partial record reads as "not configured" instead of an error.
#[derive(Debug, Default, Serialize, Deserialize)]
struct SecretRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    created: Option<String>,
}

impl SecretRecord {
    fn into_secret(self) -> Option<TotpSecret> {
        let secret = self.secret?.trim().to_string();
        if secret.is_empty() || base32::decode(&secret).is_empty() {
            return None;
        }
        let created_at = self
            .created
            .as_deref()
            .and_then(parse_created)
            .unwrap_or_default();
        Some(TotpSecret { secret, created_at })
    }
}

// RFC 3339 as written by `save`; also accepts the older "YYYY-MM-DD HH:MM:SS".
fn parse_created(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|naive| naive.and_utc())
        })
}

#[derive(Debug, Clone)]
pub struct SecretStore {
    path: PathBuf,
}

impl SecretStore {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The enrolled secret, or `None` when missing or malformed.
    #[must_use]
    pub fn get(&self) -> Option<TotpSecret> {
        storage::read_json_or_default::<SecretRecord>(&self.path).into_secret()
    }

    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.get().is_some()
    }

    /// Overwrite the slot with `secret`, stamped now.
    ///
    /// # Errors
    /// Returns an error if the lock cannot be taken or the file cannot be written.
    pub fn save(&self, secret: &str) -> Result<TotpSecret, StorageError> {
        self.save_at(secret, Utc::now())
    }

    /// Overwrite the slot with `secret`, stamped `created_at`.
    ///
    /// # Errors
    /// Returns an error if the lock cannot be taken or the file cannot be written.
    pub fn save_at(
        &self,
        secret: &str,
        created_at: DateTime<Utc>,
    ) -> Result<TotpSecret, StorageError> {
        let _lock = FileLock::acquire(&storage::lock_path(&self.path))?;
        let record = SecretRecord {
            secret: Some(secret.to_string()),
            created: Some(created_at.to_rfc3339()),
        };
        storage::write_json_atomic(&self.path, &record)?;
        Ok(TotpSecret {
            secret: secret.to_string(),
            created_at,
        })
    }
}
