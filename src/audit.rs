//! Append-only audit trails.
//!
//! One event per line: `[YYYY-MM-DD HH:MM:SS] EVENT | KEY=value | KEY=value`,
//! timestamps in UTC. Rate limits read these files back, so parsing matches
//! fields exactly instead of searching substrings.

use crate::storage::{lock_path, FileLock, StorageError};
use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::warn;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const SEPARATOR: &str = " | ";
const TAIL_CHUNK: u64 = 8 * 1024;

fn line_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^\[([^\]]+)\]\s*(.+)$").ok())
        .as_ref()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub event: String,
    pub fields: Vec<(String, String)>,
}

impl AuditEntry {
    #[must_use]
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    #[must_use]
    pub fn has_field(&self, key: &str, value: &str) -> bool {
        self.field(key) == Some(value)
    }

    /// Parse one log line; `None` for anything that does not follow the format.
    #[must_use]
    pub fn parse(line: &str) -> Option<Self> {
        let captures = line_pattern()?.captures(line.trim_end())?;
        let timestamp = NaiveDateTime::parse_from_str(captures.get(1)?.as_str(), TIMESTAMP_FORMAT)
            .ok()?
            .and_utc();

        let mut segments = captures.get(2)?.as_str().split('|').map(str::trim);
        let event = segments.next().filter(|event| !event.is_empty())?.to_string();
        let fields = segments
            .filter_map(|segment| {
                let (key, value) = segment.split_once('=')?;
                Some((key.trim().to_string(), value.trim().to_string()))
            })
            .collect();

        Some(Self {
            timestamp,
            event,
            fields,
        })
    }

    #[must_use]
    pub fn render(&self) -> String {
        let mut line = format!(
            "[{}] {}",
            self.timestamp.format(TIMESTAMP_FORMAT),
            sanitize(&self.event)
        );
        for (key, value) in &self.fields {
            line.push_str(SEPARATOR);
            line.push_str(&sanitize(key));
            line.push('=');
            line.push_str(&sanitize(value));
        }
        line
    }
}

// Values come from clients (file names, addresses); keep them on one line and
// out of the field separator.
fn sanitize(value: &str) -> String {
    value
        .chars()
        .map(|c| if c == '|' || c.is_control() { '_' } else { c })
        .collect()
}

#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Exclusive lock for check-then-append sequences such as rate limits.
    ///
    /// # Errors
    /// Returns an error if the lock cannot be acquired in time.
    pub fn lock(&self) -> Result<FileLock, StorageError> {
        FileLock::acquire(&lock_path(&self.path))
    }

    /// Append an event stamped with the current time.
    ///
    /// # Errors
    /// Returns an error if the log file cannot be opened or written.
    pub fn append(&self, event: &str, fields: &[(&str, &str)]) -> Result<(), StorageError> {
        self.append_at(Utc::now(), event, fields)
    }

    /// Append an event with an explicit timestamp.
    ///
    /// # Errors
    /// Returns an error if the log file cannot be opened or written.
    pub fn append_at(
        &self,
        timestamp: DateTime<Utc>,
        event: &str,
        fields: &[(&str, &str)],
    ) -> Result<(), StorageError> {
        let entry = AuditEntry {
            timestamp,
            event: event.to_string(),
            fields: fields
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
        };
        let mut line = entry.render();
        line.push('\n');

        let io_err = |source| StorageError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(io_err)?;
        file.write_all(line.as_bytes()).map_err(io_err)
    }

    /// Append without surfacing failures; for trails that must not break the
    /// request that produced them.
    pub fn record(&self, event: &str, fields: &[(&str, &str)]) {
        if let Err(err) = self.append(event, fields) {
            warn!("Failed to write audit event {event}: {err}");
        }
    }

    /// All parseable entries, oldest first. A missing log is empty.
    #[must_use]
    pub fn entries(&self) -> Vec<AuditEntry> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents.lines().filter_map(AuditEntry::parse).collect(),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(err) => {
                warn!("Failed to read audit log {}: {err}", self.path.display());
                Vec::new()
            }
        }
    }

    /// Entries stamped at or after `since`, oldest first.
    ///
    /// Reads backwards from the end of the file and stops at the first entry
    /// older than `since`, so the cost follows the window, not the history.
    /// Lines are appended in time order.
    #[must_use]
    pub fn entries_since(&self, since: DateTime<Utc>) -> Vec<AuditEntry> {
        match self.read_tail(since) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(err) => {
                warn!("Failed to read audit log {}: {err}", self.path.display());
                Vec::new()
            }
        }
    }

    fn read_tail(&self, since: DateTime<Utc>) -> std::io::Result<Vec<AuditEntry>> {
        let mut file = File::open(&self.path)?;
        let mut pos = file.seek(SeekFrom::End(0))?;
        let mut recent = Vec::new();
        // Bytes of the partial line at the front of the last chunk read.
        let mut carry: Vec<u8> = Vec::new();

        loop {
            let start = pos.saturating_sub(TAIL_CHUNK);
            let mut chunk = vec![0; usize::try_from(pos - start).unwrap_or(0)];
            file.seek(SeekFrom::Start(start))?;
            file.read_exact(&mut chunk)?;
            chunk.extend_from_slice(&carry);
            pos = start;

            let mut lines = chunk.split(|b| *b == b'\n');
            let head = lines.next().unwrap_or_default().to_vec();
            let mut complete: Vec<&[u8]> = lines.collect();
            if pos == 0 {
                complete.insert(0, head.as_slice());
            }
            for line in complete.into_iter().rev() {
                let Some(entry) = std::str::from_utf8(line).ok().and_then(AuditEntry::parse)
                else {
                    continue;
                };
                if entry.timestamp < since {
                    recent.reverse();
                    return Ok(recent);
                }
                recent.push(entry);
            }
            if pos == 0 {
                recent.reverse();
                return Ok(recent);
            }
            carry = head;
        }
    }
}
