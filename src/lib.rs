//! # Filegate (versioned uploads behind MFA)
//!
//! `filegate` is a small single-node admin service. It accepts file uploads
//! into a fixed set of directories and keeps every overwritten file as a
//! numbered version next to the current one.
//!
//! ## Versioning
//!
//! The current file is `base.ext`; older contents live in `base_vN.ext`, where
//! `N` is the smallest free positive integer. Restoring a version pushes the
//! current file into a free slot first, so content is never discarded silently.
//!
//! ## MFA (`TOTP`)
//!
//! A single deployment-wide `TOTP` secret gates every mutating admin action.
//! A session that passed verification stays elevated for one hour.
//!
//! ## IP allowlist
//!
//! Uploads are only accepted from a fixed base set of addresses plus a
//! persisted dynamic set. Admin callers are added automatically; anyone else
//! may self-enroll with a shared password, at most once per hour.

pub mod allowlist;
pub mod api;
pub mod audit;
pub mod cli;
pub mod config;
pub mod mfa;
pub mod storage;
pub mod totp;
pub mod versioning;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
    }
}
