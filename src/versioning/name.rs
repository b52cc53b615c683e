//! `base.ext` / `base_vN.ext` naming.

use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

fn slot_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^(.+)_v([0-9]+)$").ok())
        .as_ref()
}

/// A file name split into family base, extension and optional version slot.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VersionedName {
    pub base: String,
    /// Includes the leading dot; empty when the name has no extension.
    pub ext: String,
    pub version: Option<u64>,
}

impl VersionedName {
    #[must_use]
    pub fn parse(file_name: &str) -> Self {
        let (stem, ext) = split_extension(file_name);
        let captures = slot_pattern()
            .and_then(|re| re.captures(stem).map(|c| (c[1].to_string(), c[2].parse::<u64>())));

        match captures {
            Some((base, Ok(version))) => Self {
                base,
                ext: ext.to_string(),
                version: Some(version),
            },
            _ => Self {
                base: stem.to_string(),
                ext: ext.to_string(),
                version: None,
            },
        }
    }

    #[must_use]
    pub fn is_versioned(&self) -> bool {
        self.version.is_some()
    }

    /// Name of the family's current file.
    #[must_use]
    pub fn current_name(&self) -> String {
        format!("{}{}", self.base, self.ext)
    }

    #[must_use]
    pub fn slot_name(&self, version: u64) -> String {
        format!("{}_v{version}{}", self.base, self.ext)
    }
}

/// Split at the last dot of the file name. Dotfiles such as `.env` have no
/// extension.
fn split_extension(file_name: &str) -> (&str, &str) {
    let path = Path::new(file_name);
    match (
        path.file_stem().and_then(|s| s.to_str()),
        path.extension().and_then(|s| s.to_str()),
    ) {
        (Some(stem), Some(ext)) => (stem, &file_name[stem.len()..stem.len() + 1 + ext.len()]),
        (Some(stem), None) => (stem, ""),
        _ => (file_name, ""),
    }
}
