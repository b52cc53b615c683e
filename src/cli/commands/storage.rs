use anyhow::Result;
use clap::{Arg, ArgAction, Command};
use std::path::PathBuf;

pub const ARG_ROOT: &str = "root";
pub const ARG_DATA_DIR: &str = "data-dir";
pub const ARG_LOG_DIR: &str = "log-dir";
pub const ARG_DIRECTORY: &str = "directory";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_ROOT)
                .long(ARG_ROOT)
                .help("Base directory; allowed directories are resolved against it")
                .env("FILEGATE_ROOT")
                .default_value(".")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new(ARG_DATA_DIR)
                .long(ARG_DATA_DIR)
                .help("Directory for the allowlist and MFA secret records (default: <root>/data)")
                .env("FILEGATE_DATA_DIR")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new(ARG_LOG_DIR)
                .long(ARG_LOG_DIR)
                .help("Directory for audit logs (default: <root>/logs)")
                .env("FILEGATE_LOG_DIR")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new(ARG_DIRECTORY)
                .long(ARG_DIRECTORY)
                .help("Upload directory relative to the root; repeat for several")
                .env("FILEGATE_DIRECTORIES")
                .value_delimiter(',')
                .action(ArgAction::Append)
                .default_value("uploads"),
        )
}

#[derive(Debug)]
pub struct Options {
    pub root: PathBuf,
    pub data_dir: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
    pub directories: Vec<String>,
}

impl Options {
    /// # Errors
    /// Returns an error if an upload directory is not a plain relative path.
    pub fn parse(matches: &clap::ArgMatches) -> Result<Self> {
        let directories: Vec<String> = matches
            .get_many::<String>(ARG_DIRECTORY)
            .map(|values| values.map(|dir| dir.trim().to_string()).collect())
            .unwrap_or_default();

        for dir in &directories {
            if dir.is_empty() || dir.contains("..") || dir.starts_with(&['/', '\\'][..]) {
                anyhow::bail!("invalid --{ARG_DIRECTORY}: {dir:?}");
            }
        }

        Ok(Self {
            root: matches
                .get_one::<PathBuf>(ARG_ROOT)
                .cloned()
                .unwrap_or_else(|| PathBuf::from(".")),
            data_dir: matches.get_one::<PathBuf>(ARG_DATA_DIR).cloned(),
            log_dir: matches.get_one::<PathBuf>(ARG_LOG_DIR).cloned(),
            directories,
        })
    }
}
