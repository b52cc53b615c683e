//! Command-line argument dispatch.
//!
//! Maps validated CLI matches to an action, such as starting the server with
//! its full configuration.

use crate::cli::actions::{server::Args, Action};
use crate::cli::commands::{security, storage, ARG_PORT};
use anyhow::Result;

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080);
    let storage_opts = storage::Options::parse(matches)?;
    let security_opts = security::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        root: storage_opts.root,
        data_dir: storage_opts.data_dir,
        log_dir: storage_opts.log_dir,
        directories: storage_opts.directories,
        allow_ips: security_opts.allow_ips,
        api_key: security_opts.api_key,
        whitelist_password: security_opts.whitelist_password,
        trust_proxy: security_opts.trust_proxy,
        upload_rate_limit: security_opts.upload_rate_limit,
        upload_rate_window: security_opts.upload_rate_window,
        session_ttl_seconds: security_opts.session_ttl_seconds,
        issuer: security_opts.issuer,
        account: security_opts.account,
        mfa_reset_on_reenroll: security_opts.mfa_reset_on_reenroll,
    }))
}
