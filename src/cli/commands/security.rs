use anyhow::{Context, Result};
use clap::{Arg, ArgAction, Command};
use secrecy::SecretString;

pub const ARG_API_KEY: &str = "api-key";
pub const ARG_WHITELIST_PASSWORD: &str = "whitelist-password";
pub const ARG_ALLOW_IP: &str = "allow-ip";
pub const ARG_TRUST_PROXY: &str = "trust-proxy";
pub const ARG_UPLOAD_RATE_LIMIT: &str = "upload-rate-limit";
pub const ARG_UPLOAD_RATE_WINDOW: &str = "upload-rate-window";
pub const ARG_SESSION_TTL: &str = "session-ttl-seconds";
pub const ARG_ISSUER: &str = "issuer";
pub const ARG_ACCOUNT: &str = "account";
pub const ARG_MFA_RESET_ON_REENROLL: &str = "mfa-reset-on-reenroll";

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = with_access_args(command);
    with_mfa_args(command)
}

fn with_access_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_API_KEY)
                .long(ARG_API_KEY)
                .help("Shared key expected in the `api` field of uploads")
                .env("FILEGATE_API_KEY")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_WHITELIST_PASSWORD)
                .long(ARG_WHITELIST_PASSWORD)
                .help("Password for IP self-enrollment")
                .env("FILEGATE_WHITELIST_PASSWORD")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_ALLOW_IP)
                .long(ARG_ALLOW_IP)
                .help("Address that is always allowed; repeat for several")
                .env("FILEGATE_ALLOW_IPS")
                .value_delimiter(',')
                .action(ArgAction::Append)
                .default_values(["127.0.0.1", "::1"]),
        )
        .arg(
            Arg::new(ARG_TRUST_PROXY)
                .long(ARG_TRUST_PROXY)
                .help("Take the client address from X-Forwarded-For / X-Real-IP")
                .env("FILEGATE_TRUST_PROXY")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(ARG_UPLOAD_RATE_LIMIT)
                .long(ARG_UPLOAD_RATE_LIMIT)
                .help("Maximum upload log entries per address within the window")
                .env("FILEGATE_UPLOAD_RATE_LIMIT")
                .default_value("60")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new(ARG_UPLOAD_RATE_WINDOW)
                .long(ARG_UPLOAD_RATE_WINDOW)
                .help("Upload rate limit window in seconds")
                .env("FILEGATE_UPLOAD_RATE_WINDOW")
                .default_value("3600")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
        .arg(
            Arg::new(ARG_SESSION_TTL)
                .long(ARG_SESSION_TTL)
                .help("Idle lifetime of admin sessions in seconds")
                .env("FILEGATE_SESSION_TTL_SECONDS")
                .default_value("43200")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
}

fn with_mfa_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_ISSUER)
                .long(ARG_ISSUER)
                .help("Issuer shown in authenticator apps")
                .env("FILEGATE_MFA_ISSUER")
                .default_value("SecureUploadAdmin"),
        )
        .arg(
            Arg::new(ARG_ACCOUNT)
                .long(ARG_ACCOUNT)
                .help("Account label shown in authenticator apps")
                .env("FILEGATE_MFA_ACCOUNT")
                .default_value("admin@yourdomain"),
        )
        .arg(
            Arg::new(ARG_MFA_RESET_ON_REENROLL)
                .long(ARG_MFA_RESET_ON_REENROLL)
                .help("Expire existing MFA sessions when a new secret is enrolled")
                .env("FILEGATE_MFA_RESET_ON_REENROLL")
                .action(ArgAction::SetTrue),
        )
}

#[derive(Debug)]
pub struct Options {
    pub api_key: SecretString,
    pub whitelist_password: SecretString,
    pub allow_ips: Vec<String>,
    pub trust_proxy: bool,
    pub upload_rate_limit: usize,
    pub upload_rate_window: i64,
    pub session_ttl_seconds: u64,
    pub issuer: String,
    pub account: String,
    pub mfa_reset_on_reenroll: bool,
}

impl Options {
    /// # Errors
    /// Returns an error if a required secret is missing.
    pub fn parse(matches: &clap::ArgMatches) -> Result<Self> {
        let api_key = matches
            .get_one::<String>(ARG_API_KEY)
            .cloned()
            .context("missing required argument: --api-key")?;
        let whitelist_password = matches
            .get_one::<String>(ARG_WHITELIST_PASSWORD)
            .cloned()
            .context("missing required argument: --whitelist-password")?;

        Ok(Self {
            api_key: SecretString::from(api_key),
            whitelist_password: SecretString::from(whitelist_password),
            allow_ips: matches
                .get_many::<String>(ARG_ALLOW_IP)
                .map(|values| values.map(|ip| ip.trim().to_string()).collect())
                .unwrap_or_default(),
            trust_proxy: matches.get_flag(ARG_TRUST_PROXY),
            upload_rate_limit: matches
                .get_one::<usize>(ARG_UPLOAD_RATE_LIMIT)
                .copied()
                .unwrap_or(60),
            upload_rate_window: matches
                .get_one::<i64>(ARG_UPLOAD_RATE_WINDOW)
                .copied()
                .unwrap_or(3600),
            session_ttl_seconds: matches
                .get_one::<u64>(ARG_SESSION_TTL)
                .copied()
                .unwrap_or(43_200),
            issuer: matches
                .get_one::<String>(ARG_ISSUER)
                .cloned()
                .unwrap_or_default(),
            account: matches
                .get_one::<String>(ARG_ACCOUNT)
                .cloned()
                .unwrap_or_default(),
            mfa_reset_on_reenroll: matches.get_flag(ARG_MFA_RESET_ON_REENROLL),
        })
    }
}
