use crate::{api, config::Config, mfa::MfaConfig};
use anyhow::{Context, Result};
use secrecy::SecretString;
use std::path::PathBuf;
use tracing::{debug, info};

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub root: PathBuf,
    pub data_dir: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
    pub directories: Vec<String>,
    pub allow_ips: Vec<String>,
    pub api_key: SecretString,
    pub whitelist_password: SecretString,
    pub trust_proxy: bool,
    pub upload_rate_limit: usize,
    pub upload_rate_window: i64,
    pub session_ttl_seconds: u64,
    pub issuer: String,
    pub account: String,
    pub mfa_reset_on_reenroll: bool,
}

impl Args {
    #[must_use]
    pub fn into_config(self) -> Config {
        let mfa = MfaConfig::new()
            .with_issuer(self.issuer)
            .with_account(self.account)
            .with_reset_on_reenroll(self.mfa_reset_on_reenroll);

        let mut config = Config::new(self.root, self.api_key, self.whitelist_password)
            .with_directories(self.directories)
            .with_base_ips(self.allow_ips)
            .with_trust_proxy(self.trust_proxy)
            .with_upload_rate_limit(self.upload_rate_limit, self.upload_rate_window)
            .with_session_ttl_seconds(self.session_ttl_seconds)
            .with_mfa(mfa);
        if let Some(data_dir) = self.data_dir {
            config = config.with_data_dir(data_dir);
        }
        if let Some(log_dir) = self.log_dir {
            config = config.with_log_dir(log_dir);
        }
        config
    }
}

/// Execute the server action.
/// # Errors
/// Returns an error if the directory layout cannot be created or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let port = args.port;
    debug!("Server args: {:?}", args);

    let config = args.into_config();
    config
        .ensure_layout()
        .context("Failed to prepare data, log and upload directories")?;

    info!(
        "Serving {:?} from {}",
        config.directories(),
        config.root().display()
    );

    api::serve(port, config).await
}
