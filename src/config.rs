use anyhow::{Context, Result};
use home::home_dir;
use serde::{Deserialize, Serialize};
use std::{
    fs::read_to_string,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::wait::DB_WAIT_TIMEOUT;

pub const APP_NAME: &str = "aws-manager";
pub const DEFAULT_AUTH_FILE: &str = "/etc/auth.yaml";

/// Account credentials, read from a YAML document
#[derive(Deserialize, Clone)]
pub struct AuthConfig {
    /// Resolved through STS when absent
    #[serde(default)]
    pub account_id: Option<String>,
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl AuthConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = read_to_string(path)
            .with_context(|| format!("failed to read credentials from {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("invalid credentials file {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        let cfg: AuthConfig = serde_yaml::from_str(text)?;
        Ok(cfg)
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("account_id", &self.account_id)
            .field("access_key_id", &self.access_key_id)
            .finish_non_exhaustive()
    }
}

/// Tool settings, managed by confy under the platform config directory
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Credentials file (`~` is expanded)
    pub auth_file: PathBuf,
    /// Program used by `connect`
    pub ssh_program: String,
    /// Login used when an instance has no `user` tag
    pub default_user: Option<String>,
    /// Budget for `wait_for_db` and the wait inside `create_db`
    pub db_wait_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            auth_file: PathBuf::from(DEFAULT_AUTH_FILE),
            ssh_program: "ssh".to_string(),
            default_user: None,
            db_wait_timeout_secs: DB_WAIT_TIMEOUT.as_secs(),
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self> {
        let settings: Settings =
            confy::load(APP_NAME, None).context("failed to load tool settings")?;
        Ok(settings)
    }

    pub fn auth_path(&self) -> PathBuf {
        expand_home(&self.auth_file)
    }

    pub fn db_wait_timeout(&self) -> Duration {
        Duration::from_secs(self.db_wait_timeout_secs)
    }
}

/// Replace a leading `~` with the home directory, when there is one.
pub fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), home_dir()) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}
