use std::{path::PathBuf, time::Duration};

use anyhow::{anyhow, Context, Result};
use log::LevelFilter;

use crate::oauth::ClientSecrets;

/// Runtime configuration, read from the environment (and `.env`).
#[derive(Debug, Clone)]
pub struct Config {
    pub api_id: i32,
    pub api_hash: String,
    pub bot_token: String,
    pub redirect_url: String,
    pub secrets: ClientSecrets,
    pub port: u16,
    pub auth_timeout: Duration,
    pub folder_name: String,
    pub staging_dir: PathBuf,
    pub session_file: String,
    pub log_level: LevelFilter,
}

impl Config {
    /// Load the configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load the configuration using the given variable lookup.
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |key: &str| var(key).ok_or_else(|| anyhow!("{} is not set", key));

        // Client secrets can be passed inline or as a path to the JSON file
        let secrets = match (var("GOOGLE_CREDENTIALS_JSON"), var("GOOGLE_CREDENTIALS_FILE")) {
            (Some(json), _) => ClientSecrets::from_json(&json)
                .context("GOOGLE_CREDENTIALS_JSON is not a valid client secrets document")?,
            (None, Some(path)) => {
                let json = std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read {}", path))?;
                ClientSecrets::from_json(&json)
                    .with_context(|| format!("{} is not a valid client secrets document", path))?
            }
            (None, None) => {
                return Err(anyhow!(
                    "either GOOGLE_CREDENTIALS_JSON or GOOGLE_CREDENTIALS_FILE must be set"
                ))
            }
        };

        Ok(Self {
            api_id: required("API_ID")?.parse::<i32>().context("API_ID must be a number")?,
            api_hash: required("API_HASH")?,
            bot_token: required("BOT_TOKEN")?,
            redirect_url: required("REDIRECT_URL")?,
            secrets,
            port: var("PORT")
                .map(|port| port.parse::<u16>())
                .transpose()
                .context("PORT must be a port number")?
                .unwrap_or(8080),
            auth_timeout: Duration::from_secs(
                var("AUTH_TIMEOUT_SECS")
                    .map(|secs| secs.parse::<u64>())
                    .transpose()
                    .context("AUTH_TIMEOUT_SECS must be a number of seconds")?
                    .unwrap_or(60),
            ),
            folder_name: var("DRIVE_FOLDER").unwrap_or_else(|| "savepanra".to_string()),
            staging_dir: var("STAGING_DIR")
                .unwrap_or_else(|| "temp".to_string())
                .into(),
            session_file: var("SESSION_FILE").unwrap_or_else(|| "session.bin".to_string()),
            log_level: var("LOG_LEVEL")
                .map(|level| level.parse::<LevelFilter>())
                .transpose()
                .context("LOG_LEVEL must be one of off, error, warn, info, debug, trace")?
                .unwrap_or(LevelFilter::Info),
        })
    }
}
