//! Configuration loading: optional settings file layered under
//! `PIREPORT__`-prefixed environment variables.

use config::{Config, Environment, File};
use pireport_server::ServerConfig;
use serde::Deserialize;
use thiserror::Error;

const CONFIG_FILE: &str = "config/settings";
const ENV_PREFIX: &str = "PIREPORT";

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error(transparent)]
    Build(#[from] config::ConfigError),
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    #[serde(default)]
    pub dataset: DatasetConfig,
}

/// Location of the remote CSV dataset. The URL stays optional here: the
/// fetch path reports the absence per request rather than at startup.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct DatasetConfig {
    pub csv_url: Option<String>,
}

pub fn load() -> Result<AppConfig, AppConfigError> {
    let builder = Config::builder()
        .set_default("server.listen_addr", "127.0.0.1:8080")?
        .add_source(File::with_name(CONFIG_FILE).required(false))
        .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let cfg = builder.build()?.try_deserialize()?;
    Ok(cfg)
}
