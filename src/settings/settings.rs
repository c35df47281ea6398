use anyhow::{Result, anyhow};
use config::{Config, Environment, File};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub api: Api,
    pub credentials: Credentials,
    pub log: Log,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Api {
    pub backend: String, // "fake" or "real"
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_login_path")]
    pub login_path: String,
    #[serde(default = "default_refresh_path")]
    pub refresh_path: String,
    #[serde(default = "default_me_path")]
    pub me_path: String,
    #[serde(default = "default_register_path")]
    pub register_path: String,
    #[serde(default = "default_verify_email_path")]
    pub verify_email_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Credentials {
    pub backend: String, // "memory", "file" or "redis"
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub redis_url: Option<String>,
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Log {
    pub filter: String,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_login_path() -> String {
    "/api/auth/token/".to_string()
}

fn default_refresh_path() -> String {
    "/api/auth/token/refresh/".to_string()
}

fn default_me_path() -> String {
    "/api/auth/me/".to_string()
}

fn default_register_path() -> String {
    "/api/auth/register/".to_string()
}

fn default_verify_email_path() -> String {
    "/api/auth/verify-email/".to_string()
}

fn default_prefix() -> String {
    "elevate:credentials".to_string()
}

#[cfg(debug_assertions)]
const SETTINGS_PATH: &str = "settings/dev.toml";
#[cfg(not(debug_assertions))]
const SETTINGS_PATH: &str = "settings/release.toml";

/// Reads the TOML file at `path` (or the build's default) and then applies
/// `ELEVATE__SECTION__KEY` environment overrides.
pub fn parse_settings(path: Option<&str>) -> Result<Settings> {
    let path = path.unwrap_or(SETTINGS_PATH);

    let settings: Settings = Config::builder()
        .add_source(File::with_name(path))
        .add_source(
            Environment::with_prefix("ELEVATE")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .map_err(|e| anyhow!(e))?
        .try_deserialize()
        .map_err(|e| anyhow!(e))?;

    Ok(settings)
}
