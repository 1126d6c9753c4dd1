use anyhow::{Context, Result};
use std::{env, fmt::Display, net::SocketAddr, path::PathBuf, str::FromStr};
use tracing::{info, warn};

use nexuslearn_json::paths::data_root;

pub const DEFAULT_ADDR: &str = "127.0.0.1:5000";
pub const DEFAULT_ORIGINS: &str = "http://localhost:5173";
pub const DEFAULT_MAX_BACKUPS: &str = "10";

#[derive(Debug, Clone)]
pub struct Config {
    pub addr: SocketAddr,
    pub allowed_origins: Vec<String>,
    pub data_dir: PathBuf,
    pub max_backups: usize,
}

impl Config {
    /// Reads `NEXUSLEARN_*` variables, falling back to defaults.
    pub fn load() -> Result<Self> {
        let origins: String = try_load("NEXUSLEARN_ALLOWED_ORIGINS", DEFAULT_ORIGINS)?;
        let data_dir = match var("NEXUSLEARN_DATA_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => data_root(),
        };
        Ok(Self {
            addr: try_load("NEXUSLEARN_ADDR", DEFAULT_ADDR)?,
            allowed_origins: split_origins(&origins),
            data_dir,
            max_backups: try_load("NEXUSLEARN_MAX_BACKUPS", DEFAULT_MAX_BACKUPS)?,
        })
    }
}

fn var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn try_load<T: FromStr>(key: &str, default: &str) -> Result<T>
where
    T::Err: Display,
{
    let raw = var(key).unwrap_or_else(|| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });
    raw.trim()
        .parse()
        .map_err(|e| {
            warn!("Invalid {key} value: {e}");
            anyhow::anyhow!("{e}")
        })
        .with_context(|| format!("environment variable {key} is misconfigured"))
}

pub fn split_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().trim_end_matches('/').to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
