use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::{fs, path::PathBuf};

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub catalog_path: PathBuf,
    pub transformer_path: PathBuf,
    pub predictor_path: PathBuf,
    pub bind_addr: String,
    /// Idle time after which a form session is dropped.
    pub session_ttl_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            catalog_path: PathBuf::from("outage_report.csv"),
            transformer_path: PathBuf::from("preprocessor.json"),
            predictor_path: PathBuf::from("model.json"),
            bind_addr: "0.0.0.0:8080".to_string(),
            session_ttl_secs: 1800,
        }
    }
}

impl AppConfig {
    /// JSON file; fields left out keep their defaults.
    pub fn load(path: &str) -> Result<Self> {
        let data = fs::read_to_string(path).with_context(|| format!("failed to read config at {path}"))?;
        serde_json::from_str(&data).with_context(|| format!("invalid config JSON in {path}"))
    }

    /// Defaults, then `CONFIG_PATH`, then per-field environment overrides.
    pub fn from_env() -> Result<Self> {
        Self::resolve(|key| std::env::var(key).ok())
    }

    pub fn resolve(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut cfg = match var("CONFIG_PATH") {
            Some(path) => Self::load(&path)?,
            None => Self::default(),
        };
        if let Some(v) = var("CATALOG_PATH") {
            cfg.catalog_path = v.into();
        }
        if let Some(v) = var("TRANSFORMER_PATH") {
            cfg.transformer_path = v.into();
        }
        if let Some(v) = var("MODEL_PATH") {
            cfg.predictor_path = v.into();
        }
        if let Some(v) = var("BIND_ADDR") {
            cfg.bind_addr = v;
        }
        if let Some(port) = var("PORT") {
            let port: u16 = port.parse().with_context(|| format!("invalid PORT `{port}`"))?;
            let host = cfg.bind_addr.rsplit_once(':').map_or(cfg.bind_addr.as_str(), |(h, _)| h);
            cfg.bind_addr = format!("{host}:{port}");
        }
        if let Some(v) = var("SESSION_TTL_SECS") {
            cfg.session_ttl_secs = v.parse().with_context(|| format!("invalid SESSION_TTL_SECS `{v}`"))?;
        }
        if cfg.session_ttl_secs == 0 {
            bail!("session_ttl_secs must be positive");
        }
        Ok(cfg)
    }
}
