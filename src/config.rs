use crate::settings::Settings;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub listen: String,
    pub rpc: RpcConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
    #[serde(default)]
    pub settings: Settings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RpcConfig {
    pub base_url: String,
    #[serde(default = "default_rpc_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DashboardConfig {
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,
    #[serde(default = "default_render_delay", with = "humantime_serde")]
    pub render_delay: Duration,
    #[serde(default = "default_replay_delay", with = "humantime_serde")]
    pub replay_delay: Duration,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            render_delay: default_render_delay(),
            replay_delay: default_replay_delay(),
            history_limit: default_history_limit(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("не удалось прочитать файл конфигурации {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("не удалось разобрать YAML в {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("ошибка валидации конфигурации: {0}")]
    Validation(String),
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_display = path_ref.display().to_string();
        let text = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_display.clone(),
            source,
        })?;

        let cfg: Config = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path_display,
            source,
        })?;

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen.trim().is_empty() {
            return Err(ConfigError::Validation(
                "поле listen обязательно".to_string(),
            ));
        }
        if SocketAddr::from_str(&self.listen).is_err() {
            return Err(ConfigError::Validation(
                "поле listen должно быть корректным адресом host:port".to_string(),
            ));
        }

        validate_rpc(&self.rpc)?;
        validate_dashboard(&self.dashboard)?;

        Ok(())
    }

    pub fn example_yaml() -> &'static str {
        include_str!("../config.yaml.example")
    }
}

fn validate_rpc(cfg: &RpcConfig) -> Result<(), ConfigError> {
    let url = cfg.base_url.trim();
    if url.is_empty() {
        return Err(ConfigError::Validation(
            "rpc.base_url не должен быть пустым".to_string(),
        ));
    }
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(ConfigError::Validation(format!(
            "rpc.base_url '{url}' должен начинаться с http:// или https://"
        )));
    }
    if cfg.timeout.is_zero() {
        return Err(ConfigError::Validation(
            "rpc.timeout должен быть > 0".to_string(),
        ));
    }
    Ok(())
}

fn validate_dashboard(cfg: &DashboardConfig) -> Result<(), ConfigError> {
    if cfg.poll_interval < Duration::from_millis(100) {
        return Err(ConfigError::Validation(
            "dashboard.poll_interval должно быть >= 100ms".to_string(),
        ));
    }
    if cfg.history_limit < 1 {
        return Err(ConfigError::Validation(
            "dashboard.history_limit должно быть >= 1".to_string(),
        ));
    }
    Ok(())
}

const fn default_rpc_timeout() -> Duration {
    Duration::from_secs(10)
}

const fn default_poll_interval() -> Duration {
    Duration::from_millis(3000)
}

const fn default_render_delay() -> Duration {
    Duration::from_millis(1000)
}

const fn default_replay_delay() -> Duration {
    Duration::from_millis(100)
}

const fn default_history_limit() -> usize {
    50
}
