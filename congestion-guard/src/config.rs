// SPDX-FileCopyrightText: 2025 AyaSanae
//
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    fs::{self},
    path::{Path, PathBuf},
};

use anyhow::{Context, anyhow};
use clap::ValueEnum;
use dirs::home_dir;
use serde::{Deserialize, Serialize};

use crate::DEFAULT_MAP_PATH;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Hook {
    #[default]
    Tc,
    Xdp,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub attach_iface: String,
    pub hook: Hook,
    pub threshold: u32,
    /// Counter reset period in milliseconds, 0 keeps a free-running counter.
    pub reset_interval_ms: u64,
    pub stats_interval: u64,
    pub map_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            attach_iface: "eno1".to_string(),
            hook: Hook::Tc,
            threshold: 1000,
            reset_interval_ms: 0,
            stats_interval: 10,
            map_path: DEFAULT_MAP_PATH.to_string(),
        }
    }
}

pub fn parse_config(content: &str) -> Result<Config, anyhow::Error> {
    toml::from_str(content).map_err(|e| anyhow!("Failed to parse config file:\n \t{e}"))
}

pub fn create_or_read_config(path: Option<&Path>) -> Result<Config, anyhow::Error> {
    let config_path = match path {
        Some(path) => path.to_path_buf(),
        None => get_config_path()?,
    };
    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory at {parent:?}"))?;
    }

    match fs::read_to_string(&config_path) {
        Ok(content) => parse_config(&content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let config = Config::default();
            let toml = toml::to_string(&config)
                .map_err(|e| anyhow!("Failed to serialize default config: {e}"))?;
            fs::write(&config_path, toml)
                .with_context(|| format!("Failed to write config file at {config_path:?}"))?;
            Ok(config)
        }
        Err(e) => Err(anyhow!("Failed to read config file: {}", e)),
    }
}

fn get_config_path() -> Result<PathBuf, anyhow::Error> {
    home_dir()
        .map(|mut path| {
            path.push(".config");
            path.push("congestion_guard");
            path.push("config.toml");
            path
        })
        .ok_or_else(|| anyhow!("HOME dir not found"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config = parse_config("threshold = 42\nhook = \"xdp\"\n").unwrap();
        assert_eq!(config.threshold, 42);
        assert_eq!(config.hook, Hook::Xdp);
        assert_eq!(config.attach_iface, "eno1");
        assert_eq!(config.map_path, DEFAULT_MAP_PATH);
        assert_eq!(config.reset_interval_ms, 0);
    }

    #[test]
    fn default_config_survives_serialization() {
        let toml = toml::to_string(&Config::default()).unwrap();
        assert_eq!(parse_config(&toml).unwrap(), Config::default());
    }

    #[test]
    fn unknown_hook_is_rejected() {
        assert!(parse_config("hook = \"kprobe\"").is_err());
    }

    #[test]
    fn negative_threshold_is_rejected() {
        assert!(parse_config("threshold = -1").is_err());
    }
}
