// SPDX-FileCopyrightText: 2025 AyaSanae
//
// SPDX-License-Identifier: GPL-3.0-only

use std::path::{Path, PathBuf};

pub mod config;
pub mod ebpf;
pub mod monitor;
pub mod table;

/// Where iproute2 pins tc maps; kept so existing tooling finds the table.
pub const DEFAULT_MAP_PATH: &str = "/sys/fs/bpf/tc/globals/congestion_reg";
pub const MAP_PATH_ENV: &str = "CONGESTION_MAP_PATH";

/// Table location given on the command line or in the environment, in that
/// order of precedence. `None` means the config file decides.
pub fn map_path_override(cli: Option<&str>, env: Option<String>) -> Option<PathBuf> {
    match (cli, env) {
        (Some(path), _) => Some(PathBuf::from(path)),
        (None, Some(path)) if !path.is_empty() => Some(PathBuf::from(path)),
        _ => None,
    }
}

/// Table location for the control commands. The config file is only read
/// (and created) when no override was given.
pub fn control_map_path(
    map_override: Option<PathBuf>,
    config_path: Option<&Path>,
) -> Result<PathBuf, anyhow::Error> {
    match map_override {
        Some(path) => Ok(path),
        None => Ok(PathBuf::from(
            config::create_or_read_config(config_path)?.map_path,
        )),
    }
}
