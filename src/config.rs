// Copyright (c) 2024 The devcg-manager Authors
//
// SPDX-License-Identifier: Apache-2.0
//

use std::fs;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};

const QUEUE_SIZE_FLAG: &str = "devmgr.queue_size";
const STATE_DIR_FLAG: &str = "devmgr.state_dir";
const LOG_LEVEL_FLAG: &str = "devmgr.log";

const DEFAULT_QUEUE_SIZE: usize = 64;
const DEFAULT_LOG_LEVEL: slog::Level = slog::Level::Info;

/// Tunables for the device manager.
#[derive(Clone, Debug)]
pub struct ManagerConfig {
    /// Capacity of the command queue feeding the manager task.
    pub queue_size: usize,
    /// Where device access state checkpoints will live. Reserved: the
    /// manager does not write checkpoints yet.
    pub state_dir: Option<PathBuf>,
    /// Level the owning agent should cap the manager's logger at.
    pub log_level: slog::Level,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        ManagerConfig {
            queue_size: DEFAULT_QUEUE_SIZE,
            state_dir: None,
            log_level: DEFAULT_LOG_LEVEL,
        }
    }
}

impl ManagerConfig {
    /// Builds a config from a kernel-cmdline-style file: space-separated
    /// `key=value` parameters, unknown keys ignored.
    pub fn from_cmdline(file: &str) -> Result<ManagerConfig> {
        let mut config = ManagerConfig::default();
        let cmdline = fs::read_to_string(file)
            .with_context(|| format!("failed to read params from '{}'", file))?;

        for param in cmdline.split_ascii_whitespace() {
            let (key, value) = match param.split_once('=') {
                Some(kv) => kv,
                None => continue,
            };

            match key {
                QUEUE_SIZE_FLAG => {
                    config.queue_size = parse_queue_size(value)?;
                }
                STATE_DIR_FLAG => {
                    config.state_dir = Some(PathBuf::from(value));
                }
                LOG_LEVEL_FLAG => {
                    config.log_level = parse_log_level(value)?;
                }
                _ => (),
            }
        }

        Ok(config)
    }
}

fn parse_queue_size(value: &str) -> Result<usize> {
    let size = value
        .parse::<usize>()
        .with_context(|| format!("invalid queue size '{}'", value))?;

    if size == 0 {
        return Err(anyhow!("queue size must be greater than zero"));
    }

    Ok(size)
}

// Accepts the logrus level names used across the agent's boot parameters.
fn parse_log_level(level: &str) -> Result<slog::Level> {
    match level {
        "fatal" | "panic" | "critical" => Ok(slog::Level::Critical),
        "error" => Ok(slog::Level::Error),
        "warn" | "warning" => Ok(slog::Level::Warning),
        "info" => Ok(slog::Level::Info),
        "debug" => Ok(slog::Level::Debug),
        "trace" => Ok(slog::Level::Trace),
        _ => Err(anyhow!("invalid log level '{}'", level)),
    }
}
