//! Subcommand implementations. Each exposes an `Args` struct with a `run` method.

pub mod config;
pub mod daemon;
pub mod diff;
pub mod init;
pub mod run;

use std::path::PathBuf;

use anyhow::{Context, Result};

use tally_core::config::config_path_at;

/// Flags shared by every subcommand.
#[derive(Debug, Clone, Default)]
pub struct Global {
    pub config: Option<PathBuf>,
    pub log_json: bool,
}

impl Global {
    /// `--config`, or `~/.tally/config.yaml`.
    pub fn config_path(&self) -> Result<PathBuf> {
        match &self.config {
            Some(path) => Ok(path.clone()),
            None => {
                let home = dirs::home_dir().context("could not determine home directory")?;
                Ok(config_path_at(&home))
            }
        }
    }
}
