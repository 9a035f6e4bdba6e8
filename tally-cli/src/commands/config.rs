//! `tally config`: print the resolved configuration with secrets redacted.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use tally_core::config;

use super::Global;

#[derive(Args, Debug)]
pub struct ConfigArgs {}

impl ConfigArgs {
    pub fn run(self, global: &Global) -> Result<()> {
        let path = global.config_path()?;
        let mut resolved = config::read_from(&path)
            .with_context(|| format!("failed to read config at '{}'", path.display()))?;
        resolved.apply_env_overrides();

        println!("# {}", path.display());
        print!(
            "{}",
            config::to_yaml(&resolved.redacted()).context("failed to render config")?
        );

        resolved
            .validate()
            .with_context(|| format!("config at '{}' cannot drive a run", path.display()))?;
        eprintln!("{} config is valid", "✓".green().bold());
        Ok(())
    }
}
