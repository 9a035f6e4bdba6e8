//! `tally init [--force]`

use anyhow::{Context, Result};
use clap::Args;

use tally_core::config;

use super::Global;

/// Write a starter config file.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Overwrite an existing config file.
    #[arg(long)]
    pub force: bool,
}

impl InitArgs {
    pub fn run(self, global: &Global) -> Result<()> {
        let path = global.config_path()?;
        config::write_template(&path, self.force)
            .with_context(|| format!("failed to write config to '{}'", path.display()))?;

        println!("✓ Wrote starter config to {}", path.display());
        println!("  Fill in the github and store sections, then run `tally config` to check it.");
        Ok(())
    }
}
