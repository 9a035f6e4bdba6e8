//! `tally daemon`: run on a fixed interval until ctrl-c.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;

use tally_daemon::{start_blocking, DaemonOptions};

use super::Global;

#[derive(Args, Debug)]
pub struct DaemonArgs {
    /// Run a single pass and exit; non-zero if any dataset failed.
    #[arg(long)]
    pub once: bool,

    /// Seconds between runs, overriding `schedule.interval_secs`.
    #[arg(long, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..))]
    pub interval: Option<u64>,

    /// Reconcile and report without committing.
    #[arg(long)]
    pub dry_run: bool,
}

impl DaemonArgs {
    pub fn run(self, global: &Global) -> Result<()> {
        let path = global.config_path()?;
        let options = DaemonOptions {
            interval: self.interval.map(Duration::from_secs),
            once: self.once,
            dry_run: self.dry_run,
            json_logs: global.log_json,
        };
        start_blocking(&path, options).context("daemon exited with error")?;
        Ok(())
    }
}
