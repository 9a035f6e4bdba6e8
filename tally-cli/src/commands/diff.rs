//! `tally diff <kind>`: show the unified diff a run would commit.

use anyhow::{Context, Result};
use clap::Args;

use tally_core::{config, DatasetKind};
use tally_sync::http::HttpClient;
use tally_sync::{pipeline, sink};

use super::Global;

/// Arguments for `tally diff`.
#[derive(Args, Debug)]
pub struct DiffArgs {
    /// Dataset to preview: applications | themes.
    pub kind: DatasetKind,
}

impl DiffArgs {
    pub fn run(self, global: &Global) -> Result<()> {
        tally_daemon::init_tracing(global.log_json);
        let path = global.config_path()?;
        let config = config::load_from(&path).context("failed to load config")?;
        let http = HttpClient::new(config.http.timeout(), &config.github.user_agent);
        let sink = sink::error_sink(&http, &config.reporting).context("invalid reporting config")?;

        let diff = pipeline::diff(&config, self.kind, sink.as_ref())
            .with_context(|| format!("diff failed for '{}'", self.kind))?;

        if diff.is_empty() {
            println!("No differences for '{}' ({}).", diff.kind, diff.path);
            return Ok(());
        }

        print!("{}", diff.unified_diff);
        if !diff.unified_diff.ends_with('\n') {
            println!();
        }
        println!(
            "{} entries, {} matched, {} changed, {} unmatched",
            diff.report.entries,
            diff.report.matched,
            diff.report.changed,
            diff.report.unmatched.len()
        );
        Ok(())
    }
}
