//! `tally run`: reconcile and commit download counts once.

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use tally_core::{config, DatasetKind, FailurePolicy};
use tally_sync::http::HttpClient;
use tally_sync::pipeline::{self, DatasetSummary, RunOptions, RunSummary, SyncScope};
use tally_sync::sink;

use super::Global;

/// Arguments for `tally run`.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Only reconcile this dataset (applications | themes).
    #[arg(long)]
    pub kind: Option<DatasetKind>,

    /// Reconcile and report without committing anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Stop at the first failing dataset, overriding `failure_policy`.
    #[arg(long)]
    pub fail_fast: bool,

    /// Emit the run summary as JSON.
    #[arg(long)]
    pub json: bool,
}

impl RunArgs {
    pub fn run(self, global: &Global) -> Result<()> {
        tally_daemon::init_tracing(global.log_json);
        let path = global.config_path()?;
        let config = config::load_from(&path).context("failed to load config")?;
        let http = HttpClient::new(config.http.timeout(), &config.github.user_agent);
        let sink = sink::error_sink(&http, &config.reporting).context("invalid reporting config")?;

        let options = RunOptions {
            scope: self.kind.map_or(SyncScope::All, SyncScope::Dataset),
            dry_run: self.dry_run,
            policy: self.fail_fast.then_some(FailurePolicy::FailFast),
        };
        let report = pipeline::run(&config, options, sink.as_ref()).context("sync run failed")?;
        let summary = report.summary();

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&summary).context("failed to serialize run summary")?
            );
        } else {
            print_table(&summary);
        }

        let failed = report.failures().count();
        if failed > 0 {
            bail!("{failed} of {} dataset(s) failed", report.outcomes.len());
        }
        Ok(())
    }
}

#[derive(Tabled)]
struct RunTableRow {
    #[tabled(rename = "dataset")]
    kind: String,
    #[tabled(rename = "result")]
    result: String,
    #[tabled(rename = "entries")]
    entries: usize,
    #[tabled(rename = "matched")]
    matched: usize,
    #[tabled(rename = "changed")]
    changed: usize,
    #[tabled(rename = "unmatched")]
    unmatched: usize,
    #[tabled(rename = "detail")]
    detail: String,
}

fn print_table(summary: &RunSummary) {
    let prefix = if summary.dry_run { "[dry-run] " } else { "" };
    let synced = summary.datasets.iter().filter(|d| d.status == "synced").count();
    println!(
        "{prefix}Tally v{} | {} datasets | {} synced | policy {}",
        env!("CARGO_PKG_VERSION"),
        summary.datasets.len(),
        synced,
        summary.policy,
    );

    let rows: Vec<RunTableRow> = summary
        .datasets
        .iter()
        .map(|d| RunTableRow {
            kind: d.kind.to_string(),
            result: result_label(d).to_string(),
            entries: d.entries,
            matched: d.matched,
            changed: d.changed,
            unmatched: d.unmatched.len(),
            detail: detail(d),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");

    let failed = summary.datasets.iter().filter(|d| d.status == "failed").count();
    if failed == 0 {
        println!("{} {prefix}all datasets reconciled", "■".green().bold());
    } else {
        println!("{} {failed} dataset(s) failed", "■".red().bold());
    }
}

fn result_label(d: &DatasetSummary) -> &'static str {
    match d.status {
        "synced" => d.outcome.unwrap_or("synced"),
        other => other,
    }
}

fn detail(d: &DatasetSummary) -> String {
    if let Some(error) = &d.error {
        return format!("{}: {error}", d.stage.unwrap_or("error"));
    }
    if let Some(sha) = &d.commit {
        let short: String = sha.chars().take(7).collect();
        return format!("commit {short}");
    }
    if !d.unmatched.is_empty() {
        return format!("unmatched: {}", summarize(&d.unmatched));
    }
    d.path.clone().unwrap_or_default()
}

fn summarize(ids: &[String]) -> String {
    let mut shown: Vec<String> = ids.iter().take(2).cloned().collect();
    if ids.len() > shown.len() {
        shown.push(format!("+{} more", ids.len() - shown.len()));
    }
    shown.join(", ")
}
