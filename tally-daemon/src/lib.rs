//! Scheduled reconciliation: runs the sync pipeline on a fixed interval
//! until interrupted.

mod error;
mod runtime;

pub use error::DaemonError;
pub use runtime::{
    init_tracing, run, schedule, start_blocking, sync_once, DaemonOptions, SyncSummary,
};
