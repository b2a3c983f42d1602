use anyhow::Result;
use tracing::{info, warn};

use super::{open_engine, write_json_stdout};
use crate::cli::StatusArgs;

pub fn run(args: StatusArgs) -> Result<()> {
    let engine = open_engine(&args.engine)?;
    let status = engine.status();

    if args.json {
        return write_json_stdout(&status);
    }

    info!(
        state_dir = %status.state_dir,
        initialized = status.initialized,
        data_pool = status.data_pool_size,
        baseline_buckets = status.baseline_buckets,
        progress_buckets = status.progress_buckets,
        additive_metrics = status.metrics.additive,
        ratio_metrics = status.metrics.ratio,
        total_metrics = status.metrics.total,
        saved_at = %status.saved_at.clone().unwrap_or_default(),
        "engine status"
    );

    match &status.source {
        Some(source) => info!(
            path = %source.path,
            sha256 = %source.sha256,
            rows_read = source.rows_read,
            "history source"
        ),
        None => warn!("no history source recorded"),
    }

    Ok(())
}
