use std::io::{self, Write};

use anyhow::Result;
use tracing::info;

use super::{open_engine, write_json_stdout};
use crate::cli::InitArgs;
use crate::model::InitializeReport;

pub fn run(args: InitArgs) -> Result<()> {
    let mut engine = open_engine(&args.engine)?;

    info!(history = %args.history.display(), "initializing baseline model");
    let report = engine.initialize(&args.history)?;

    if args.json {
        return write_json_stdout(&report);
    }
    write_text_report(&report)
}

fn write_text_report(report: &InitializeReport) -> Result<()> {
    let counts = &report.preprocess;
    let mut output = io::BufWriter::new(io::stdout().lock());

    writeln!(
        output,
        "Rows: read={} kept={} malformed_lines={}",
        counts.rows_read, counts.rows_kept, counts.malformed_lines
    )?;
    writeln!(
        output,
        "Dropped: missing_fields={} unparseable_time={} key_metrics={} non_numeric_cells={}",
        counts.dropped_missing_fields,
        counts.dropped_unparseable_time,
        counts.dropped_key_metrics,
        counts.non_numeric_cells
    )?;
    if !counts.renamed_columns.is_empty() {
        writeln!(output, "Renamed: {}", counts.renamed_columns.join(", "))?;
    }
    if !counts.ignored_columns.is_empty() {
        writeln!(output, "Ignored: {}", counts.ignored_columns.join(", "))?;
    }
    writeln!(
        output,
        "Coverage: baseline_buckets={} progress_buckets={} persisted={}",
        report.baseline_buckets, report.progress_buckets, report.persisted
    )?;

    output.flush()?;
    Ok(())
}
