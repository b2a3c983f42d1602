use std::io::{self, Write};

use anyhow::Result;
use tracing::info;

use super::open_engine;
use crate::cli::ErrorsArgs;

pub fn run(args: ErrorsArgs) -> Result<()> {
    let engine = open_engine(&args.engine)?;
    let log = engine.error_log();
    let entries = log.recent(args.limit)?;

    info!(path = %log.path().display(), entries = entries.len(), "error log");

    let mut output = io::BufWriter::new(io::stdout().lock());
    for entry in &entries {
        writeln!(
            output,
            "{}\t{}\t{}\t{}",
            entry.timestamp, entry.level, entry.message, entry.details
        )?;
    }
    output.flush()?;

    Ok(())
}
