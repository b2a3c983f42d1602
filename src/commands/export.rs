use anyhow::Result;
use tracing::info;

use super::open_engine;
use crate::cli::ExportArgs;

pub fn run(args: ExportArgs) -> Result<()> {
    let engine = open_engine(&args.engine)?;
    let output_dir = args
        .output_dir
        .unwrap_or_else(|| args.engine.state_dir.join("exports"));

    let paths = engine.export(&output_dir)?;
    info!(csv = %paths.csv_path, json = %paths.json_path, "export completed");

    Ok(())
}
