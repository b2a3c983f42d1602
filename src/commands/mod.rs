pub mod diagnose;
pub mod errors;
pub mod export;
pub mod init;
pub mod status;

use std::io::{self, Write};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::cli::EngineArgs;
use crate::engine::BaselineEngine;
use crate::schema::MetricSchema;

fn open_engine(args: &EngineArgs) -> Result<BaselineEngine> {
    let schema = MetricSchema::load_or_default(args.schema_path.as_deref())?;
    BaselineEngine::open(schema, &args.state_dir)
}

fn write_json_stdout<T: Serialize>(value: &T) -> Result<()> {
    let mut output = io::BufWriter::new(io::stdout().lock());
    serde_json::to_writer_pretty(&mut output, value).context("failed to serialize json output")?;
    writeln!(output)?;
    output.flush()?;
    Ok(())
}
