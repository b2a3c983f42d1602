use std::fs;
use std::io::{self, Write};

use anyhow::{Context, Result, bail};
use serde_json::Value;

use super::{open_engine, write_json_stdout};
use crate::cli::DiagnoseArgs;
use crate::model::DiagnosisResult;

pub fn run(args: DiagnoseArgs) -> Result<()> {
    let raw = match (&args.query, &args.query_path) {
        (Some(inline), None) => inline.clone(),
        (None, Some(path)) => fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        _ => bail!("pass exactly one of --query or --query-path"),
    };
    let query: Value = serde_json::from_str(&raw).context("diagnosis query is not valid JSON")?;

    let engine = open_engine(&args.engine)?;
    let result = engine.diagnose_json(&query)?;

    if args.json {
        return write_json_stdout(&result);
    }
    write_text_response(&result)
}

fn write_text_response(result: &DiagnosisResult) -> Result<()> {
    let mut output = io::BufWriter::new(io::stdout().lock());

    writeln!(output, "Diagnosed: {}", result.diagnosed_at)?;
    writeln!(output, "Bucket: {}", result.bucket_label)?;
    writeln!(
        output,
        "Inputs: total={} evaluated={} skipped={} success_rate={:.1}%",
        result.summary.total_inputs,
        result.summary.evaluated,
        result.summary.skipped,
        result.summary.success_rate
    )?;

    for (name, evaluation) in &result.evaluations {
        let baseline = evaluation
            .baseline
            .map(|value| format!("{value:.2}"))
            .unwrap_or_else(|| "none".to_string());
        writeln!(
            output,
            "{}\t{}\tcoefficient={:.2}\tobserved={}\tbaseline={}",
            name, evaluation.grade, evaluation.coefficient, evaluation.observed, baseline
        )?;
        writeln!(output, "\tmethod: {}", evaluation.method)?;
        if let Some(progress) = evaluation.standard_progress {
            writeln!(output, "\tstandard_progress: {:.1}%", progress * 100.0)?;
        }
    }

    for skipped in &result.classification.skipped {
        writeln!(output, "skipped\t{} ({})", skipped.metric, skipped.reason.as_str())?;
    }

    output.flush()?;
    Ok(())
}
