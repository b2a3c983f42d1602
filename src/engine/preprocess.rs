use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::bucket::{Bucket, HOURS};
use crate::schema::MetricSchema;

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%Y.%m.%d", "%Y%m%d", "%Y年%m月%d日"];
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y/%m/%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M",
];
const NON_NUMERIC_LITERALS: &[&str] = &["n/a", "na", "none", "null", "nan", "∞", "+∞", "-∞"];

#[derive(Debug, Clone, Default)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
    /// Lines skipped for extra fields or invalid UTF-8.
    pub malformed_lines: usize,
}

impl RawTable {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<Option<String>>>) -> Self {
        Self {
            headers,
            rows,
            malformed_lines: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalRecord {
    pub date: NaiveDate,
    pub bucket: Bucket,
    pub metadata: BTreeMap<String, String>,
    pub metrics: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreprocessReport {
    pub rows_read: usize,
    pub malformed_lines: usize,
    pub renamed_columns: Vec<String>,
    pub ignored_columns: Vec<String>,
    pub dropped_missing_fields: usize,
    pub dropped_unparseable_time: usize,
    pub dropped_key_metrics: usize,
    pub non_numeric_cells: usize,
    pub rows_kept: usize,
}

pub struct FieldParser {
    first_integer: Regex,
}

impl FieldParser {
    pub fn new() -> Result<Self> {
        Ok(Self {
            first_integer: Regex::new(r"(\d+)").context("failed to compile hour regex")?,
        })
    }

    /// First integer in the cell, e.g. `10点` and `10:00-11:00` both give 10.
    pub fn parse_hour(&self, raw: &str) -> Option<u8> {
        let digits = self.first_integer.captures(raw)?.get(1)?.as_str();
        let hour = digits.parse::<u8>().ok()?;
        (hour < HOURS).then_some(hour)
    }

    pub fn parse_date(&self, raw: &str) -> Option<NaiveDate> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }

        for format in DATE_FORMATS {
            if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
                return Some(date);
            }
        }
        for format in DATETIME_FORMATS {
            if let Ok(datetime) = NaiveDateTime::parse_from_str(trimmed, format) {
                return Some(datetime.date());
            }
        }
        DateTime::parse_from_rfc3339(trimmed)
            .ok()
            .map(|datetime| datetime.date_naive())
    }

    pub fn parse_metric_value(&self, raw: &str) -> Option<f64> {
        let mut cleaned: String = raw
            .trim()
            .chars()
            .filter(|ch| !matches!(*ch, ',' | '¥' | '￥' | '$') && !ch.is_whitespace())
            .collect();
        if cleaned.is_empty() || NON_NUMERIC_LITERALS.contains(&cleaned.to_lowercase().as_str()) {
            return None;
        }

        let mut scale = 1.0;
        if let Some(stripped) = cleaned.strip_suffix('%') {
            cleaned = stripped.to_string();
        } else if let Some(stripped) = cleaned.strip_suffix('万') {
            cleaned = stripped.to_string();
            scale = 10_000.0;
        }

        let value = cleaned.parse::<f64>().ok()? * scale;
        value.is_finite().then_some(value)
    }
}

pub fn read_table(path: &Path) -> Result<RawTable> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    let delimiter = match extension.as_str() {
        "csv" => b',',
        "tsv" => b'\t',
        other => bail!(
            "unsupported history format `{other}` for {}; export the sheet as .csv or .tsv",
            path.display()
        ),
    };

    let file =
        File::open(path).with_context(|| format!("failed to open history {}", path.display()))?;
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_reader(file);

    let headers: Vec<String> = reader
        .headers()
        .with_context(|| format!("failed to read header row of {}", path.display()))?
        .iter()
        .map(|header| header.trim_start_matches('\u{feff}').trim().to_string())
        .collect();
    if headers.iter().all(String::is_empty) {
        bail!("history file {} has no header row", path.display());
    }

    let mut table = RawTable::new(headers, Vec::new());
    for (line, record) in reader.byte_records().enumerate() {
        let record = record
            .with_context(|| format!("failed to read record {} of {}", line + 1, path.display()))?;
        if record.len() > table.headers.len() {
            table.malformed_lines += 1;
            continue;
        }

        let cells: std::result::Result<Vec<&str>, _> =
            record.iter().map(std::str::from_utf8).collect();
        let Ok(cells) = cells else {
            warn!(record = line + 1, path = %path.display(), "record is not valid UTF-8, skipping");
            table.malformed_lines += 1;
            continue;
        };

        let mut row: Vec<Option<String>> =
            cells.into_iter().map(|cell| Some(cell.to_string())).collect();
        row.resize(table.headers.len(), None);
        table.rows.push(row);
    }

    info!(
        path = %path.display(),
        rows = table.rows.len(),
        columns = table.headers.len(),
        malformed_lines = table.malformed_lines,
        "read history table"
    );

    Ok(table)
}

enum ColumnRole {
    Date,
    Hour,
    Operator,
    Metric(String),
    Metadata(String),
    Ignored,
}

fn plan_columns(
    schema: &MetricSchema,
    headers: &[String],
    report: &mut PreprocessReport,
) -> Vec<ColumnRole> {
    let mut seen = HashSet::new();
    let mut plan = Vec::with_capacity(headers.len());

    for header in headers {
        let canonical = schema.canonical(header).to_string();
        if canonical != *header {
            report.renamed_columns.push(format!("{header} -> {canonical}"));
        }
        if !seen.insert(canonical.clone()) {
            warn!(column = %header, canonical = %canonical, "duplicate column after aliasing, ignoring");
            report.ignored_columns.push(header.clone());
            plan.push(ColumnRole::Ignored);
            continue;
        }

        let role = if canonical == schema.fields.date {
            ColumnRole::Date
        } else if canonical == schema.fields.hour {
            ColumnRole::Hour
        } else if canonical == schema.fields.operator {
            ColumnRole::Operator
        } else if canonical == schema.fields.weekday {
            // Derived from the date instead.
            ColumnRole::Ignored
        } else if schema.kind_of(&canonical).is_some() {
            ColumnRole::Metric(canonical)
        } else if canonical.is_empty() {
            ColumnRole::Ignored
        } else {
            ColumnRole::Metadata(canonical)
        };
        plan.push(role);
    }

    plan
}

pub fn preprocess(
    schema: &MetricSchema,
    parser: &FieldParser,
    table: &RawTable,
) -> Result<(Vec<HistoricalRecord>, PreprocessReport)> {
    let mut report = PreprocessReport {
        rows_read: table.rows.len(),
        malformed_lines: table.malformed_lines,
        ..PreprocessReport::default()
    };

    let plan = plan_columns(schema, &table.headers, &mut report);
    if !report.renamed_columns.is_empty() {
        info!(columns = %report.renamed_columns.join(", "), "renamed aliased columns");
    }

    let required = [
        (
            &schema.fields.date,
            plan.iter().any(|role| matches!(role, ColumnRole::Date)),
        ),
        (
            &schema.fields.hour,
            plan.iter().any(|role| matches!(role, ColumnRole::Hour)),
        ),
        (
            &schema.fields.operator,
            plan.iter().any(|role| matches!(role, ColumnRole::Operator)),
        ),
    ];
    for (field, present) in required {
        if !present {
            bail!("history is missing required column `{field}`");
        }
    }
    for metric in &schema.key_financial_metrics {
        let present = plan
            .iter()
            .any(|role| matches!(role, ColumnRole::Metric(name) if name == metric));
        if !present {
            bail!("history is missing key financial metric column `{metric}`");
        }
    }

    let mut records = Vec::with_capacity(table.rows.len());
    for row in &table.rows {
        let mut date_raw = None;
        let mut hour_raw = None;
        let mut operator = None;
        let mut metadata = BTreeMap::new();
        let mut metrics = BTreeMap::new();

        for (role, cell) in plan.iter().zip(row) {
            let Some(cell) = cell.as_deref().filter(|cell| !schema.is_null_marker(cell)) else {
                continue;
            };
            match role {
                ColumnRole::Date => date_raw = Some(cell),
                ColumnRole::Hour => hour_raw = Some(cell),
                ColumnRole::Operator => operator = Some(cell.trim().to_string()),
                ColumnRole::Metric(name) => match parser.parse_metric_value(cell) {
                    Some(value) => {
                        metrics.insert(name.clone(), value);
                    }
                    None => report.non_numeric_cells += 1,
                },
                ColumnRole::Metadata(name) => {
                    metadata.insert(name.clone(), cell.trim().to_string());
                }
                ColumnRole::Ignored => {}
            }
        }

        let (Some(date_raw), Some(hour_raw), Some(operator)) = (date_raw, hour_raw, operator)
        else {
            report.dropped_missing_fields += 1;
            continue;
        };

        let (Some(date), Some(hour)) = (parser.parse_date(date_raw), parser.parse_hour(hour_raw))
        else {
            report.dropped_unparseable_time += 1;
            continue;
        };

        let key_metrics_valid = schema
            .key_financial_metrics
            .iter()
            .all(|metric| metrics.get(metric).is_some_and(|value| *value != 0.0));
        if !key_metrics_valid {
            report.dropped_key_metrics += 1;
            continue;
        }

        let weekday = date.weekday().num_days_from_monday() as u8;
        metadata.insert(schema.fields.operator.clone(), operator);
        records.push(HistoricalRecord {
            date,
            bucket: Bucket::new(weekday, hour)?,
            metadata,
            metrics,
        });
    }

    report.rows_kept = records.len();
    info!(
        rows_read = report.rows_read,
        malformed_lines = report.malformed_lines,
        dropped_missing_fields = report.dropped_missing_fields,
        dropped_unparseable_time = report.dropped_unparseable_time,
        dropped_key_metrics = report.dropped_key_metrics,
        non_numeric_cells = report.non_numeric_cells,
        rows_kept = report.rows_kept,
        "preprocessed history"
    );

    Ok((records, report))
}
