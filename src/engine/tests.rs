use std::collections::BTreeMap;

use chrono::{Datelike, Duration, NaiveDate};
use serde_json::json;

use super::diagnose::{DiagnosisQuery, QueryValue};
use super::*;
use crate::model::SkipReason;
use crate::schema::{MetricKind, StructuralFields};

pub(crate) fn test_schema() -> MetricSchema {
    MetricSchema {
        aliases: BTreeMap::from([
            ("cost".to_string(), "spend".to_string()),
            ("ad_roi".to_string(), "roi".to_string()),
        ]),
        additive_metrics: vec!["spend".to_string(), "gmv".to_string(), "orders".to_string()],
        ratio_metrics: vec!["roi".to_string(), "aov".to_string()],
        key_financial_metrics: vec!["spend".to_string(), "gmv".to_string()],
        fields: StructuralFields {
            date: "date".to_string(),
            hour: "hour".to_string(),
            operator: "operator".to_string(),
            weekday: "weekday".to_string(),
        },
        metadata_fields: vec!["session".to_string()],
        null_markers: vec!["-".to_string()],
    }
}

pub(crate) fn record(date: &str, hour: u8, metrics: &[(&str, f64)]) -> HistoricalRecord {
    let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").expect("valid test date");
    let weekday = date.weekday().num_days_from_monday() as u8;
    HistoricalRecord {
        date,
        bucket: Bucket::new(weekday, hour).expect("valid test bucket"),
        metadata: BTreeMap::from([("operator".to_string(), "host-a".to_string())]),
        metrics: metrics
            .iter()
            .map(|(name, value)| ((*name).to_string(), *value))
            .collect(),
    }
}

fn raw_table(headers: &[&str], rows: &[Vec<String>]) -> RawTable {
    RawTable::new(
        headers.iter().map(|header| (*header).to_string()).collect(),
        rows.iter()
            .map(|row| row.iter().map(|cell| Some(cell.clone())).collect())
            .collect(),
    )
}

fn row(cells: &[&str]) -> Vec<String> {
    cells.iter().map(|cell| (*cell).to_string()).collect()
}

const HEADERS: &[&str] = &["date", "hour", "operator", "spend", "gmv", "orders", "roi"];

fn open_engine(dir: &tempfile::TempDir) -> BaselineEngine {
    BaselineEngine::open(test_schema(), dir.path()).expect("engine should open")
}

// Ten Tuesdays at 14:00 with spend 100, 110, ..., 190.
fn ten_tuesdays() -> RawTable {
    let first = NaiveDate::from_ymd_opt(2026, 1, 6).expect("valid date");
    let rows: Vec<Vec<String>> = (0..10)
        .map(|week| {
            let date = first + Duration::weeks(week);
            let spend = 100 + 10 * week;
            vec![
                date.format("%Y-%m-%d").to_string(),
                "14".to_string(),
                "host-a".to_string(),
                spend.to_string(),
                "500".to_string(),
                "0".to_string(),
                "2.0".to_string(),
            ]
        })
        .collect();
    raw_table(HEADERS, &rows)
}

fn tuesday(hour: u8) -> Bucket {
    Bucket::new(1, hour).expect("valid bucket")
}

#[test]
fn exact_bucket_mean_grades_additive_metric() {
    let dir = tempfile::tempdir().expect("failed to create tempdir");
    let mut engine = open_engine(&dir);
    engine
        .initialize_from_table(&ten_tuesdays(), None)
        .expect("initialize");

    assert_eq!(engine.baseline_table().get(tuesday(14), "spend"), Some(145.0));

    let result = engine
        .diagnose(&DiagnosisQuery::new(tuesday(14)).with_metric("spend", 200.0))
        .expect("diagnose");
    let spend = &result.evaluations["spend"];

    assert!((spend.coefficient - 200.0 / 145.0).abs() < 1e-12);
    assert_eq!(spend.grade, Grade::Good);
    assert_eq!(spend.fallback, Some(FallbackTier::Exact));
    assert_eq!(spend.baseline, Some(145.0));
    assert_eq!(spend.standard_progress, Some(1.0));
    assert_eq!(result.classification.dynamic, vec!["spend".to_string()]);
    assert_eq!(result.bucket_label, "Tuesday 14:00");
}

#[test]
fn missing_bucket_falls_back_to_same_hour_on_another_weekday() {
    let dir = tempfile::tempdir().expect("failed to create tempdir");
    let mut engine = open_engine(&dir);
    let table = raw_table(
        HEADERS,
        &[row(&["2026-01-08", "9", "host-a", "50", "120", "3", "2.4"])],
    );
    engine.initialize_from_table(&table, None).expect("initialize");

    let wednesday_9 = Bucket::new(2, 9).expect("bucket");
    let result = engine
        .diagnose(&DiagnosisQuery::new(wednesday_9).with_metric("spend", 60.0))
        .expect("diagnose");
    let spend = &result.evaluations["spend"];

    assert_eq!(spend.fallback, Some(FallbackTier::SameHour { weekday: 3 }));
    assert_eq!(spend.baseline, Some(50.0));
    assert_eq!(spend.coefficient, 1.2);
    assert_eq!(spend.grade, Grade::Good);
    assert!(spend.method.starts_with("dynamic("));
}

#[test]
fn ratio_metrics_use_the_tighter_bands() {
    let dir = tempfile::tempdir().expect("failed to create tempdir");
    let mut engine = open_engine(&dir);
    engine
        .initialize_from_table(&ten_tuesdays(), None)
        .expect("initialize");

    let result = engine
        .diagnose(&DiagnosisQuery::new(tuesday(14)).with_metric("roi", 2.3))
        .expect("diagnose");
    let roi = &result.evaluations["roi"];

    assert!((roi.coefficient - 1.15).abs() < 1e-12);
    assert_eq!(roi.grade, Grade::Good);
    assert_eq!(roi.kind, MetricKind::Ratio);
    assert_eq!(roi.standard_progress, None);
    assert_eq!(result.classification.traditional, vec!["roi".to_string()]);
}

#[test]
fn unclassified_metric_is_skipped_and_excluded_from_success_rate() {
    let dir = tempfile::tempdir().expect("failed to create tempdir");
    let mut engine = open_engine(&dir);
    engine
        .initialize_from_table(&ten_tuesdays(), None)
        .expect("initialize");

    let query = DiagnosisQuery::new(tuesday(14))
        .with_metric("spend", 150.0)
        .with_metric("mystery_metric", 3.0);
    let result = engine.diagnose(&query).expect("diagnose");

    assert!(!result.evaluations.contains_key("mystery_metric"));
    assert_eq!(result.summary.total_inputs, 2);
    assert_eq!(result.summary.evaluated, 1);
    assert_eq!(result.summary.skipped, 1);
    assert_eq!(result.summary.success_rate, 50.0);
    assert_eq!(
        result.classification.skipped,
        vec![crate::model::SkippedMetric {
            metric: "mystery_metric".to_string(),
            reason: SkipReason::Unclassified,
        }]
    );
}

#[test]
fn zero_baseline_everywhere_reports_insufficient_data() {
    let dir = tempfile::tempdir().expect("failed to create tempdir");
    let mut engine = open_engine(&dir);
    engine
        .initialize_from_table(&ten_tuesdays(), None)
        .expect("initialize");

    let query = DiagnosisQuery::new(tuesday(14))
        .with_metric("orders", 5.0)
        .with_metric("aov", 0.0);
    let result = engine.diagnose(&query).expect("diagnose");

    let orders = &result.evaluations["orders"];
    assert_eq!(orders.grade, Grade::InsufficientData);
    assert_eq!(orders.coefficient, 1.0);
    assert_eq!(orders.baseline, None);

    assert!(!result.evaluations.contains_key("aov"));
    assert_eq!(result.classification.skipped[0].reason, SkipReason::NoBaseline);
}

#[test]
fn empty_and_non_numeric_values_are_skipped_without_aborting() {
    let dir = tempfile::tempdir().expect("failed to create tempdir");
    let mut engine = open_engine(&dir);
    engine
        .initialize_from_table(&ten_tuesdays(), None)
        .expect("initialize");

    let query = DiagnosisQuery::new(tuesday(14))
        .with_value("spend", QueryValue::Missing)
        .with_value("gmv", QueryValue::Text("lots".to_string()))
        .with_value("cost", QueryValue::Text("¥1,450".to_string()))
        .with_value("roi", QueryValue::Number(f64::NAN));
    let result = engine.diagnose(&query).expect("diagnose");

    let reasons: Vec<(String, SkipReason)> = result
        .classification
        .skipped
        .iter()
        .map(|skipped| (skipped.metric.clone(), skipped.reason))
        .collect();
    assert_eq!(
        reasons,
        vec![
            ("spend".to_string(), SkipReason::EmptyValue),
            ("gmv".to_string(), SkipReason::NotNumeric),
            ("roi".to_string(), SkipReason::NotNumeric),
        ]
    );

    let cost = &result.evaluations["cost"];
    assert_eq!(cost.metric, "spend");
    assert!((cost.coefficient - 10.0).abs() < 1e-12);
    assert_eq!(cost.grade, Grade::Excellent);
}

#[test]
fn diagnosing_an_uninitialized_engine_fails() {
    let dir = tempfile::tempdir().expect("failed to create tempdir");
    let engine = open_engine(&dir);

    assert!(!engine.is_initialized());
    let err = engine
        .diagnose(&DiagnosisQuery::new(tuesday(10)).with_metric("spend", 1.0))
        .expect_err("must fail");
    assert!(err.to_string().contains("not initialized"));
}

#[test]
fn reopened_engine_answers_identically() {
    let dir = tempfile::tempdir().expect("failed to create tempdir");
    let mut engine = open_engine(&dir);
    let table = raw_table(
        HEADERS,
        &[
            row(&["2026-01-06", "10", "host-a", "10.1", "30", "2", "2.97"]),
            row(&["2026-01-06", "11", "host-a", "20.3", "41", "4", "2.02"]),
            row(&["2026-01-07", "10", "host-b", "33.3", "70", "7", "2.1"]),
            row(&["2026-01-13", "10", "host-a", "12.7", "33", "-", "2.6"]),
        ],
    );
    engine.initialize_from_table(&table, None).expect("initialize");

    let query = DiagnosisQuery::new(tuesday(10))
        .with_metric("spend", 13.0)
        .with_metric("orders", 3.0)
        .with_metric("roi", 2.5)
        .with_metric("aov", 8.0)
        .with_metric("unknown", 1.0);
    let before = engine.diagnose(&query).expect("diagnose before reload");

    let reopened = open_engine(&dir);
    assert!(reopened.is_initialized());
    assert_eq!(reopened.baseline_table(), engine.baseline_table());
    assert_eq!(reopened.progress_table(), engine.progress_table());
    assert_eq!(reopened.data_pool(), engine.data_pool());

    let mut after = reopened.diagnose(&query).expect("diagnose after reload");
    after.diagnosed_at = before.diagnosed_at.clone();
    assert_eq!(after, before);
}

#[test]
fn reinitializing_with_identical_input_is_idempotent() {
    let dir = tempfile::tempdir().expect("failed to create tempdir");
    let mut engine = open_engine(&dir);

    engine
        .initialize_from_table(&ten_tuesdays(), None)
        .expect("first initialize");
    let baseline = engine.baseline_table().clone();
    let progress = engine.progress_table().clone();

    engine
        .initialize_from_table(&ten_tuesdays(), None)
        .expect("second initialize");
    assert_eq!(engine.baseline_table(), &baseline);
    assert_eq!(engine.progress_table(), &progress);
}

#[test]
fn failed_rebuild_keeps_previous_model_and_logs_error() {
    let dir = tempfile::tempdir().expect("failed to create tempdir");
    let mut engine = open_engine(&dir);
    engine
        .initialize_from_table(&ten_tuesdays(), None)
        .expect("initialize");

    let all_invalid = raw_table(
        HEADERS,
        &[row(&["2026-01-06", "10", "host-a", "0", "30", "1", "2.0"])],
    );
    let err = engine
        .initialize_from_table(&all_invalid, None)
        .expect_err("zero valid rows must fail");
    assert!(err.to_string().contains("no valid rows"));

    assert!(engine.is_initialized());
    assert_eq!(engine.baseline_table().get(tuesday(14), "spend"), Some(145.0));

    let entries = engine.error_log().recent(5).expect("list errors");
    assert_eq!(entries[0].message, "initialization failed");
}

#[test]
fn failed_first_initialize_leaves_engine_uninitialized() {
    let dir = tempfile::tempdir().expect("failed to create tempdir");
    let mut engine = open_engine(&dir);

    let missing_operator = raw_table(
        &["date", "hour", "spend", "gmv"],
        &[row(&["2026-01-06", "10", "10", "20"])],
    );
    let err = engine
        .initialize_from_table(&missing_operator, None)
        .expect_err("missing column must fail");
    assert!(format!("{err:#}").contains("operator"));
    assert!(!engine.is_initialized());
    assert!(!engine.status().initialized);
}

#[test]
fn preprocessing_cleans_rows_stage_by_stage() {
    let schema = test_schema();
    let parser = FieldParser::new().expect("parser");
    let table = raw_table(
        &["date", "hour", "operator", "cost", "gmv", "roi", "session"],
        &[
            row(&["2026-01-06", "10点", "host-a", "1,000", "2000", "2.0", "s1"]),
            row(&["2026/01/06", "11:00-12:00", "host-a", "500", "900", "-", "s1"]),
            row(&["2026-01-06", "12", "", "500", "900", "1.8", "s1"]),
            row(&["not a date", "13", "host-a", "500", "900", "1.8", "s1"]),
            row(&["2026-01-06", "late", "host-a", "500", "900", "1.8", "s1"]),
            row(&["2026-01-06", "14", "host-a", "0", "900", "1.8", "s1"]),
            row(&["2026-01-06", "15", "host-a", "-", "900", "1.8", "s1"]),
            row(&["2026-01-06", "16", "host-a", "300", "abc", "1.8", "s1"]),
        ],
    );

    let (records, report) = preprocess(&schema, &parser, &table).expect("preprocess");

    assert_eq!(report.rows_read, 8);
    assert_eq!(report.renamed_columns, vec!["cost -> spend".to_string()]);
    assert_eq!(report.dropped_missing_fields, 1);
    assert_eq!(report.dropped_unparseable_time, 2);
    assert_eq!(report.dropped_key_metrics, 3);
    assert_eq!(report.non_numeric_cells, 1);
    assert_eq!(report.rows_kept, 2);

    assert_eq!(records[0].bucket.hour(), 10);
    assert_eq!(records[0].bucket.weekday(), 1);
    assert_eq!(records[0].metrics.get("spend"), Some(&1000.0));
    assert_eq!(records[0].metadata.get("session"), Some(&"s1".to_string()));
    assert_eq!(records[0].metadata.get("operator"), Some(&"host-a".to_string()));
    assert_eq!(records[1].bucket.hour(), 11);
    assert!(!records[1].metrics.contains_key("roi"));
}

#[test]
fn missing_key_financial_column_is_rejected() {
    let schema = test_schema();
    let parser = FieldParser::new().expect("parser");
    let table = raw_table(
        &["date", "hour", "operator", "spend"],
        &[row(&["2026-01-06", "10", "host-a", "10"])],
    );

    let err = preprocess(&schema, &parser, &table).expect_err("must fail");
    assert!(err.to_string().contains("gmv"));
}

#[test]
fn field_parser_handles_decorated_values() {
    let parser = FieldParser::new().expect("parser");

    assert_eq!(parser.parse_hour("10点"), Some(10));
    assert_eq!(parser.parse_hour("09:00-10:00"), Some(9));
    assert_eq!(parser.parse_hour("25"), None);
    assert_eq!(parser.parse_hour("evening"), None);

    assert_eq!(parser.parse_metric_value("¥1,234.5"), Some(1234.5));
    assert_eq!(parser.parse_metric_value("12.5%"), Some(12.5));
    assert_eq!(parser.parse_metric_value("3万"), Some(30000.0));
    assert_eq!(parser.parse_metric_value("N/A"), None);
    assert_eq!(parser.parse_metric_value("inf"), None);
    assert_eq!(parser.parse_metric_value("∞"), None);

    assert_eq!(
        parser.parse_date("2026年1月6日"),
        NaiveDate::from_ymd_opt(2026, 1, 6)
    );
    assert_eq!(
        parser.parse_date("2026-01-06 14:30:00"),
        NaiveDate::from_ymd_opt(2026, 1, 6)
    );
    assert_eq!(parser.parse_date("yesterday"), None);
}

#[test]
fn json_query_derives_bucket_and_drops_metadata() {
    let schema = test_schema();
    let parser = FieldParser::new().expect("parser");
    let value = json!({
        "date": "2026-01-08",
        "weekday": 0,
        "hour": "09:00-10:00",
        "operator": "host-a",
        "session": "evening",
        "spend": "¥1,200",
        "roi": 2.5,
        "gmv": null,
    });

    let query = DiagnosisQuery::from_json(&schema, &parser, &value).expect("query parses");

    assert_eq!(query.bucket, Bucket::new(3, 9).expect("bucket"));
    let names: Vec<&str> = query.metrics.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(names, vec!["gmv", "roi", "spend"]);
    assert_eq!(query.metrics[0].1, QueryValue::Missing);
    assert_eq!(query.metrics[1].1, QueryValue::Number(2.5));
}

#[test]
fn json_query_without_hour_or_weekday_is_rejected() {
    let schema = test_schema();
    let parser = FieldParser::new().expect("parser");

    assert!(DiagnosisQuery::from_json(&schema, &parser, &json!({"weekday": 1, "spend": 1})).is_err());
    assert!(DiagnosisQuery::from_json(&schema, &parser, &json!({"hour": 9, "spend": 1})).is_err());
    assert!(DiagnosisQuery::from_json(&schema, &parser, &json!({"weekday": 7, "hour": 9})).is_err());
    assert!(DiagnosisQuery::from_json(&schema, &parser, &json!([1, 2])).is_err());
}

#[test]
fn json_query_falls_back_between_date_and_weekday() {
    let schema = test_schema();
    let parser = FieldParser::new().expect("parser");

    let bad_date = json!({"date": "someday", "weekday": 2, "hour": 9, "spend": 1});
    let query = DiagnosisQuery::from_json(&schema, &parser, &bad_date).expect("weekday is used");
    assert_eq!(query.bucket, Bucket::new(2, 9).expect("bucket"));

    let bad_weekday = json!({"date": "2026-01-08", "weekday": "thursday", "hour": 9});
    let query = DiagnosisQuery::from_json(&schema, &parser, &bad_weekday).expect("date is used");
    assert_eq!(query.bucket, Bucket::new(3, 9).expect("bucket"));

    let neither = json!({"date": "someday", "hour": 9});
    assert!(DiagnosisQuery::from_json(&schema, &parser, &neither).is_err());
}

#[test]
fn history_row_with_invalid_utf8_is_skipped() {
    let dir = tempfile::tempdir().expect("failed to create tempdir");
    let history = dir.path().join("history.csv");
    std::fs::write(
        &history,
        b"date,hour,operator,spend,gmv\n\
          2026-01-06,10,host-a,100,300\n\
          2026-01-06,11,host-\xff\xfe,200,400\n\
          2026-01-13,10,host-a,300,500\n",
    )
    .expect("write history");

    let mut engine = open_engine(&dir);
    let report = engine.initialize(&history).expect("initialize");

    assert_eq!(report.records, 2);
    assert_eq!(report.preprocess.malformed_lines, 1);
    assert_eq!(engine.baseline_table().get(tuesday(10), "spend"), Some(200.0));
}

#[test]
fn overflowing_history_still_reloads_from_snapshot() {
    let dir = tempfile::tempdir().expect("failed to create tempdir");
    let mut engine = open_engine(&dir);
    let table = raw_table(
        HEADERS,
        &[
            row(&["2026-01-06", "10", "host-a", "1e308", "30", "2", "2.0"]),
            row(&["2026-01-13", "10", "host-a", "1e308", "50", "4", "3.0"]),
        ],
    );
    let report = engine.initialize_from_table(&table, None).expect("initialize");
    assert!(report.persisted);
    assert_eq!(engine.baseline_table().get(tuesday(10), "spend"), None);

    let reopened = open_engine(&dir);
    assert!(reopened.is_initialized());
    assert_eq!(reopened.baseline_table(), engine.baseline_table());
    assert_eq!(reopened.progress_table(), engine.progress_table());

    let result = reopened
        .diagnose(&DiagnosisQuery::new(tuesday(10)).with_metric("spend", 5.0))
        .expect("diagnose");
    assert_eq!(result.evaluations["spend"].grade, Grade::InsufficientData);
}

#[test]
fn initialize_from_csv_file_records_provenance() {
    let dir = tempfile::tempdir().expect("failed to create tempdir");
    let history = dir.path().join("history.csv");
    std::fs::write(
        &history,
        "\u{feff}date,hour,operator,spend,gmv,roi\n\
         2026-01-06,10,host-a,100,300,3.0\n\
         2026-01-06,11,host-a,200,400,2.0,extra\n\
         2026-01-13,10,host-a,300,500\n",
    )
    .expect("write history");

    let mut engine = BaselineEngine::open(test_schema(), &dir.path().join("state"))
        .expect("engine should open");
    let report = engine.initialize(&history).expect("initialize");

    assert_eq!(report.preprocess.malformed_lines, 1);
    assert_eq!(report.records, 2);
    assert!(report.persisted);
    assert_eq!(engine.baseline_table().get(tuesday(10), "spend"), Some(200.0));
    assert_eq!(engine.baseline_table().get(tuesday(10), "roi"), Some(3.0));

    let status = engine.status();
    let source = status.source.expect("source recorded");
    assert_eq!(source.rows_read, 2);
    assert_eq!(source.sha256.len(), 64);
    assert!(status.saved_at.is_some());
    assert_eq!(status.metrics.total, 5);
}

#[test]
fn unsupported_history_format_fails_and_is_logged() {
    let dir = tempfile::tempdir().expect("failed to create tempdir");
    let history = dir.path().join("history.xlsx");
    std::fs::write(&history, b"binary").expect("write history");

    let mut engine = open_engine(&dir);
    let err = engine.initialize(&history).expect_err("must fail");
    assert!(err.to_string().contains("unsupported history format"));
    assert_eq!(engine.error_log().recent(1).expect("list").len(), 1);
}

#[test]
fn export_writes_csv_rows_and_json_tables() {
    let dir = tempfile::tempdir().expect("failed to create tempdir");
    let mut engine = open_engine(&dir);
    engine
        .initialize_from_table(&ten_tuesdays(), None)
        .expect("initialize");

    let paths = engine.export(&dir.path().join("exports")).expect("export");

    let csv = std::fs::read_to_string(&paths.csv_path).expect("read csv");
    let mut lines = csv.lines();
    assert_eq!(
        lines.next(),
        Some("weekday,hour,metric,baseline,evaluation_method")
    );
    assert!(csv.contains("1,14,spend,145,dynamic"));
    assert!(csv.contains("1,14,roi,2,traditional"));

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&paths.json_path).expect("read json"))
            .expect("parse json");
    assert_eq!(json["baseline_buckets"], 1);
    assert_eq!(json["baseline_table"][0]["label"], "Tuesday 14:00");
    assert_eq!(json["ratio_metrics"][0], "roi");
}

#[test]
fn export_requires_an_initialized_engine() {
    let dir = tempfile::tempdir().expect("failed to create tempdir");
    let engine = open_engine(&dir);
    assert!(engine.export(dir.path()).is_err());
}

#[test]
fn engine_can_be_shared_across_threads() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<BaselineEngine>();
}
