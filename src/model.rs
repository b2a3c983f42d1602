use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::engine::{Bucket, FallbackTier, Grade, PreprocessReport, SourceInfo};
use crate::schema::MetricKind;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricEvaluation {
    pub metric: String,
    pub kind: MetricKind,
    pub observed: f64,
    pub coefficient: f64,
    pub grade: Grade,
    pub method: String,
    pub baseline: Option<f64>,
    pub fallback: Option<FallbackTier>,
    pub standard_progress: Option<f64>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    EmptyValue,
    NotNumeric,
    Unclassified,
    NoBaseline,
    EvaluationFailed,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EmptyValue => "empty value",
            Self::NotNumeric => "not numeric",
            Self::Unclassified => "unclassified",
            Self::NoBaseline => "no baseline",
            Self::EvaluationFailed => "evaluation failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedMetric {
    pub metric: String,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputSummary {
    pub total_inputs: usize,
    pub evaluated: usize,
    pub skipped: usize,
    pub success_rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationBreakdown {
    pub dynamic: Vec<String>,
    pub traditional: Vec<String>,
    pub skipped: Vec<SkippedMetric>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosisResult {
    pub diagnosed_at: String,
    pub bucket: Bucket,
    pub bucket_label: String,
    pub summary: InputSummary,
    pub classification: ClassificationBreakdown,
    pub evaluations: BTreeMap<String, MetricEvaluation>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InitializeReport {
    pub preprocess: PreprocessReport,
    pub records: usize,
    pub baseline_buckets: usize,
    pub progress_buckets: usize,
    pub persisted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricCounts {
    pub additive: usize,
    pub ratio: usize,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SystemStatus {
    pub initialized: bool,
    pub state_dir: String,
    pub data_pool_size: usize,
    pub baseline_buckets: usize,
    pub progress_buckets: usize,
    pub metrics: MetricCounts,
    pub source: Option<SourceInfo>,
    pub saved_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportPaths {
    pub csv_path: String,
    pub json_path: String,
}
