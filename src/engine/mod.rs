use std::path::Path;

use anyhow::{Result, bail};
use tracing::{error, info, warn};

use crate::model::{InitializeReport, MetricCounts, SystemStatus};
use crate::schema::MetricSchema;
use crate::util::{now_utc_string, sha256_file};

mod baseline;
mod bucket;
mod classify;
mod diagnose;
mod export;
mod fallback;
mod preprocess;
mod progress;
mod store;
#[cfg(test)]
mod tests;

pub use bucket::{Bucket, BucketTable};
pub use classify::Grade;
pub use fallback::FallbackTier;
pub use preprocess::{FieldParser, HistoricalRecord, PreprocessReport, RawTable};
pub use store::{ErrorLog, SourceInfo};

use baseline::build_baseline_table;
use preprocess::{preprocess, read_table};
use progress::build_progress_table;
use store::{SNAPSHOT_VERSION, Severity, StateSnapshot, StateStore};

#[derive(Debug, Clone, Default, PartialEq)]
struct EngineState {
    initialized: bool,
    source: Option<SourceInfo>,
    saved_at: Option<String>,
    data_pool: Vec<HistoricalRecord>,
    baseline: BucketTable,
    progress: BucketTable,
}

impl From<StateSnapshot> for EngineState {
    fn from(snapshot: StateSnapshot) -> Self {
        Self {
            initialized: snapshot.initialized,
            source: snapshot.source,
            saved_at: Some(snapshot.saved_at),
            data_pool: snapshot.data_pool,
            baseline: snapshot.baseline,
            progress: snapshot.progress,
        }
    }
}

pub struct BaselineEngine {
    schema: MetricSchema,
    parser: FieldParser,
    store: StateStore,
    state: EngineState,
}

impl BaselineEngine {
    pub fn open(schema: MetricSchema, state_dir: &Path) -> Result<Self> {
        schema.validate()?;
        let store = StateStore::open(state_dir)?;
        let state = store.load().map(EngineState::from).unwrap_or_default();

        info!(
            state_dir = %state_dir.display(),
            initialized = state.initialized,
            additive = schema.additive_metrics.len(),
            ratio = schema.ratio_metrics.len(),
            "baseline engine ready"
        );

        Ok(Self {
            schema,
            parser: FieldParser::new()?,
            store,
            state,
        })
    }

    pub fn is_initialized(&self) -> bool {
        self.state.initialized
    }

    pub fn baseline_table(&self) -> &BucketTable {
        &self.state.baseline
    }

    pub fn progress_table(&self) -> &BucketTable {
        &self.state.progress
    }

    pub fn data_pool(&self) -> &[HistoricalRecord] {
        &self.state.data_pool
    }

    pub fn error_log(&self) -> &ErrorLog {
        self.store.error_log()
    }

    /// On failure the previously loaded model is kept as is.
    pub fn initialize(&mut self, history_path: &Path) -> Result<InitializeReport> {
        let loaded = read_table(history_path).and_then(|table| {
            let source = SourceInfo {
                path: history_path.display().to_string(),
                sha256: sha256_file(history_path)?,
                rows_read: table.rows.len(),
            };
            Ok((table, source))
        });

        match loaded {
            Ok((table, source)) => self.initialize_from_table(&table, Some(source)),
            Err(err) => Err(self.log_failure("initialization failed", err)),
        }
    }

    pub fn initialize_from_table(
        &mut self,
        table: &RawTable,
        source: Option<SourceInfo>,
    ) -> Result<InitializeReport> {
        match self.rebuild(table, source) {
            Ok(report) => Ok(report),
            Err(err) => Err(self.log_failure("initialization failed", err)),
        }
    }

    fn rebuild(&mut self, table: &RawTable, source: Option<SourceInfo>) -> Result<InitializeReport> {
        let (records, preprocess_report) = preprocess(&self.schema, &self.parser, table)?;
        if records.is_empty() {
            bail!(
                "no valid rows left after cleaning {} input rows",
                preprocess_report.rows_read
            );
        }

        let baseline = build_baseline_table(&self.schema, &records);
        let progress = build_progress_table(&self.schema, &records);
        let saved_at = now_utc_string();

        let snapshot = StateSnapshot {
            snapshot_version: SNAPSHOT_VERSION,
            saved_at: saved_at.clone(),
            initialized: true,
            source,
            data_pool: records,
            baseline,
            progress,
        };

        let persisted = match self.store.save(&snapshot) {
            Ok(()) => true,
            Err(err) => {
                warn!(error = %err, "model rebuilt but snapshot could not be saved");
                self.store.error_log().record(
                    Severity::Error,
                    "failed to save state snapshot",
                    &format!("{err:#}"),
                );
                false
            }
        };

        self.state = EngineState::from(snapshot);
        if !persisted {
            self.state.saved_at = None;
        }

        let report = InitializeReport {
            records: self.state.data_pool.len(),
            baseline_buckets: self.state.baseline.occupied_buckets(),
            progress_buckets: self.state.progress.occupied_buckets(),
            preprocess: preprocess_report,
            persisted,
        };
        info!(
            records = report.records,
            baseline_buckets = report.baseline_buckets,
            progress_buckets = report.progress_buckets,
            persisted = report.persisted,
            saved_at = %saved_at,
            "initialization completed"
        );

        Ok(report)
    }

    fn log_failure(&self, message: &str, err: anyhow::Error) -> anyhow::Error {
        error!(error = %err, "{message}");
        self.store
            .error_log()
            .record(Severity::Error, message, &format!("{err:#}"));
        err
    }

    pub fn status(&self) -> SystemStatus {
        let additive = self.schema.additive_metrics.len();
        let ratio = self.schema.ratio_metrics.len();
        SystemStatus {
            initialized: self.is_initialized(),
            state_dir: self.store.state_dir().display().to_string(),
            data_pool_size: self.data_pool().len(),
            baseline_buckets: self.baseline_table().occupied_buckets(),
            progress_buckets: self.progress_table().occupied_buckets(),
            metrics: MetricCounts {
                additive,
                ratio,
                total: additive + ratio,
            },
            source: self.state.source.clone(),
            saved_at: self.state.saved_at.clone(),
        }
    }
}
