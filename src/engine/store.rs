use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::bucket::BucketTable;
use super::preprocess::HistoricalRecord;
use crate::util::{ensure_directory, now_utc_string, read_json, write_json_pretty};

const SNAPSHOT_FILE: &str = "system_state.json";
const ERROR_LOG_FILE: &str = "error_logs.sqlite";
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub path: String,
    pub sha256: String,
    pub rows_read: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub snapshot_version: u32,
    pub saved_at: String,
    pub initialized: bool,
    pub source: Option<SourceInfo>,
    pub data_pool: Vec<HistoricalRecord>,
    pub baseline: BucketTable,
    pub progress: BucketTable,
}

#[derive(Debug, Clone)]
pub struct StateStore {
    state_dir: PathBuf,
    error_log: ErrorLog,
}

impl StateStore {
    pub fn open(state_dir: &Path) -> Result<Self> {
        ensure_directory(state_dir)?;
        let error_log = ErrorLog::open(&state_dir.join(ERROR_LOG_FILE))?;
        Ok(Self {
            state_dir: state_dir.to_path_buf(),
            error_log,
        })
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.state_dir.join(SNAPSHOT_FILE)
    }

    pub fn error_log(&self) -> &ErrorLog {
        &self.error_log
    }

    pub fn save(&self, snapshot: &StateSnapshot) -> Result<()> {
        let path = self.snapshot_path();
        write_json_pretty(&path, snapshot)?;
        info!(
            path = %path.display(),
            records = snapshot.data_pool.len(),
            "saved state snapshot"
        );
        Ok(())
    }

    pub fn load(&self) -> Option<StateSnapshot> {
        let path = self.snapshot_path();
        if !path.exists() {
            info!(path = %path.display(), "no state snapshot, starting uninitialized");
            return None;
        }

        match read_json::<StateSnapshot>(&path).and_then(check_version) {
            Ok(snapshot) => {
                info!(
                    path = %path.display(),
                    records = snapshot.data_pool.len(),
                    saved_at = %snapshot.saved_at,
                    "loaded state snapshot"
                );
                Some(snapshot)
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "state snapshot unusable, starting uninitialized");
                self.error_log.record(
                    Severity::Warning,
                    "failed to load state snapshot",
                    &format!("{err:#}"),
                );
                None
            }
        }
    }
}

fn check_version(snapshot: StateSnapshot) -> Result<StateSnapshot> {
    if snapshot.snapshot_version != SNAPSHOT_VERSION {
        bail!(
            "snapshot version {} does not match supported version {SNAPSHOT_VERSION}",
            snapshot.snapshot_version
        );
    }
    Ok(snapshot)
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorLogEntry {
    pub id: i64,
    pub timestamp: String,
    pub level: String,
    pub message: String,
    pub details: String,
}

#[derive(Debug, Clone)]
pub struct ErrorLog {
    db_path: PathBuf,
}

impl ErrorLog {
    pub fn open(db_path: &Path) -> Result<Self> {
        let connection = open_connection(db_path)?;
        ensure_schema(&connection)?;
        Ok(Self {
            db_path: db_path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Failures of the log itself are reported and swallowed.
    pub fn record(&self, severity: Severity, message: &str, details: &str) {
        if let Err(err) = self.try_record(severity, message, details) {
            warn!(path = %self.db_path.display(), error = %err, "failed to write error log");
        }
    }

    fn try_record(&self, severity: Severity, message: &str, details: &str) -> Result<()> {
        let connection = open_connection(&self.db_path)?;
        connection
            .execute(
                "INSERT INTO error_logs(timestamp, level, message, details) VALUES(?1, ?2, ?3, ?4)",
                params![now_utc_string(), severity.as_str(), message, details],
            )
            .context("failed to insert error log row")?;
        Ok(())
    }

    pub fn recent(&self, limit: usize) -> Result<Vec<ErrorLogEntry>> {
        let connection = open_connection(&self.db_path)?;
        let mut statement = connection.prepare(
            "
            SELECT id, timestamp, level, message, details
            FROM error_logs
            ORDER BY id DESC
            LIMIT ?1
            ",
        )?;

        let mut rows = statement.query(params![limit as i64])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(ErrorLogEntry {
                id: row.get(0)?,
                timestamp: row.get(1)?,
                level: row.get(2)?,
                message: row.get(3)?,
                details: row.get(4)?,
            });
        }

        Ok(out)
    }
}

fn open_connection(db_path: &Path) -> Result<Connection> {
    let connection = Connection::open(db_path)
        .with_context(|| format!("failed to open {}", db_path.display()))?;
    connection
        .busy_timeout(std::time::Duration::from_secs(2))
        .context("failed to set busy timeout")?;
    Ok(connection)
}

fn ensure_schema(connection: &Connection) -> Result<()> {
    connection
        .execute_batch(
            "
            CREATE TABLE IF NOT EXISTS error_logs (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              timestamp TEXT NOT NULL,
              level TEXT NOT NULL,
              message TEXT NOT NULL,
              details TEXT NOT NULL DEFAULT ''
            );
            ",
        )
        .context("failed to create error_logs table")?;
    Ok(())
}
