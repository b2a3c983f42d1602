use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use serde::Serialize;
use tracing::info;

use super::BaselineEngine;
use super::bucket::BucketTable;
use crate::model::ExportPaths;
use crate::util::{ensure_directory, now_utc_string, utc_compact_string, write_json_pretty};

#[derive(Debug, Serialize)]
struct BucketEntry<'a> {
    weekday: u8,
    hour: u8,
    label: String,
    metrics: &'a BTreeMap<String, f64>,
}

#[derive(Debug, Serialize)]
struct BaselineExport<'a> {
    exported_at: String,
    data_pool_size: usize,
    baseline_buckets: usize,
    progress_buckets: usize,
    additive_metrics: &'a [String],
    ratio_metrics: &'a [String],
    baseline_table: Vec<BucketEntry<'a>>,
    progress_table: Vec<BucketEntry<'a>>,
}

fn bucket_entries(table: &BucketTable) -> Vec<BucketEntry<'_>> {
    table
        .iter()
        .map(|(bucket, metrics)| BucketEntry {
            weekday: bucket.weekday(),
            hour: bucket.hour(),
            label: bucket.to_string(),
            metrics,
        })
        .collect()
}

impl BaselineEngine {
    pub fn export(&self, output_dir: &Path) -> Result<ExportPaths> {
        if !self.state.initialized {
            bail!("baseline engine is not initialized, nothing to export");
        }
        ensure_directory(output_dir)?;

        let stamp = utc_compact_string(Utc::now());
        let csv_path = output_dir.join(format!("baseline_table_{stamp}.csv"));
        let json_path = output_dir.join(format!("baseline_snapshot_{stamp}.json"));

        let mut writer = csv::Writer::from_path(&csv_path)
            .with_context(|| format!("failed to create {}", csv_path.display()))?;
        writer.write_record(["weekday", "hour", "metric", "baseline", "evaluation_method"])?;
        let mut rows = 0_usize;
        for (bucket, metrics) in self.state.baseline.iter() {
            for (metric, value) in metrics {
                let method = self
                    .schema
                    .kind_of(metric)
                    .map(|kind| kind.evaluation_label())
                    .unwrap_or("unclassified");
                writer.write_record([
                    bucket.weekday().to_string(),
                    bucket.hour().to_string(),
                    metric.clone(),
                    value.to_string(),
                    method.to_string(),
                ])?;
                rows += 1;
            }
        }
        writer
            .flush()
            .with_context(|| format!("failed to write {}", csv_path.display()))?;

        let document = BaselineExport {
            exported_at: now_utc_string(),
            data_pool_size: self.state.data_pool.len(),
            baseline_buckets: self.state.baseline.occupied_buckets(),
            progress_buckets: self.state.progress.occupied_buckets(),
            additive_metrics: &self.schema.additive_metrics,
            ratio_metrics: &self.schema.ratio_metrics,
            baseline_table: bucket_entries(&self.state.baseline),
            progress_table: bucket_entries(&self.state.progress),
        };
        write_json_pretty(&json_path, &document)?;

        info!(
            csv = %csv_path.display(),
            json = %json_path.display(),
            rows,
            "exported baseline snapshot"
        );

        Ok(ExportPaths {
            csv_path: csv_path.display().to_string(),
            json_path: json_path.display().to_string(),
        })
    }
}
