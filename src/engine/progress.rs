use std::collections::BTreeMap;

use chrono::NaiveDate;
use tracing::info;

use super::bucket::{Bucket, BucketTable};
use super::preprocess::HistoricalRecord;
use crate::schema::MetricSchema;

pub fn build_progress_table(schema: &MetricSchema, records: &[HistoricalRecord]) -> BucketTable {
    let mut days: BTreeMap<NaiveDate, Vec<&HistoricalRecord>> = BTreeMap::new();
    for record in records {
        days.entry(record.date).or_default().push(record);
    }

    let mut samples: BTreeMap<(Bucket, &str), Vec<f64>> = BTreeMap::new();

    for day_records in days.values() {
        let mut hourly: BTreeMap<Bucket, BTreeMap<&str, f64>> = BTreeMap::new();
        for record in day_records {
            let hour_sums = hourly.entry(record.bucket).or_default();
            for metric in &schema.additive_metrics {
                if let Some(value) = record.metrics.get(metric) {
                    *hour_sums.entry(metric.as_str()).or_default() += value;
                }
            }
        }

        for metric in &schema.additive_metrics {
            let metric = metric.as_str();
            let total: f64 = hourly
                .values()
                .filter_map(|sums| sums.get(metric))
                .sum();
            if !total.is_finite() || total <= 0.0 {
                continue;
            }

            // Every bucket in one day shares a weekday, so key order is hour order.
            let mut cumulative = 0.0;
            for (bucket, sums) in &hourly {
                cumulative += sums.get(metric).copied().unwrap_or(0.0);
                let fraction = (cumulative / total).clamp(0.0, 1.0);
                samples.entry((*bucket, metric)).or_default().push(fraction);
            }
        }
    }

    let mut table = BucketTable::default();
    for ((bucket, metric), fractions) in samples {
        let mean = fractions.iter().sum::<f64>() / fractions.len() as f64;
        if mean.is_finite() {
            table.insert(bucket, metric, mean);
        }
    }

    info!(
        buckets = table.occupied_buckets(),
        days = days.len(),
        "built standard progress table"
    );

    table
}
