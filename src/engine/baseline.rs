use std::collections::BTreeMap;

use tracing::{info, warn};

use super::bucket::{Bucket, BucketTable};
use super::preprocess::HistoricalRecord;
use crate::schema::MetricSchema;

#[derive(Default)]
struct Accumulator {
    sum: f64,
    count: usize,
}

pub fn build_baseline_table(schema: &MetricSchema, records: &[HistoricalRecord]) -> BucketTable {
    let mut sums: BTreeMap<(Bucket, &str), Accumulator> = BTreeMap::new();

    for record in records {
        for (metric, _) in schema.classified_metrics() {
            let Some(value) = record.metrics.get(metric) else {
                continue;
            };
            let slot = sums.entry((record.bucket, metric)).or_default();
            slot.sum += value;
            slot.count += 1;
        }
    }

    let mut table = BucketTable::default();
    for ((bucket, metric), acc) in sums {
        let mean = acc.sum / acc.count as f64;
        if !mean.is_finite() {
            warn!(metric, bucket = %bucket, "baseline mean overflowed, leaving bucket empty");
            continue;
        }
        table.insert(bucket, metric, mean);
    }

    info!(
        buckets = table.occupied_buckets(),
        records = records.len(),
        "built baseline table"
    );

    table
}
