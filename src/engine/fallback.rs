use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::bucket::{Bucket, BucketTable, HOURS, WEEKDAYS};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "tier", rename_all = "snake_case")]
pub enum FallbackTier {
    Exact,
    SameHour { weekday: u8 },
    SameWeekday { hour: u8 },
    GlobalMean { samples: usize },
}

impl fmt::Display for FallbackTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact => write!(f, "exact match"),
            Self::SameHour { weekday } => write!(f, "same-hour fallback (weekday {weekday})"),
            Self::SameWeekday { hour } => write!(f, "same-weekday fallback ({hour:02}:00)"),
            Self::GlobalMean { samples } => write!(f, "global mean ({samples} samples)"),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResolvedBaseline {
    pub value: f64,
    pub tier: FallbackTier,
    pub source: Option<Bucket>,
}

fn positive(table: &BucketTable, bucket: Bucket, metric: &str) -> Option<f64> {
    table.get(bucket, metric).filter(|value| *value > 0.0)
}

/// Tiers are tried in a fixed order and the first hit wins. Scan order inside
/// a tier is by index, not by closeness to the target.
pub fn resolve_baseline(
    table: &BucketTable,
    metric: &str,
    target: Bucket,
) -> Option<ResolvedBaseline> {
    let resolved = resolve_exact(table, metric, target)
        .or_else(|| resolve_same_hour(table, metric, target))
        .or_else(|| resolve_same_weekday(table, metric, target))
        .or_else(|| resolve_global_mean(table, metric));

    match &resolved {
        Some(found) => debug!(metric, bucket = %target, tier = %found.tier, value = found.value, "resolved baseline"),
        None => debug!(metric, bucket = %target, "no baseline available"),
    }

    resolved
}

fn resolve_exact(table: &BucketTable, metric: &str, target: Bucket) -> Option<ResolvedBaseline> {
    positive(table, target, metric).map(|value| ResolvedBaseline {
        value,
        tier: FallbackTier::Exact,
        source: Some(target),
    })
}

fn resolve_same_hour(table: &BucketTable, metric: &str, target: Bucket) -> Option<ResolvedBaseline> {
    (0..WEEKDAYS).find_map(|weekday| {
        let bucket = Bucket::new(weekday, target.hour()).ok()?;
        positive(table, bucket, metric).map(|value| ResolvedBaseline {
            value,
            tier: FallbackTier::SameHour { weekday },
            source: Some(bucket),
        })
    })
}

fn resolve_same_weekday(
    table: &BucketTable,
    metric: &str,
    target: Bucket,
) -> Option<ResolvedBaseline> {
    (0..HOURS).find_map(|hour| {
        let bucket = Bucket::new(target.weekday(), hour).ok()?;
        positive(table, bucket, metric).map(|value| ResolvedBaseline {
            value,
            tier: FallbackTier::SameWeekday { hour },
            source: Some(bucket),
        })
    })
}

fn resolve_global_mean(table: &BucketTable, metric: &str) -> Option<ResolvedBaseline> {
    let values: Vec<f64> = table
        .iter()
        .filter_map(|(_, metrics)| metrics.get(metric).copied())
        .filter(|value| *value > 0.0)
        .collect();
    if values.is_empty() {
        return None;
    }

    Some(ResolvedBaseline {
        value: values.iter().sum::<f64>() / values.len() as f64,
        tier: FallbackTier::GlobalMean {
            samples: values.len(),
        },
        source: None,
    })
}
