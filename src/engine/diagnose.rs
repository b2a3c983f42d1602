use std::collections::BTreeMap;

use anyhow::{Context, Result, bail};
use chrono::Datelike;
use serde_json::Value;
use tracing::{info, warn};

use super::bucket::Bucket;
use super::classify::{Grade, grade};
use super::fallback::resolve_baseline;
use super::preprocess::FieldParser;
use super::store::Severity;
use super::BaselineEngine;
use crate::model::{
    ClassificationBreakdown, DiagnosisResult, InputSummary, MetricEvaluation, SkipReason,
    SkippedMetric,
};
use crate::schema::{MetricKind, MetricSchema};
use crate::util::now_utc_string;

#[derive(Debug, Clone, PartialEq)]
pub enum QueryValue {
    Missing,
    Number(f64),
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DiagnosisQuery {
    pub bucket: Bucket,
    pub metrics: Vec<(String, QueryValue)>,
}

impl DiagnosisQuery {
    pub fn new(bucket: Bucket) -> Self {
        Self {
            bucket,
            metrics: Vec::new(),
        }
    }

    #[cfg(test)]
    pub fn with_metric(mut self, name: &str, value: f64) -> Self {
        self.metrics.push((name.to_string(), QueryValue::Number(value)));
        self
    }

    pub fn with_value(mut self, name: &str, value: QueryValue) -> Self {
        self.metrics.push((name.to_string(), value));
        self
    }

    /// A parseable date wins over the weekday field; an unparseable one is
    /// logged and ignored.
    pub fn from_json(schema: &MetricSchema, parser: &FieldParser, value: &Value) -> Result<Self> {
        let Some(object) = value.as_object() else {
            bail!("diagnosis query must be a JSON object");
        };

        let date_weekday = match object.get(&schema.fields.date).and_then(Value::as_str) {
            Some(raw) => match parser.parse_date(raw) {
                Some(date) => Some(i64::from(date.weekday().num_days_from_monday())),
                None => {
                    warn!(
                        value = %raw,
                        field = %schema.fields.date,
                        "unparseable date in diagnosis query"
                    );
                    None
                }
            },
            None => None,
        };
        let weekday = match (date_weekday, object.get(&schema.fields.weekday)) {
            (Some(weekday), _) => weekday,
            (None, Some(raw)) => integer_field(raw)
                .with_context(|| format!("invalid `{}` value: {raw}", schema.fields.weekday))?,
            (None, None) => bail!(
                "diagnosis query needs a valid `{}` or `{}`",
                schema.fields.date,
                schema.fields.weekday
            ),
        };

        let hour = match object.get(&schema.fields.hour) {
            Some(Value::String(raw)) => parser
                .parse_hour(raw)
                .map(i64::from)
                .with_context(|| format!("invalid `{}` value: {raw}", schema.fields.hour))?,
            Some(raw) => integer_field(raw)
                .with_context(|| format!("invalid `{}` value: {raw}", schema.fields.hour))?,
            None => bail!("diagnosis query has no `{}` field", schema.fields.hour),
        };

        let bucket = Bucket::new(
            u8::try_from(weekday).context("weekday out of range")?,
            u8::try_from(hour).context("hour out of range")?,
        )?;

        let query = object
            .iter()
            .filter(|(key, _)| !schema.is_metadata_key(key))
            .fold(Self::new(bucket), |query, (key, raw)| {
                query.with_value(key, query_value(raw))
            });

        Ok(query)
    }
}

fn query_value(raw: &Value) -> QueryValue {
    match raw {
        Value::Null => QueryValue::Missing,
        Value::Number(number) => number
            .as_f64()
            .map(QueryValue::Number)
            .unwrap_or_else(|| QueryValue::Text(number.to_string())),
        Value::String(text) if text.trim().is_empty() => QueryValue::Missing,
        Value::String(text) => QueryValue::Text(text.clone()),
        other => QueryValue::Text(other.to_string()),
    }
}

fn integer_field(raw: &Value) -> Result<i64> {
    match raw {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().filter(|v| v.fract() == 0.0).map(|v| v as i64))
            .context("expected an integer"),
        Value::String(text) => text.trim().parse::<i64>().context("expected an integer"),
        _ => bail!("expected an integer"),
    }
}

fn skip(skipped: &mut Vec<SkippedMetric>, metric: &str, reason: SkipReason) {
    skipped.push(SkippedMetric {
        metric: metric.to_string(),
        reason,
    });
}

impl BaselineEngine {
    pub fn diagnose_json(&self, query: &Value) -> Result<DiagnosisResult> {
        let query = DiagnosisQuery::from_json(&self.schema, &self.parser, query)?;
        self.diagnose(&query)
    }

    pub fn diagnose(&self, query: &DiagnosisQuery) -> Result<DiagnosisResult> {
        if !self.state.initialized {
            bail!("baseline engine is not initialized");
        }

        let bucket = query.bucket;
        let mut evaluations = BTreeMap::new();
        let mut classification = ClassificationBreakdown::default();

        for (name, value) in &query.metrics {
            let observed = match value {
                QueryValue::Missing => {
                    skip(&mut classification.skipped, name, SkipReason::EmptyValue);
                    continue;
                }
                QueryValue::Number(number) if number.is_finite() => *number,
                QueryValue::Number(_) => {
                    skip(&mut classification.skipped, name, SkipReason::NotNumeric);
                    continue;
                }
                QueryValue::Text(text) => match self.parser.parse_metric_value(text) {
                    Some(number) => number,
                    None => {
                        skip(&mut classification.skipped, name, SkipReason::NotNumeric);
                        continue;
                    }
                },
            };

            let canonical = self.schema.canonical(name);
            let Some(kind) = self.schema.kind_of(canonical) else {
                skip(&mut classification.skipped, name, SkipReason::Unclassified);
                continue;
            };

            match self.evaluate_metric(canonical, kind, observed, bucket) {
                Ok(Some(evaluation)) => {
                    match kind {
                        MetricKind::Additive => classification.dynamic.push(name.clone()),
                        MetricKind::Ratio => classification.traditional.push(name.clone()),
                    }
                    evaluations.insert(name.clone(), evaluation);
                }
                Ok(None) => skip(&mut classification.skipped, name, SkipReason::NoBaseline),
                Err(err) => {
                    warn!(metric = %name, error = %err, "metric evaluation failed");
                    self.store.error_log().record(
                        Severity::Error,
                        &format!("evaluation failed - {canonical}"),
                        &format!("{err:#}"),
                    );
                    skip(&mut classification.skipped, name, SkipReason::EvaluationFailed);
                }
            }
        }

        let total_inputs = query.metrics.len();
        let evaluated = evaluations.len();
        let success_rate = if total_inputs == 0 {
            0.0
        } else {
            evaluated as f64 / total_inputs as f64 * 100.0
        };

        info!(
            bucket = %bucket,
            inputs = total_inputs,
            dynamic = classification.dynamic.len(),
            traditional = classification.traditional.len(),
            skipped = classification.skipped.len(),
            "diagnosis completed"
        );

        Ok(DiagnosisResult {
            diagnosed_at: now_utc_string(),
            bucket,
            bucket_label: bucket.to_string(),
            summary: InputSummary {
                total_inputs,
                evaluated,
                skipped: classification.skipped.len(),
                success_rate,
            },
            classification,
            evaluations,
        })
    }

    fn evaluate_metric(
        &self,
        metric: &str,
        kind: MetricKind,
        observed: f64,
        bucket: Bucket,
    ) -> Result<Option<MetricEvaluation>> {
        let Some(resolved) = resolve_baseline(&self.state.baseline, metric, bucket) else {
            if observed > 0.0 {
                return Ok(Some(MetricEvaluation {
                    metric: metric.to_string(),
                    kind,
                    observed,
                    coefficient: 1.0,
                    grade: Grade::InsufficientData,
                    method: "basic(no baseline)".to_string(),
                    baseline: None,
                    fallback: None,
                    standard_progress: None,
                }));
            }
            return Ok(None);
        };

        let coefficient = observed / resolved.value;
        if !coefficient.is_finite() {
            bail!(
                "coefficient for {metric} is not finite ({observed} / {})",
                resolved.value
            );
        }

        let standard_progress = match kind {
            MetricKind::Additive => resolved
                .source
                .and_then(|source| self.state.progress.get(source, metric)),
            MetricKind::Ratio => None,
        };

        Ok(Some(MetricEvaluation {
            metric: metric.to_string(),
            kind,
            observed,
            coefficient,
            grade: grade(kind, coefficient),
            method: format!("{}({})", kind.evaluation_label(), resolved.tier),
            baseline: Some(resolved.value),
            fallback: Some(resolved.tier),
            standard_progress,
        }))
    }
}
