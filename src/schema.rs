use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::util::read_json;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Additive,
    Ratio,
}

impl MetricKind {
    pub fn evaluation_label(self) -> &'static str {
        match self {
            Self::Additive => "dynamic",
            Self::Ratio => "traditional",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StructuralFields {
    pub date: String,
    pub hour: String,
    pub operator: String,
    pub weekday: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MetricSchema {
    pub aliases: BTreeMap<String, String>,
    pub additive_metrics: Vec<String>,
    pub ratio_metrics: Vec<String>,
    /// Rows with a null or zero value in any of these are discarded.
    pub key_financial_metrics: Vec<String>,
    pub fields: StructuralFields,
    pub metadata_fields: Vec<String>,
    pub null_markers: Vec<String>,
}

impl MetricSchema {
    pub fn load(path: &Path) -> Result<Self> {
        let schema: Self = read_json(path)?;
        schema
            .validate()
            .with_context(|| format!("invalid metric schema: {}", path.display()))?;
        info!(
            path = %path.display(),
            additive = schema.additive_metrics.len(),
            ratio = schema.ratio_metrics.len(),
            "loaded metric schema"
        );
        Ok(schema)
    }

    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (label, name) in [
            ("date", &self.fields.date),
            ("hour", &self.fields.hour),
            ("operator", &self.fields.operator),
            ("weekday", &self.fields.weekday),
        ] {
            if name.trim().is_empty() {
                bail!("structural field `{label}` has an empty column name");
            }
        }

        let additive: BTreeSet<&str> = self.additive_metrics.iter().map(String::as_str).collect();
        if additive.len() != self.additive_metrics.len() {
            bail!("additive metric list contains duplicates");
        }
        let ratio: BTreeSet<&str> = self.ratio_metrics.iter().map(String::as_str).collect();
        if ratio.len() != self.ratio_metrics.len() {
            bail!("ratio metric list contains duplicates");
        }
        if let Some(shared) = additive.intersection(&ratio).next() {
            bail!("metric `{shared}` is listed as both additive and ratio");
        }

        if self.key_financial_metrics.is_empty() {
            bail!("at least one key financial metric is required");
        }
        for metric in &self.key_financial_metrics {
            if self.kind_of(metric).is_none() {
                bail!("key financial metric `{metric}` is not classified");
            }
        }

        Ok(())
    }

    pub fn canonical<'a>(&'a self, name: &'a str) -> &'a str {
        self.aliases.get(name).map(String::as_str).unwrap_or(name)
    }

    pub fn kind_of(&self, canonical: &str) -> Option<MetricKind> {
        if self.additive_metrics.iter().any(|m| m == canonical) {
            Some(MetricKind::Additive)
        } else if self.ratio_metrics.iter().any(|m| m == canonical) {
            Some(MetricKind::Ratio)
        } else {
            None
        }
    }

    pub fn classified_metrics(&self) -> impl Iterator<Item = (&str, MetricKind)> {
        self.additive_metrics
            .iter()
            .map(|m| (m.as_str(), MetricKind::Additive))
            .chain(
                self.ratio_metrics
                    .iter()
                    .map(|m| (m.as_str(), MetricKind::Ratio)),
            )
    }

    pub fn is_null_marker(&self, raw: &str) -> bool {
        let trimmed = raw.trim();
        trimmed.is_empty() || self.null_markers.iter().any(|marker| marker == trimmed)
    }

    pub fn is_metadata_key(&self, key: &str) -> bool {
        key == self.fields.date
            || key == self.fields.hour
            || key == self.fields.operator
            || key == self.fields.weekday
            || self.metadata_fields.iter().any(|field| field == key)
    }
}

fn owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|item| (*item).to_string()).collect()
}

impl Default for MetricSchema {
    fn default() -> Self {
        let aliases = [
            ("时间段", "小时"),
            ("整体GPM", "GPM"),
            ("商品-曝光人数", "商品曝光人数"),
            ("商品-点击人数", "商品点击人数"),
            ("商品曝光-点击率", "商品点击率"),
            ("直播间曝光-进入率", "曝光进入率"),
            ("商品点击-转化率", "点击转化率"),
            ("退货订单金额", "退款金额"),
            ("大瓶GMV", "大瓶装订单数"),
            ("三瓶GMV", "三瓶装订单数"),
            ("平均在线人数", "平均在线"),
            ("直播间曝光量", "直播间曝光次数"),
            ("广告ROI", "实际ROI"),
            ("广告GMV", "整体GSV"),
            ("停留时长", "人均观看时长"),
            ("优惠券", "智能优惠劵金额"),
            ("观看-成交率", "整体uv价值"),
            ("内容互动人数", "直播间进入人数"),
            ("新增粉丝团人数", "成交人数_1"),
            ("直播间评论数", "在线峰值"),
            ("退货订单数", "成交件数"),
            ("成交订单成本", "引流成本"),
        ]
        .into_iter()
        .map(|(alias, canonical)| (alias.to_string(), canonical.to_string()))
        .collect();

        Self {
            aliases,
            additive_metrics: owned(&[
                "消耗",
                "整体GMV",
                "智能优惠劵金额",
                "退款金额",
                "整体GSV",
                "成交人数",
                "成交件数",
                "直播间曝光次数",
                "直播间曝光人数",
                "直播间进入人数",
                "直播间观看次数",
                "在线峰值",
                "平均在线",
                "引流成本",
                "转化成本",
                "整体uv价值",
                "GPM",
                "人均观看时长",
                "观看人数",
                "商品曝光人数",
                "商品点击人数",
                "画面-消耗",
                "画面-gmv",
                "画面-曝光数",
                "画面-点击数",
                "画面-转化数",
                "视频-消耗",
                "视频-gmv",
                "视频-曝光数",
                "视频-点击数",
                "视频-转化数",
                "调控消耗",
                "调控GMV",
                "调控成交订单数",
            ]),
            ratio_metrics: owned(&[
                "整体ROI",
                "实际ROI",
                "客单价",
                "曝光进入率",
                "商品-曝光率",
                "商品点击率",
                "点击转化率",
                "画面-roi",
                "画面-消耗占比",
                "画面-CTR",
                "画面-CVR",
                "视频-roi",
                "视频-消耗占比",
                "视频-CTR",
                "视频-CVR",
                "调控ROI",
                "调控-消耗占比",
            ]),
            key_financial_metrics: owned(&["消耗", "整体GMV"]),
            fields: StructuralFields {
                date: "日期".to_string(),
                hour: "小时".to_string(),
                operator: "主播".to_string(),
                weekday: "星期几".to_string(),
            },
            metadata_fields: owned(&["场控", "场次"]),
            null_markers: owned(&["-"]),
        }
    }
}
