//! The dashboard-side query model
//!
//! A [`QueryTarget`] is one logical request unit as authored in the dashboard:
//! a time field, an ordered list of metric computations, an ordered list of
//! bucket aggregations that define a strict parent→child grouping chain, an
//! optional alias template and a raw query string. Targets are parsed once from
//! the caller's JSON and are immutable thereafter.

use crate::error::Error;
use crate::settings::SettingsMap;
use serde::de::Deserializer;
use serde::{Deserialize, Serialize, Serializer};

/// Inclusive-from, exclusive-to time range in epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub from_ms: i64,
    pub to_ms: i64,
}

impl TimeRange {
    pub fn new(from_ms: i64, to_ms: i64) -> Self {
        Self { from_ms, to_ms }
    }
}

/// Metric computation type tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetricType {
    Count,
    Avg,
    Sum,
    Max,
    Min,
    ExtendedStats,
    Percentiles,
    Cardinality,
    MovingAvg,
    Derivative,
    CumulativeSum,
    BucketScript,
    RawDocument,
    /// Forward-compatible catch-all; compiled and resolved generically.
    Other(String),
}

impl MetricType {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "count" => Self::Count,
            "avg" => Self::Avg,
            "sum" => Self::Sum,
            "max" => Self::Max,
            "min" => Self::Min,
            "extended_stats" => Self::ExtendedStats,
            "percentiles" => Self::Percentiles,
            "cardinality" => Self::Cardinality,
            "moving_avg" => Self::MovingAvg,
            "derivative" => Self::Derivative,
            "cumulative_sum" => Self::CumulativeSum,
            "bucket_script" => Self::BucketScript,
            "raw_document" => Self::RawDocument,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Count => "count",
            Self::Avg => "avg",
            Self::Sum => "sum",
            Self::Max => "max",
            Self::Min => "min",
            Self::ExtendedStats => "extended_stats",
            Self::Percentiles => "percentiles",
            Self::Cardinality => "cardinality",
            Self::MovingAvg => "moving_avg",
            Self::Derivative => "derivative",
            Self::CumulativeSum => "cumulative_sum",
            Self::BucketScript => "bucket_script",
            Self::RawDocument => "raw_document",
            Self::Other(s) => s,
        }
    }

    /// Pipeline metrics are computed by the backend from sibling metric values
    /// rather than from raw documents.
    pub fn is_pipeline(&self) -> bool {
        matches!(
            self,
            Self::MovingAvg | Self::Derivative | Self::CumulativeSum | Self::BucketScript
        )
    }

    /// bucket_script references several sibling metrics through named variables.
    pub fn has_multiple_bucket_paths(&self) -> bool {
        matches!(self, Self::BucketScript)
    }
}

impl Serialize for MetricType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for MetricType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        Ok(Self::from_tag(&tag))
    }
}

/// Bucket aggregation type tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BucketAggType {
    DateHistogram,
    Histogram,
    Terms,
    Filters,
    GeohashGrid,
    Other(String),
}

impl BucketAggType {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "date_histogram" => Self::DateHistogram,
            "histogram" => Self::Histogram,
            "terms" => Self::Terms,
            "filters" => Self::Filters,
            "geohash_grid" => Self::GeohashGrid,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::DateHistogram => "date_histogram",
            Self::Histogram => "histogram",
            Self::Terms => "terms",
            Self::Filters => "filters",
            Self::GeohashGrid => "geohash_grid",
            Self::Other(s) => s,
        }
    }
}

impl Serialize for BucketAggType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for BucketAggType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        Ok(Self::from_tag(&tag))
    }
}

/// A named reference from a bucket_script metric to a sibling metric's id.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineVariable {
    pub name: String,
    #[serde(rename = "pipelineAgg")]
    pub pipeline_agg: String,
}

/// One metric computation within a target.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricSpec {
    /// Unique within the target; doubles as the aggregation id in the emitted
    /// document and the lookup key in the response. Count metrics may omit it.
    #[serde(default)]
    pub id: String,

    #[serde(rename = "type")]
    pub metric_type: MetricType,

    #[serde(default)]
    pub field: Option<String>,

    #[serde(default)]
    pub settings: SettingsMap,

    /// Per-kind flags, e.g. which extended-stats components to emit.
    #[serde(default)]
    pub meta: SettingsMap,

    /// Single bucket path for moving_avg / derivative / cumulative_sum.
    #[serde(default, rename = "pipelineAgg")]
    pub pipeline_agg: Option<String>,

    /// Named bucket paths for bucket_script.
    #[serde(default, rename = "pipelineVariables")]
    pub pipeline_variables: Vec<PipelineVariable>,
}

impl MetricSpec {
    pub fn field_str(&self) -> &str {
        self.field.as_deref().unwrap_or("")
    }
}

/// One bucket aggregation (grouping level) within a target.
#[derive(Debug, Clone, Deserialize)]
pub struct BucketAggSpec {
    #[serde(default)]
    pub id: String,

    #[serde(rename = "type")]
    pub agg_type: BucketAggType,

    #[serde(default)]
    pub field: String,

    #[serde(default)]
    pub settings: SettingsMap,
}

/// A filter entry inside a filters bucket aggregation's settings.
///
/// The label defaults to the query text; it becomes the bucket key in the
/// response and so defines both series naming and bucket ordering.
#[derive(Debug, Clone)]
pub struct FilterEntry {
    pub query: String,
    pub label: String,
}

impl BucketAggSpec {
    /// Declared filter list for a filters aggregation, in declaration order.
    pub fn filter_entries(&self) -> Vec<FilterEntry> {
        let Some(filters) = self.settings.array("filters") else {
            return Vec::new();
        };
        filters
            .iter()
            .map(|f| {
                let query = f
                    .get("query")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                let label = match f.get("label").and_then(|v| v.as_str()) {
                    Some(l) if !l.is_empty() => l.to_string(),
                    _ => query.clone(),
                };
                FilterEntry { query, label }
            })
            .collect()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TargetBody {
    #[serde(default)]
    time_field: String,
    #[serde(default)]
    metrics: Vec<MetricSpec>,
    #[serde(default)]
    bucket_aggs: Vec<BucketAggSpec>,
    #[serde(default)]
    alias: Option<String>,
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    settings: SettingsMap,
}

/// One logical request unit, parsed from the dashboard's target JSON.
#[derive(Debug, Clone)]
pub struct QueryTarget {
    /// Unique per batch; carried onto the target's result slot.
    pub ref_id: String,
    pub time_field: String,
    pub time_range: TimeRange,
    pub metrics: Vec<MetricSpec>,
    pub bucket_aggs: Vec<BucketAggSpec>,
    pub alias: Option<String>,
    /// Raw query-string filter text; empty or absent means match-all.
    pub raw_query: Option<String>,
    /// Backend-specific settings passed through verbatim.
    pub settings: SettingsMap,
}

impl QueryTarget {
    /// Parse a target from the dashboard JSON schema. Recognized top-level keys
    /// are `timeField`, `metrics`, `bucketAggs`, `alias`, `query` and
    /// `settings`; anything else is a forward-compatible no-op.
    pub fn from_json(
        ref_id: impl Into<String>,
        time_range: TimeRange,
        body: &str,
    ) -> Result<Self, Error> {
        let body: TargetBody = serde_json::from_str(body)?;
        Ok(Self {
            ref_id: ref_id.into(),
            time_field: body.time_field,
            time_range,
            metrics: body.metrics,
            bucket_aggs: body.bucket_aggs,
            alias: body.alias.filter(|a| !a.is_empty()),
            raw_query: body.query.filter(|q| !q.is_empty()),
            settings: body.settings,
        })
    }

    pub fn metric_by_id(&self, id: &str) -> Option<&MetricSpec> {
        if id.is_empty() {
            return None;
        }
        self.metrics.iter().find(|m| m.id == id)
    }

    pub fn bucket_agg_by_id(&self, id: &str) -> Option<&BucketAggSpec> {
        self.bucket_aggs.iter().find(|b| b.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range() -> TimeRange {
        TimeRange::new(1_526_406_600_000, 1_526_406_900_000)
    }

    #[test]
    fn test_parse_minimal_target() {
        let target = QueryTarget::from_json(
            "A",
            range(),
            r#"{
                "timeField": "@timestamp",
                "metrics": [{ "type": "count", "id": "1" }],
                "bucketAggs": [{ "type": "date_histogram", "field": "@timestamp", "id": "2" }]
            }"#,
        )
        .unwrap();

        assert_eq!(target.ref_id, "A");
        assert_eq!(target.time_field, "@timestamp");
        assert_eq!(target.metrics.len(), 1);
        assert_eq!(target.metrics[0].metric_type, MetricType::Count);
        assert_eq!(target.bucket_aggs.len(), 1);
        assert_eq!(target.bucket_aggs[0].agg_type, BucketAggType::DateHistogram);
        assert!(target.alias.is_none());
        assert!(target.raw_query.is_none());
    }

    #[test]
    fn test_unknown_keys_are_ignored() {
        let target = QueryTarget::from_json(
            "A",
            range(),
            r#"{
                "timeField": "@timestamp",
                "metrics": [],
                "bucketAggs": [],
                "someFutureKnob": { "nested": true }
            }"#,
        )
        .unwrap();
        assert!(target.metrics.is_empty());
    }

    #[test]
    fn test_empty_alias_and_query_normalize_to_none() {
        let target = QueryTarget::from_json(
            "A",
            range(),
            r#"{ "timeField": "@timestamp", "alias": "", "query": "" }"#,
        )
        .unwrap();
        assert!(target.alias.is_none());
        assert!(target.raw_query.is_none());
    }

    #[test]
    fn test_parse_pipeline_metric() {
        let target = QueryTarget::from_json(
            "A",
            range(),
            r#"{
                "timeField": "@timestamp",
                "metrics": [
                    { "id": "1", "type": "sum", "field": "@value" },
                    {
                        "id": "4",
                        "type": "bucket_script",
                        "pipelineVariables": [
                            { "name": "var1", "pipelineAgg": "1" }
                        ],
                        "settings": { "script": "params.var1 * 2" }
                    }
                ],
                "bucketAggs": [{ "type": "date_histogram", "field": "@timestamp", "id": "2" }]
            }"#,
        )
        .unwrap();

        let script = &target.metrics[1];
        assert_eq!(script.metric_type, MetricType::BucketScript);
        assert!(script.metric_type.is_pipeline());
        assert!(script.metric_type.has_multiple_bucket_paths());
        assert_eq!(script.pipeline_variables.len(), 1);
        assert_eq!(script.pipeline_variables[0].pipeline_agg, "1");
        assert_eq!(
            script.settings.str_value("script").unwrap().as_deref(),
            Some("params.var1 * 2")
        );
    }

    #[test]
    fn test_unknown_metric_type_round_trips() {
        let m = MetricType::from_tag("median_absolute_deviation");
        assert_eq!(m.as_str(), "median_absolute_deviation");
        assert!(!m.is_pipeline());
    }

    #[test]
    fn test_filter_entries_label_defaults_to_query() {
        let target = QueryTarget::from_json(
            "A",
            range(),
            r#"{
                "timeField": "@timestamp",
                "bucketAggs": [{
                    "type": "filters",
                    "id": "2",
                    "settings": {
                        "filters": [
                            { "query": "@metric:cpu" },
                            { "query": "@metric:logins.count", "label": "logins" }
                        ]
                    }
                }]
            }"#,
        )
        .unwrap();

        let entries = target.bucket_aggs[0].filter_entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].label, "@metric:cpu");
        assert_eq!(entries[1].label, "logins");
        assert_eq!(entries[1].query, "@metric:logins.count");
    }

    #[test]
    fn test_count_metric_may_omit_id() {
        let target = QueryTarget::from_json(
            "A",
            range(),
            r#"{ "timeField": "@timestamp", "metrics": [{ "type": "count" }] }"#,
        )
        .unwrap();
        assert_eq!(target.metrics[0].id, "");
    }
}
