//! Series extraction from a multi-search response
//!
//! Pairing between responses and targets is positional: slot N answers target
//! N in submission order, since the backend does not echo a reference id. A
//! backend error in one slot is recorded against that target only; sibling
//! targets still produce series.

use crate::error::Error;
use crate::query::types::{BucketAggType, MetricSpec, MetricType, QueryTarget};
use crate::response::naming;
use crate::response::types::{AggNode, BucketNode, MultiSearchResponse};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use tracing::warn;

/// Extended-stats components in their fixed emission order.
const EXTENDED_STATS_ORDER: &[&str] = &[
    "max",
    "std_deviation_bounds_lower",
    "std_deviation_bounds_upper",
    "min",
    "avg",
    "sum",
    "std_deviation",
];

/// One point of a series. A `None` value is a real null point, kept so time
/// and value sequences stay the same length across series of one query.
#[derive(Debug, Clone, PartialEq)]
pub struct DataPoint {
    pub timestamp: DateTime<Utc>,
    pub value: Option<f64>,
}

/// A named, time-indexed value series.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub name: String,
    pub points: Vec<DataPoint>,
}

/// The outcome for one target: its series, or the backend's error for it.
#[derive(Debug, Clone)]
pub struct TargetResult {
    pub ref_id: String,
    pub series: Vec<Series>,
    pub error: Option<String>,
}

/// Per-target results in original submission order.
#[derive(Debug, Clone)]
pub struct BatchResult {
    pub results: Vec<TargetResult>,
}

/// An extracted series before naming: the grouping key path (outermost
/// first), the metric tag and enough metric identity to compute the name.
#[derive(Debug, Clone)]
pub(crate) struct SeriesDraft {
    pub(crate) tags: Vec<(String, String)>,
    pub(crate) metric_tag: String,
    pub(crate) field: String,
    pub(crate) metric_id: String,
    pub(crate) points: Vec<DataPoint>,
}

/// Turns a decoded multi-search response back into named series, one result
/// slot per submitted target.
pub struct ResponseParser<'a> {
    response: &'a MultiSearchResponse,
    targets: &'a [QueryTarget],
}

impl<'a> ResponseParser<'a> {
    pub fn new(response: &'a MultiSearchResponse, targets: &'a [QueryTarget]) -> Self {
        Self { response, targets }
    }

    pub fn parse(&self) -> Result<BatchResult, Error> {
        if self.response.responses.len() != self.targets.len() {
            return Err(Error::ResponseCountMismatch {
                responses: self.response.responses.len(),
                targets: self.targets.len(),
            });
        }

        let mut results = Vec::with_capacity(self.targets.len());
        for (target, slot) in self.targets.iter().zip(&self.response.responses) {
            if let Some(reason) = slot.error_reason() {
                warn!(ref_id = %target.ref_id, %reason, "backend reported an error for target");
                results.push(TargetResult {
                    ref_id: target.ref_id.clone(),
                    series: Vec::new(),
                    error: Some(reason),
                });
                continue;
            }

            let tree = slot.agg_tree();
            let mut drafts = Vec::new();
            if !target.bucket_aggs.is_empty() {
                Self::walk(target, &tree, 0, &[], &mut drafts);
            }
            Self::trim_edges(target, &mut drafts);
            results.push(TargetResult {
                ref_id: target.ref_id.clone(),
                series: Self::name_all(target, drafts),
                error: None,
            });
        }
        Ok(BatchResult { results })
    }

    fn walk(
        target: &QueryTarget,
        aggs: &BTreeMap<String, AggNode>,
        depth: usize,
        tags: &[(String, String)],
        drafts: &mut Vec<SeriesDraft>,
    ) {
        let max_depth = target.bucket_aggs.len() - 1;
        for (id, node) in aggs {
            let Some(spec) = target.bucket_agg_by_id(id) else {
                continue;
            };
            if depth == max_depth {
                // Only a time histogram at the deepest level yields series;
                // any other terminal shape would be tabular output.
                if spec.agg_type == BucketAggType::DateHistogram {
                    if let AggNode::BucketList(buckets) = node {
                        Self::process_metrics(target, buckets, tags, drafts);
                    }
                }
                continue;
            }
            match node {
                AggNode::BucketList(buckets) => {
                    for bucket in buckets {
                        let mut child_tags = tags.to_vec();
                        child_tags.push((spec.field.clone(), bucket.key_label()));
                        Self::walk(target, &bucket.aggs, depth + 1, &child_tags, drafts);
                    }
                }
                AggNode::FilterMap(entries) => {
                    // Declared filters first, in declaration order; buckets
                    // the request never declared come after.
                    let mut seen: HashSet<String> = HashSet::new();
                    for entry in spec.filter_entries() {
                        if let Some(bucket) = entries.get(entry.label.as_str()) {
                            let mut child_tags = tags.to_vec();
                            child_tags.push(("filter".to_string(), entry.label.clone()));
                            Self::walk(target, &bucket.aggs, depth + 1, &child_tags, drafts);
                            seen.insert(entry.label);
                        }
                    }
                    for (label, bucket) in entries {
                        if seen.contains(label) {
                            continue;
                        }
                        let mut child_tags = tags.to_vec();
                        child_tags.push(("filter".to_string(), label.clone()));
                        Self::walk(target, &bucket.aggs, depth + 1, &child_tags, drafts);
                    }
                }
                AggNode::MetricValue(_) => {}
            }
        }
    }

    fn process_metrics(
        target: &QueryTarget,
        buckets: &[BucketNode],
        tags: &[(String, String)],
        drafts: &mut Vec<SeriesDraft>,
    ) {
        for metric in &target.metrics {
            match &metric.metric_type {
                MetricType::Count => {
                    let points = buckets
                        .iter()
                        .filter_map(|b| {
                            Some(DataPoint {
                                timestamp: bucket_time(b)?,
                                value: b.doc_count,
                            })
                        })
                        .collect();
                    drafts.push(SeriesDraft {
                        tags: tags.to_vec(),
                        metric_tag: MetricType::Count.as_str().to_string(),
                        field: String::new(),
                        metric_id: metric.id.clone(),
                        points,
                    });
                }
                MetricType::Percentiles => {
                    Self::process_percentiles(metric, buckets, tags, drafts);
                }
                MetricType::ExtendedStats => {
                    Self::process_extended_stats(metric, buckets, tags, drafts);
                }
                MetricType::RawDocument => {}
                MetricType::Other(tag) if tag == "histogram" => {}
                _ => {
                    let points = buckets
                        .iter()
                        .filter_map(|b| {
                            Some(DataPoint {
                                timestamp: bucket_time(b)?,
                                value: simple_value(b, &metric.id),
                            })
                        })
                        .collect();
                    drafts.push(SeriesDraft {
                        tags: tags.to_vec(),
                        metric_tag: metric.metric_type.as_str().to_string(),
                        field: metric.field_str().to_string(),
                        metric_id: metric.id.clone(),
                        points,
                    });
                }
            }
        }
    }

    fn process_percentiles(
        metric: &MetricSpec,
        buckets: &[BucketNode],
        tags: &[(String, String)],
        drafts: &mut Vec<SeriesDraft>,
    ) {
        if buckets.is_empty() {
            return;
        }
        for key in Self::percentile_keys(metric, buckets) {
            let points = buckets
                .iter()
                .filter_map(|b| {
                    Some(DataPoint {
                        timestamp: bucket_time(b)?,
                        value: percentile_value(b, &metric.id, &key),
                    })
                })
                .collect();
            drafts.push(SeriesDraft {
                tags: tags.to_vec(),
                metric_tag: format!("p{}", key),
                field: metric.field_str().to_string(),
                metric_id: metric.id.clone(),
                points,
            });
        }
    }

    /// Percentile components in the order they were requested; without a
    /// `percents` setting, the first bucket's value keys in numeric order.
    fn percentile_keys(metric: &MetricSpec, buckets: &[BucketNode]) -> Vec<String> {
        if let Some(percents) = metric.settings.array("percents") {
            return percents.iter().filter_map(render_percent).collect();
        }
        let mut keys: Vec<String> = buckets[0]
            .metric_value(&metric.id)
            .and_then(|v| v.get("values"))
            .and_then(Value::as_object)
            .map(|values| values.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort_by(|a, b| {
            let a = a.parse::<f64>().unwrap_or(f64::MAX);
            let b = b.parse::<f64>().unwrap_or(f64::MAX);
            a.partial_cmp(&b).unwrap_or(std::cmp::Ordering::Equal)
        });
        keys
    }

    fn process_extended_stats(
        metric: &MetricSpec,
        buckets: &[BucketNode],
        tags: &[(String, String)],
        drafts: &mut Vec<SeriesDraft>,
    ) {
        for stat in EXTENDED_STATS_ORDER {
            if metric.meta.bool_value(stat) != Some(true) {
                continue;
            }
            let points = buckets
                .iter()
                .filter_map(|b| {
                    Some(DataPoint {
                        timestamp: bucket_time(b)?,
                        value: stat_value(b, &metric.id, stat),
                    })
                })
                .collect();
            drafts.push(SeriesDraft {
                tags: tags.to_vec(),
                metric_tag: stat.to_string(),
                field: metric.field_str().to_string(),
                metric_id: metric.id.clone(),
                points,
            });
        }
    }

    /// Drop N buckets from each edge of every series, per the first date
    /// histogram's `trimEdges` setting. Series too short to trim are kept
    /// whole.
    fn trim_edges(target: &QueryTarget, drafts: &mut [SeriesDraft]) {
        let Some(histogram) = target
            .bucket_aggs
            .iter()
            .find(|a| a.agg_type == BucketAggType::DateHistogram)
        else {
            return;
        };
        let trim = match histogram.settings.int_value("trimEdges") {
            Ok(Some(n)) if n > 0 => n as usize,
            _ => return,
        };
        for draft in drafts {
            if draft.points.len() > trim * 2 {
                let keep = draft.points.len() - trim * 2;
                draft.points.drain(..trim);
                draft.points.truncate(keep);
            }
        }
    }

    fn name_all(target: &QueryTarget, drafts: Vec<SeriesDraft>) -> Vec<Series> {
        let metric_type_count = drafts
            .iter()
            .map(|d| d.metric_tag.as_str())
            .collect::<HashSet<_>>()
            .len();
        drafts
            .into_iter()
            .map(|draft| Series {
                name: naming::series_name(&draft, target, metric_type_count),
                points: draft.points,
            })
            .collect()
    }
}

/// Bucket key as a UTC timestamp, truncated to whole seconds.
fn bucket_time(bucket: &BucketNode) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(bucket.key_millis()? / 1000, 0)
}

/// Value of a plain metric in a bucket. `normalized_value` wins over `value`
/// when the backend provides it (unit-normalized derivatives).
fn simple_value(bucket: &BucketNode, id: &str) -> Option<f64> {
    let value = bucket.metric_value(id)?;
    value
        .get("normalized_value")
        .filter(|v| !v.is_null())
        .or_else(|| value.get("value"))
        .and_then(Value::as_f64)
}

fn percentile_value(bucket: &BucketNode, id: &str, key: &str) -> Option<f64> {
    let values = bucket.metric_value(id)?.get("values")?;
    values
        .get(key)
        .or_else(|| values.get(format!("{}.0", key).as_str()))
        .and_then(Value::as_f64)
}

fn stat_value(bucket: &BucketNode, id: &str, stat: &str) -> Option<f64> {
    let value = bucket.metric_value(id)?;
    match stat {
        "std_deviation_bounds_upper" => value.pointer("/std_deviation_bounds/upper"),
        "std_deviation_bounds_lower" => value.pointer("/std_deviation_bounds/lower"),
        _ => value.get(stat),
    }
    .and_then(Value::as_f64)
}

/// A requested percentile rendered as its value-map key: integral percents
/// drop the trailing ".0".
fn render_percent(percent: &Value) -> Option<String> {
    match percent {
        Value::Number(n) => match n.as_i64() {
            Some(i) => Some(i.to_string()),
            None => n.as_f64().map(|f| {
                if f.fract() == 0.0 {
                    format!("{}", f as i64)
                } else {
                    f.to_string()
                }
            }),
        },
        Value::String(s) => Some(s.clone()),
        _ => None,
    }
}
