//! Query compiler: dashboard targets to aggregation documents
//!
//! Bucket aggregations nest in caller order: each entry in the target's
//! `bucketAggs` list becomes the single child of the entry before it, and the
//! deepest level receives the metric aggregations as siblings keyed by metric
//! id. A failure on any target aborts the whole batch; a partially-built
//! multi-search request is not meaningful to send.

use crate::error::Error;
use crate::query::request::{
    AggBody, DateHistogramAgg, ExtendedBounds, Filter, FiltersAgg, GeohashGridAgg, HistogramAgg,
    MultiSearchRequest, NamedAgg, SearchRequest, TermsAgg, DATE_FORMAT_EPOCH_MS,
};
use crate::query::types::{BucketAggSpec, BucketAggType, MetricSpec, MetricType, QueryTarget};
use serde_json::{Map, Value};
use std::collections::HashSet;
use tracing::debug;

const DEFAULT_TERMS_SIZE: i64 = 500;
const DEFAULT_GEOHASH_PRECISION: i64 = 3;

/// Compiles query targets into a multi-search request document.
pub struct QueryCompiler;

impl QueryCompiler {
    /// Compile all targets, preserving submission order. Order is the join key
    /// with the response envelope and must not change past this point.
    pub fn compile(targets: &[QueryTarget]) -> Result<MultiSearchRequest, Error> {
        let mut requests = Vec::with_capacity(targets.len());
        for target in targets {
            requests.push(Self::compile_target(target)?);
        }
        debug!(targets = targets.len(), "compiled multi-search request");
        Ok(MultiSearchRequest { requests })
    }

    fn compile_target(target: &QueryTarget) -> Result<SearchRequest, Error> {
        Self::check_ids(target)?;

        let mut request = SearchRequest {
            size: 0,
            ..Default::default()
        };
        // Target-level settings land on the document root untouched.
        request.custom_props = target.settings.0.clone();

        request.query.filters.push(Filter::Range {
            field: target.time_field.clone(),
            gte: target.time_range.from_ms.to_string(),
            lte: target.time_range.to_ms.to_string(),
            format: Some(DATE_FORMAT_EPOCH_MS.to_string()),
        });
        if let Some(raw_query) = &target.raw_query {
            request.query.filters.push(Filter::QueryString {
                query: raw_query.clone(),
                analyze_wildcard: true,
            });
        }

        // Build the chain inside out: metrics first, then wrap each bucket
        // aggregation around the current level, last declared innermost.
        let mut children = Self::metric_aggs(target);
        for spec in target.bucket_aggs.iter().rev() {
            let mut level_children = std::mem::take(&mut children);
            let body = match &spec.agg_type {
                BucketAggType::DateHistogram => Self::date_histogram_body(spec, target)?,
                BucketAggType::Histogram => Self::histogram_body(spec, target)?,
                BucketAggType::Terms => {
                    let (body, order_metric) = Self::terms_body(spec, target)?;
                    if let Some(metric) = order_metric {
                        level_children.push(metric);
                    }
                    body
                }
                BucketAggType::Filters => match Self::filters_body(spec) {
                    Some(body) => body,
                    None => {
                        // An empty filters list contributes no grouping level.
                        children = level_children;
                        continue;
                    }
                },
                BucketAggType::GeohashGrid => Self::geohash_grid_body(spec, target)?,
                BucketAggType::Other(tag) => {
                    return Err(Error::InvalidQuery {
                        ref_id: target.ref_id.clone(),
                        reason: format!("unknown bucket aggregation type \"{}\"", tag),
                    });
                }
            };
            children = vec![NamedAgg {
                id: spec.id.clone(),
                body,
                aggs: level_children,
            }];
        }
        request.aggs = children;

        Ok(request)
    }

    /// Ids join the compiled document to the response tree; they must be
    /// unique and non-empty within a target. Count metrics are exempt since
    /// they emit no aggregation and resolve from `doc_count`.
    fn check_ids(target: &QueryTarget) -> Result<(), Error> {
        let mut seen: HashSet<&str> = HashSet::new();
        for metric in &target.metrics {
            if metric.id.is_empty() {
                if metric.metric_type == MetricType::Count {
                    continue;
                }
                return Err(Error::InvalidQuery {
                    ref_id: target.ref_id.clone(),
                    reason: format!("metric of type \"{}\" has no id", metric.metric_type.as_str()),
                });
            }
            if !seen.insert(&metric.id) {
                return Err(Error::InvalidQuery {
                    ref_id: target.ref_id.clone(),
                    reason: format!("duplicate aggregation id \"{}\"", metric.id),
                });
            }
        }
        for agg in &target.bucket_aggs {
            if agg.id.is_empty() {
                return Err(Error::InvalidQuery {
                    ref_id: target.ref_id.clone(),
                    reason: format!(
                        "bucket aggregation of type \"{}\" has no id",
                        agg.agg_type.as_str()
                    ),
                });
            }
            if !seen.insert(&agg.id) {
                return Err(Error::InvalidQuery {
                    ref_id: target.ref_id.clone(),
                    reason: format!("duplicate aggregation id \"{}\"", agg.id),
                });
            }
        }
        Ok(())
    }

    fn metric_aggs(target: &QueryTarget) -> Vec<NamedAgg> {
        let mut aggs = Vec::new();
        for metric in &target.metrics {
            match &metric.metric_type {
                // Count reads doc_count off the owning bucket; raw documents
                // are requested through hits, not aggregations.
                MetricType::Count | MetricType::RawDocument => continue,
                t if t.is_pipeline() => {
                    if let Some(agg) = Self::pipeline_agg(metric) {
                        aggs.push(agg);
                    }
                }
                _ => aggs.push(NamedAgg::new(
                    metric.id.clone(),
                    AggBody::Metric {
                        metric_type: metric.metric_type.as_str().to_string(),
                        field: metric.field_str().to_string(),
                        settings: metric.settings.clone(),
                    },
                )),
            }
        }
        aggs
    }

    /// Pipeline metrics with unresolvable bucket paths are dropped, not
    /// errors: the editor produces them transiently while a reference is
    /// being filled in.
    fn pipeline_agg(metric: &MetricSpec) -> Option<NamedAgg> {
        let buckets_path = if metric.metric_type.has_multiple_bucket_paths() {
            if metric.pipeline_variables.is_empty() {
                return None;
            }
            let mut paths = Map::new();
            for variable in &metric.pipeline_variables {
                if variable.pipeline_agg.parse::<i64>().is_ok() {
                    paths.insert(
                        variable.name.clone(),
                        Value::String(variable.pipeline_agg.clone()),
                    );
                }
            }
            Value::Object(paths)
        } else {
            let reference = metric.pipeline_agg.as_deref()?;
            if reference.parse::<i64>().is_err() {
                return None;
            }
            Value::String(reference.to_string())
        };

        Some(NamedAgg::new(
            metric.id.clone(),
            AggBody::Pipeline {
                metric_type: metric.metric_type.as_str().to_string(),
                buckets_path,
                settings: metric.settings.clone(),
            },
        ))
    }

    fn date_histogram_body(spec: &BucketAggSpec, target: &QueryTarget) -> Result<AggBody, Error> {
        let settings = &spec.settings;
        Ok(AggBody::DateHistogram(DateHistogramAgg {
            field: spec.field.clone(),
            interval: Self::setting(target, spec, "interval", settings.str_value("interval"))?,
            min_doc_count: Self::setting(
                target,
                spec,
                "min_doc_count",
                settings.int_or("min_doc_count", 0),
            )?,
            missing: Self::setting(target, spec, "missing", settings.str_value("missing"))?,
            extended_bounds: ExtendedBounds {
                min: target.time_range.from_ms.to_string(),
                max: target.time_range.to_ms.to_string(),
            },
            format: Self::setting(
                target,
                spec,
                "format",
                settings.str_or("format", DATE_FORMAT_EPOCH_MS),
            )?,
            offset: Self::setting(target, spec, "offset", settings.str_value("offset"))?,
        }))
    }

    fn histogram_body(spec: &BucketAggSpec, target: &QueryTarget) -> Result<AggBody, Error> {
        let settings = &spec.settings;
        Ok(AggBody::Histogram(HistogramAgg {
            field: spec.field.clone(),
            interval: Self::setting(target, spec, "interval", settings.int_value("interval"))?,
            min_doc_count: Self::setting(
                target,
                spec,
                "min_doc_count",
                settings.int_or("min_doc_count", 0),
            )?,
            missing: Self::setting(target, spec, "missing", settings.int_value("missing"))?,
        }))
    }

    fn terms_body(
        spec: &BucketAggSpec,
        target: &QueryTarget,
    ) -> Result<(AggBody, Option<NamedAgg>), Error> {
        let settings = &spec.settings;

        let mut size =
            Self::setting(target, spec, "size", settings.int_or("size", DEFAULT_TERMS_SIZE))?;
        if size == 0 {
            size = DEFAULT_TERMS_SIZE;
        }

        let direction = Self::setting(target, spec, "order", settings.str_or("order", "desc"))?;
        let mut order = Map::new();
        let mut order_metric = None;
        match Self::setting(target, spec, "orderBy", settings.str_value("orderBy"))? {
            Some(order_by) => {
                order.insert(order_by.clone(), Value::String(direction));
                // Ordering by a metric requires that metric to exist directly
                // under the terms aggregation as well.
                if order_by.parse::<i64>().is_ok() {
                    if let Some(metric) = target.metric_by_id(&order_by) {
                        order_metric = Some(NamedAgg::new(
                            metric.id.clone(),
                            AggBody::Metric {
                                metric_type: metric.metric_type.as_str().to_string(),
                                field: metric.field_str().to_string(),
                                settings: metric.settings.clone(),
                            },
                        ));
                    }
                }
            }
            None => {
                order.insert("_term".to_string(), Value::String(direction));
            }
        }

        let body = AggBody::Terms(TermsAgg {
            field: spec.field.clone(),
            size,
            order,
            min_doc_count: Self::setting(
                target,
                spec,
                "min_doc_count",
                settings.int_value("min_doc_count"),
            )?,
            missing: Self::setting(target, spec, "missing", settings.str_value("missing"))?,
        });
        Ok((body, order_metric))
    }

    fn filters_body(spec: &BucketAggSpec) -> Option<AggBody> {
        let entries = spec.filter_entries();
        if entries.is_empty() {
            return None;
        }
        Some(AggBody::Filters(FiltersAgg {
            filters: entries
                .into_iter()
                .map(|entry| {
                    (
                        entry.label,
                        Filter::QueryString {
                            query: entry.query,
                            analyze_wildcard: true,
                        },
                    )
                })
                .collect(),
        }))
    }

    fn geohash_grid_body(spec: &BucketAggSpec, target: &QueryTarget) -> Result<AggBody, Error> {
        Ok(AggBody::GeohashGrid(GeohashGridAgg {
            field: spec.field.clone(),
            precision: Self::setting(
                target,
                spec,
                "precision",
                spec.settings.int_or("precision", DEFAULT_GEOHASH_PRECISION),
            )?,
        }))
    }

    fn setting<T>(
        target: &QueryTarget,
        spec: &BucketAggSpec,
        key: &str,
        value: Result<T, String>,
    ) -> Result<T, Error> {
        value.map_err(|reason| Error::InvalidSetting {
            ref_id: target.ref_id.clone(),
            key: format!("{}.{}", spec.id, key),
            reason,
        })
    }
}
