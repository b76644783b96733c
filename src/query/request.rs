//! The aggregation document model: the compiled search request
//!
//! Pure data plus its serialization contract. Two wire details matter to
//! strict backends and are covered by tests here: the bool-filter position
//! collapses to a bare object for exactly one filter and an array for two or
//! more, and range bounds are formatted as epoch-millisecond strings unless a
//! format override is set.
//!
//! Aggregation ids are reused verbatim as the response keys; the document never
//! regenerates or reorders them.

use crate::settings::SettingsMap;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

/// Date format tag for epoch-millisecond range bounds.
pub const DATE_FORMAT_EPOCH_MS: &str = "epoch_millis";

/// One compiled search request body.
#[derive(Debug, Clone, Default)]
pub struct SearchRequest {
    pub size: usize,
    pub sort: Map<String, Value>,
    /// Free-form properties spliced into the document root.
    pub custom_props: Map<String, Value>,
    pub query: BoolQuery,
    pub aggs: Vec<NamedAgg>,
}

impl Serialize for SearchRequest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("size", &self.size)?;
        if !self.sort.is_empty() {
            map.serialize_entry("sort", &self.sort)?;
        }
        for (key, value) in &self.custom_props {
            map.serialize_entry(key, value)?;
        }
        map.serialize_entry("query", &QueryClause(&self.query))?;
        if !self.aggs.is_empty() {
            map.serialize_entry("aggs", &AggsMap(&self.aggs))?;
        }
        map.end()
    }
}

struct QueryClause<'a>(&'a BoolQuery);

impl Serialize for QueryClause<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry("bool", self.0)?;
        map.end()
    }
}

/// A "must all filters match" boolean query.
#[derive(Debug, Clone, Default)]
pub struct BoolQuery {
    pub filters: Vec<Filter>,
}

impl Serialize for BoolQuery {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        // Exactly one filter serializes as a bare object, two or more as an
        // array. Some backends are strict about which shape appears here.
        match self.filters.len() {
            0 => {}
            1 => map.serialize_entry("filter", &self.filters[0])?,
            _ => map.serialize_entry("filter", &self.filters)?,
        }
        map.end()
    }
}

/// A single search filter clause.
#[derive(Debug, Clone)]
pub enum Filter {
    QueryString {
        query: String,
        analyze_wildcard: bool,
    },
    Range {
        field: String,
        gte: String,
        lte: String,
        format: Option<String>,
    },
}

impl Serialize for Filter {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        match self {
            Self::QueryString {
                query,
                analyze_wildcard,
            } => {
                #[derive(Serialize)]
                struct Body<'a> {
                    query: &'a str,
                    analyze_wildcard: bool,
                }
                map.serialize_entry(
                    "query_string",
                    &Body {
                        query,
                        analyze_wildcard: *analyze_wildcard,
                    },
                )?;
            }
            Self::Range {
                field,
                gte,
                lte,
                format,
            } => {
                #[derive(Serialize)]
                struct Bounds<'a> {
                    gte: &'a str,
                    lte: &'a str,
                    #[serde(skip_serializing_if = "Option::is_none")]
                    format: Option<&'a str>,
                }
                let mut inner = Map::new();
                inner.insert(
                    field.clone(),
                    serde_json::to_value(Bounds {
                        gte,
                        lte,
                        format: format.as_deref(),
                    })
                    .map_err(serde::ser::Error::custom)?,
                );
                map.serialize_entry("range", &inner)?;
            }
        }
        map.end()
    }
}

/// A named aggregation with optional nested sub-aggregations.
#[derive(Debug, Clone)]
pub struct NamedAgg {
    pub id: String,
    pub body: AggBody,
    pub aggs: Vec<NamedAgg>,
}

impl NamedAgg {
    pub fn new(id: impl Into<String>, body: AggBody) -> Self {
        Self {
            id: id.into(),
            body,
            aggs: Vec::new(),
        }
    }
}

impl Serialize for NamedAgg {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry(self.body.type_key(), &AggPayload(&self.body))?;
        if !self.aggs.is_empty() {
            map.serialize_entry("aggs", &AggsMap(&self.aggs))?;
        }
        map.end()
    }
}

struct AggsMap<'a>(&'a [NamedAgg]);

impl Serialize for AggsMap<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for agg in self.0 {
            map.serialize_entry(&agg.id, agg)?;
        }
        map.end()
    }
}

/// The type-specific aggregation payload.
#[derive(Debug, Clone)]
pub enum AggBody {
    DateHistogram(DateHistogramAgg),
    Histogram(HistogramAgg),
    Terms(TermsAgg),
    Filters(FiltersAgg),
    GeohashGrid(GeohashGridAgg),
    /// A metric aggregation; settings are spliced into the emitted body.
    Metric {
        metric_type: String,
        field: String,
        settings: SettingsMap,
    },
    /// A pipeline metric referencing sibling aggregations by bucket path.
    Pipeline {
        metric_type: String,
        buckets_path: Value,
        settings: SettingsMap,
    },
}

impl AggBody {
    fn type_key(&self) -> &str {
        match self {
            Self::DateHistogram(_) => "date_histogram",
            Self::Histogram(_) => "histogram",
            Self::Terms(_) => "terms",
            Self::Filters(_) => "filters",
            Self::GeohashGrid(_) => "geohash_grid",
            Self::Metric { metric_type, .. } | Self::Pipeline { metric_type, .. } => metric_type,
        }
    }
}

struct AggPayload<'a>(&'a AggBody);

impl Serialize for AggPayload<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0 {
            AggBody::DateHistogram(a) => a.serialize(serializer),
            AggBody::Histogram(a) => a.serialize(serializer),
            AggBody::Terms(a) => a.serialize(serializer),
            AggBody::Filters(a) => a.serialize(serializer),
            AggBody::GeohashGrid(a) => a.serialize(serializer),
            AggBody::Metric {
                field, settings, ..
            } => {
                let mut map = serializer.serialize_map(None)?;
                map.serialize_entry("field", field)?;
                for (key, value) in settings.iter_non_null() {
                    map.serialize_entry(key, value)?;
                }
                map.end()
            }
            AggBody::Pipeline {
                buckets_path,
                settings,
                ..
            } => {
                let mut map = serializer.serialize_map(None)?;
                map.serialize_entry("buckets_path", buckets_path)?;
                for (key, value) in settings.iter_non_null() {
                    map.serialize_entry(key, value)?;
                }
                map.end()
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtendedBounds {
    pub min: String,
    pub max: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DateHistogramAgg {
    pub field: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
    pub min_doc_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub missing: Option<String>,
    pub extended_bounds: ExtendedBounds,
    pub format: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistogramAgg {
    pub field: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<i64>,
    pub min_doc_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub missing: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TermsAgg {
    pub field: String,
    pub size: i64,
    pub order: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_doc_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub missing: Option<String>,
}

/// Named filter buckets, keyed by label. Declaration order is kept on the
/// model; the response parser relies on it because the backend returns these
/// buckets as an unordered mapping.
#[derive(Debug, Clone)]
pub struct FiltersAgg {
    pub filters: Vec<(String, Filter)>,
}

impl Serialize for FiltersAgg {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        let mut inner = Map::new();
        for (label, filter) in &self.filters {
            inner.insert(
                label.clone(),
                serde_json::to_value(filter).map_err(serde::ser::Error::custom)?,
            );
        }
        map.serialize_entry("filters", &inner)?;
        map.end()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GeohashGridAgg {
    pub field: String,
    pub precision: i64,
}

/// The combined multi-request envelope; request order is the positional join
/// key with the response envelope and must survive transport untouched.
#[derive(Debug, Clone, Default)]
pub struct MultiSearchRequest {
    pub requests: Vec<SearchRequest>,
}
