//! Multi-search response envelope and bucket-tree classification
//!
//! The backend payload is schema-loose: an aggregation result is a list of
//! buckets, a label-keyed map of buckets (filters), or a metric value object,
//! and the three shapes are only distinguishable by inspection. The envelope
//! is decoded once into [`AggNode`] here and the extractor consumes the tagged
//! form, so shape checks do not leak into the walk.

use crate::error::Error;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

const UNKNOWN_ERROR: &str = "Unknown search backend error";

/// Top-level multi-search response envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct MultiSearchResponse {
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default)]
    pub responses: Vec<SearchResponse>,
}

impl MultiSearchResponse {
    /// Decode the raw envelope. A payload that does not parse as the expected
    /// shape is fatal for the whole batch; there is nothing to pair targets
    /// against.
    pub fn from_json(body: &str) -> Result<Self, Error> {
        serde_json::from_str(body).map_err(|e| Error::InvalidResponse(e.to_string()))
    }
}

/// One per-target response slot.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub error: Option<Value>,
    #[serde(default)]
    pub aggregations: Map<String, Value>,
}

impl SearchResponse {
    /// Human-readable reason for a backend-reported error, if any.
    ///
    /// Prefers the error object's own `reason`, falls back to the first root
    /// cause, then to a fixed message for shapes we do not recognize.
    pub fn error_reason(&self) -> Option<String> {
        let error = self.error.as_ref()?;
        if let Some(reason) = error.get("reason").and_then(Value::as_str) {
            return Some(reason.to_string());
        }
        if let Some(reason) = error
            .pointer("/root_cause/0/reason")
            .and_then(Value::as_str)
        {
            return Some(reason.to_string());
        }
        Some(UNKNOWN_ERROR.to_string())
    }

    /// Classify the whole aggregation tree in one pass.
    pub fn agg_tree(&self) -> BTreeMap<String, AggNode> {
        classify_children(&self.aggregations)
    }
}

/// One aggregation result subtree, tagged by shape.
#[derive(Debug, Clone, PartialEq)]
pub enum AggNode {
    /// An ordered list of buckets (date_histogram, terms, histogram).
    BucketList(Vec<BucketNode>),
    /// Label-keyed buckets, as produced by a filters aggregation.
    FilterMap(BTreeMap<String, BucketNode>),
    /// A metric result: value object, values map or stats object.
    MetricValue(Value),
}

impl AggNode {
    fn classify(value: &Value) -> AggNode {
        if let Some(buckets) = value.get("buckets") {
            match buckets {
                Value::Array(items) => {
                    return AggNode::BucketList(
                        items.iter().map(BucketNode::from_value).collect(),
                    );
                }
                Value::Object(entries) => {
                    return AggNode::FilterMap(
                        entries
                            .iter()
                            .map(|(label, bucket)| {
                                (label.clone(), BucketNode::from_value(bucket))
                            })
                            .collect(),
                    );
                }
                _ => {}
            }
        }
        AggNode::MetricValue(value.clone())
    }
}

/// One grouping cell: key, doc count, and classified sub-aggregations.
#[derive(Debug, Clone, PartialEq)]
pub struct BucketNode {
    pub key: Option<Value>,
    pub key_as_string: Option<String>,
    pub doc_count: Option<f64>,
    pub aggs: BTreeMap<String, AggNode>,
}

impl BucketNode {
    fn from_value(value: &Value) -> Self {
        let empty = Map::new();
        let entries = value.as_object().unwrap_or(&empty);
        let mut aggs = BTreeMap::new();
        for (key, child) in entries {
            match key.as_str() {
                "key" | "key_as_string" | "doc_count" => {}
                _ => {
                    aggs.insert(key.clone(), AggNode::classify(child));
                }
            }
        }
        Self {
            key: entries.get("key").cloned(),
            key_as_string: entries
                .get("key_as_string")
                .and_then(Value::as_str)
                .map(str::to_string),
            doc_count: entries.get("doc_count").and_then(Value::as_f64),
            aggs,
        }
    }

    /// Bucket key as an epoch-millisecond number, for date_histogram levels.
    pub fn key_millis(&self) -> Option<i64> {
        match self.key.as_ref()? {
            Value::Number(n) => n.as_f64().map(|f| f as i64),
            Value::String(s) => s.parse::<f64>().ok().map(|f| f as i64),
            _ => None,
        }
    }

    /// Bucket key rendered as a group label. `key_as_string` wins when the
    /// backend provides it; numeric keys render in plain decimal form.
    pub fn key_label(&self) -> String {
        if let Some(s) = &self.key_as_string {
            return s.clone();
        }
        match &self.key {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => String::new(),
        }
    }

    /// Named metric result inside this bucket, if classified as one.
    pub fn metric_value(&self, id: &str) -> Option<&Value> {
        match self.aggs.get(id) {
            Some(AggNode::MetricValue(v)) => Some(v),
            _ => None,
        }
    }
}

fn classify_children(entries: &Map<String, Value>) -> BTreeMap<String, AggNode> {
    entries
        .iter()
        .map(|(id, value)| (id.clone(), AggNode::classify(value)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response(v: Value) -> SearchResponse {
        serde_json::from_value(v).unwrap()
    }

    // ===================================================================
    // Shape classification
    // ===================================================================

    #[test]
    fn test_bucket_list_classification() {
        let res = response(json!({
            "aggregations": {
                "2": { "buckets": [{ "key": 1000, "doc_count": 10 }] }
            }
        }));
        let tree = res.agg_tree();
        match tree.get("2") {
            Some(AggNode::BucketList(buckets)) => {
                assert_eq!(buckets.len(), 1);
                assert_eq!(buckets[0].key_millis(), Some(1000));
                assert_eq!(buckets[0].doc_count, Some(10.0));
            }
            other => panic!("expected a bucket list, got {:?}", other),
        }
    }

    #[test]
    fn test_filter_map_classification() {
        let res = response(json!({
            "aggregations": {
                "2": { "buckets": { "cpu": { "doc_count": 4 } } }
            }
        }));
        match res.agg_tree().get("2") {
            Some(AggNode::FilterMap(entries)) => {
                assert_eq!(entries["cpu"].doc_count, Some(4.0));
            }
            other => panic!("expected a filter map, got {:?}", other),
        }
    }

    #[test]
    fn test_metric_value_classification() {
        let res = response(json!({
            "aggregations": { "1": { "value": 88.0 } }
        }));
        match res.agg_tree().get("1") {
            Some(AggNode::MetricValue(v)) => assert_eq!(v["value"], 88.0),
            other => panic!("expected a metric value, got {:?}", other),
        }
    }

    #[test]
    fn test_nested_buckets_classified_recursively() {
        let res = response(json!({
            "aggregations": {
                "2": {
                    "buckets": [{
                        "key": "server1",
                        "doc_count": 4,
                        "3": { "buckets": [{ "key": 1000, "doc_count": 1 }] },
                        "1": { "value": 7 }
                    }]
                }
            }
        }));
        let tree = res.agg_tree();
        let Some(AggNode::BucketList(buckets)) = tree.get("2") else {
            panic!("expected a bucket list");
        };
        let bucket = &buckets[0];
        assert_eq!(bucket.key_label(), "server1");
        assert!(matches!(bucket.aggs.get("3"), Some(AggNode::BucketList(_))));
        assert_eq!(bucket.metric_value("1").unwrap()["value"], 7);
    }

    #[test]
    fn test_numeric_key_label_renders_decimal() {
        let res = response(json!({
            "aggregations": { "2": { "buckets": [{ "key": 0, "doc_count": 1 }] } }
        }));
        let Some(AggNode::BucketList(buckets)) = res.agg_tree().get("2").cloned() else {
            panic!("expected a bucket list");
        };
        assert_eq!(buckets[0].key_label(), "0");
    }

    #[test]
    fn test_key_as_string_wins_over_key() {
        let res = response(json!({
            "aggregations": {
                "2": { "buckets": [{ "key": 1000, "key_as_string": "1970-01-01", "doc_count": 1 }] }
            }
        }));
        let Some(AggNode::BucketList(buckets)) = res.agg_tree().get("2").cloned() else {
            panic!("expected a bucket list");
        };
        assert_eq!(buckets[0].key_label(), "1970-01-01");
        assert_eq!(buckets[0].key_millis(), Some(1000));
    }

    // ===================================================================
    // Backend error extraction
    // ===================================================================

    #[test]
    fn test_error_reason_direct() {
        let res = response(json!({
            "error": { "reason": "all shards failed" }
        }));
        assert_eq!(res.error_reason().unwrap(), "all shards failed");
    }

    #[test]
    fn test_error_reason_from_root_cause() {
        let res = response(json!({
            "error": { "root_cause": [{ "reason": "parse failure" }] }
        }));
        assert_eq!(res.error_reason().unwrap(), "parse failure");
    }

    #[test]
    fn test_error_reason_unknown_shape() {
        let res = response(json!({ "error": { "code": 17 } }));
        assert_eq!(res.error_reason().unwrap(), UNKNOWN_ERROR);
    }

    #[test]
    fn test_no_error_object() {
        let res = response(json!({ "aggregations": {} }));
        assert!(res.error_reason().is_none());
    }

    // ===================================================================
    // Envelope decode
    // ===================================================================

    #[test]
    fn test_envelope_from_json() {
        let envelope = MultiSearchResponse::from_json(
            r#"{ "status": 200, "responses": [{ "aggregations": {} }] }"#,
        )
        .unwrap();
        assert_eq!(envelope.status, Some(200));
        assert_eq!(envelope.responses.len(), 1);
    }

    #[test]
    fn test_malformed_envelope_is_fatal() {
        let err = MultiSearchResponse::from_json(r#"{ "responses": 7 }"#).unwrap_err();
        assert!(matches!(err, crate::error::Error::InvalidResponse(_)));
    }
}
