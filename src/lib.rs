//! Bidirectional compiler between dashboard time-series queries and the
//! Elasticsearch/OpenSearch aggregation DSL
//!
//! The forward direction turns declarative query targets (metrics plus a
//! chain of bucket aggregations) into multi-search request documents; the
//! reverse direction turns the nested aggregation response tree back into
//! named, time-indexed value series.
//!
//! # Compiling
//!
//! Targets compile as a batch. Each one becomes a `size: 0` search body with
//! a boolean filter query (time range plus an optional query string) and its
//! bucket aggregations nested in declaration order, metrics at the deepest
//! level:
//!
//! ```
//! use aggbridge::{QueryCompiler, QueryTarget, TimeRange};
//!
//! let target = QueryTarget::from_json(
//!     "A",
//!     TimeRange::new(1_526_406_600_000, 1_526_406_900_000),
//!     r#"{
//!         "timeField": "@timestamp",
//!         "metrics": [{ "type": "avg", "field": "@value", "id": "1" }],
//!         "bucketAggs": [{ "type": "date_histogram", "field": "@timestamp", "id": "2" }]
//!     }"#,
//! ).unwrap();
//! let request = QueryCompiler::compile(&[target]).unwrap();
//! assert_eq!(request.requests.len(), 1);
//! ```
//!
//! # Parsing
//!
//! Responses pair with targets by position. A backend error in one slot is
//! isolated to that target's result; a compile or envelope failure aborts the
//! whole batch.
//!
//! Transport, credentials and retry are the caller's concern: this crate only
//! produces request documents and consumes response documents.

pub mod error;
pub mod query;
pub mod response;
pub mod settings;

pub use error::Error;
pub use query::{MultiSearchRequest, QueryCompiler, QueryTarget, SearchRequest, TimeRange};
pub use response::{BatchResult, MultiSearchResponse, ResponseParser, Series, TargetResult};
pub use settings::SettingsMap;

/// Result type for compile and parse operations.
pub type Result<T> = std::result::Result<T, Error>;
