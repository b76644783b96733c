pub mod naming;
pub mod parser;
pub mod types;

pub use parser::{BatchResult, DataPoint, ResponseParser, Series, TargetResult};
pub use types::{AggNode, BucketNode, MultiSearchResponse, SearchResponse};
