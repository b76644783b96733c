pub mod compiler;
pub mod request;
pub mod types;

pub use compiler::QueryCompiler;
pub use request::{
    BoolQuery, ExtendedBounds, Filter, MultiSearchRequest, NamedAgg, SearchRequest,
};
pub use types::{BucketAggSpec, BucketAggType, MetricSpec, MetricType, QueryTarget, TimeRange};
