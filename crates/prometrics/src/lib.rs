pub mod collectors;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod registry;
pub mod router;
pub mod types;

pub use collectors::http::{CompletionGuard, DEFAULT_DURATION_BUCKETS, HttpMetrics};
pub use error::{MetricsError, Result};
pub use registry::{Counter, HistogramVec, MetricsRegistry};
pub use router::{MetricsState, instrument_router};
pub use types::{CollectedMetric, MetricDescriptor, MetricSample, MetricType, MetricValue};
