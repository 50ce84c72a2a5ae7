pub mod http;

pub use http::{CompletionGuard, DEFAULT_DURATION_BUCKETS, HttpMetrics};
