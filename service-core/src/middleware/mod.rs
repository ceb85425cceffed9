pub mod api_key;
pub mod metrics;
pub mod rate_limit;
pub mod tracing;
