pub mod logging;
pub mod metrics;

pub use logging::{LogFormat, init_tracing};
pub use metrics::{init_metrics, render_metrics};
