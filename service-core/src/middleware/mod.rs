pub mod metrics;
pub mod tracing;

pub use self::metrics::metrics_middleware;
pub use self::tracing::{current_request_id, request_id_middleware, REQUEST_ID_HEADER};
