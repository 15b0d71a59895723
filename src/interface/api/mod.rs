//! API interface implementations

pub mod dto;
pub mod metrics_handler;
pub mod router;
pub mod sessions_handler;

pub use metrics_handler::init_metrics;
pub use router::{build_router, ApiState};
