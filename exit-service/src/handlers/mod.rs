pub mod gate;
pub mod health;
pub mod oversight;
pub mod profile;
pub mod requests;

pub use health::{health_check, metrics_endpoint, readiness_check};
