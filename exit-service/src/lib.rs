//! exit-service: campus exit pass lifecycle.
//!
//! Students request to leave campus, hall administrators review, security
//! checks passes at the gate and super admins oversee everything.

pub mod config;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod startup;
