//! service-core: shared infrastructure for the federation services.
pub mod config;
pub mod error;
pub mod middleware;
pub mod observability;

pub use axum;
