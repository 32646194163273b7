//! # leadsync server
//!
//! Runtime wiring for the `leadsync` binary: building the pipeline from
//! configuration, the periodic scheduler and the status router.

pub mod app;
pub mod errors;
pub mod routes;
pub mod scheduler;

pub use app::AppState;
