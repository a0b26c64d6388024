// ============================================================================
// orderflow - order lifecycle and batch processing core
// ============================================================================
//
// - operations: operation graphs (constructs, transitions, logs)
// - store:      entity store port + in-memory adapter
// - domain:     catalog and order business logic
// - processes:  packages, processes and the line-by-line engine
// - scheduler:  named tasks fired on a timer
//
// ============================================================================

pub mod app;
pub mod config;
pub mod domain;
pub mod entity;
pub mod metrics;
pub mod operations;
pub mod processes;
pub mod scheduler;
pub mod store;
pub mod utils;

pub use app::OrderFlow;
pub use config::AppConfig;
