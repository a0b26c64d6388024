// ============================================================================
// Processes Module - batch execution over packages
// ============================================================================
//
// - package:   snapshot of targets (Package + PackageLine)
// - process:   the Process entity and its lifecycle graph
// - algorithm: what a run does per line
// - engine:    the worker loop, suspension, resume and inspection
//
// ============================================================================

pub mod algorithm;
pub mod engine;
pub mod errors;
pub mod package;
pub mod process;

pub use algorithm::{PackageExecuteAlgorithm, ProcessAlgorithm};
pub use engine::{LineError, ProcessEngine, ProcessEngineBuilder, ProcessReport};
pub use errors::ProcessError;
pub use package::{lines_of, pending_lines_of, Package, PackageDraft, PackageLine};
pub use process::{process_graph_builder, Process, ProcessKey, ProcessOperation, ProcessState};
