// ============================================================================
// Operations Module
// ============================================================================
//
// Declarative operation graphs for stateful entities:
// - core:  descriptors, builders, invocation context, errors
// - graph: registration and execution engine
// - log:   persisted audit trail of executed operations
//
// ============================================================================

pub mod core;
pub mod graph;
pub mod log;

pub use self::core::{
    Construct, ConstructSource, Execute, IntoOperation, Operation, OperationArgs, OperationContext,
    OperationError, OperationKey, OperationKind,
};
pub use graph::{Graph, GraphBuilder};
pub use log::OperationLog;
