// ============================================================================
// Store Module
// ============================================================================
//
// Persistence port consumed by the operation graph and the process engine,
// plus the in-memory implementation used by the binary and the tests.
//
// ============================================================================

mod entity_store;
mod memory;

pub use entity_store::{EntityStore, Predicate, Setter, StoreError, Transaction};
pub use memory::{MemoryStore, MemoryTransaction};
