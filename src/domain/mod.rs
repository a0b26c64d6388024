// ============================================================================
// Domain Layer - Business Logic
// ============================================================================
//
// - catalog: products, customers, employees, shippers
// - order:   the order lifecycle, stock reservation and its batch tasks
//
// ============================================================================

pub mod catalog;
pub mod order;
