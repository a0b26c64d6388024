// ============================================================================
// Catalog Domain - products, customers, employees, shippers
// ============================================================================

pub mod entities;
pub mod money;

pub use entities::*;
pub use money::Money;
