// ============================================================================
// Order Domain
// ============================================================================
//
// - value_objects: OrderState, OrderDetail, Address
// - aggregate:     the Order entity
// - graph:         operations legal on an order and the process over them
// - logic:         stock-reserving creation
// - queries:       read models
// - tasks:         scheduled stale-order cancellation
//
// ============================================================================

pub mod aggregate;
pub mod errors;
pub mod graph;
pub mod logic;
pub mod queries;
pub mod tasks;
pub mod value_objects;

pub use aggregate::Order;
pub use errors::OrderError;
pub use graph::{OrderGraph, OrderOperation, OrderProcess};
pub use logic::OrderLogic;
pub use queries::{order_lines, orders, OrderLineRow, OrderRow};
pub use tasks::{cancel_old_orders, cancel_old_orders_with_process, OrderTasks};
pub use value_objects::{Address, OrderDetail, OrderState};
