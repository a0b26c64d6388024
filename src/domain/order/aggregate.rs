use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::value_objects::{Address, OrderDetail, OrderState};
use crate::domain::catalog::{Customer, Employee, Money, Shipper};
use crate::entity::{Entity, Lite, StatefulEntity};

// ============================================================================
// Order Aggregate
// ============================================================================
//
// `state` is private: it only moves through the effects registered on the
// order graph (see `graph.rs`) and the bulk cancel task.
//
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    // Identity
    pub id: Option<Uuid>,
    state: OrderState,

    // References
    pub customer: Option<Lite<Customer>>,
    pub employee: Option<Lite<Employee>>,
    pub ship_via: Option<Lite<Shipper>>,

    // Lifecycle dates
    pub order_date: Option<DateTime<Utc>>,
    pub required_date: Option<DateTime<Utc>>,
    pub shipped_date: Option<DateTime<Utc>>,
    pub cancelation_date: Option<DateTime<Utc>>,

    // Shipping
    pub ship_name: Option<String>,
    pub ship_address: Option<Address>,
    pub freight: Money,

    pub details: Vec<OrderDetail>,

    /// Imported from a previous system
    pub is_legacy: bool,
}

impl Order {
    /// A fresh order in `New`, stamped with the acting employee.
    pub fn new(employee: Option<Lite<Employee>>) -> Self {
        Self {
            id: None,
            state: OrderState::New,
            customer: None,
            employee,
            ship_via: None,
            order_date: None,
            required_date: None,
            shipped_date: None,
            cancelation_date: None,
            ship_name: None,
            ship_address: None,
            freight: Money::ZERO,
            details: Vec::new(),
            is_legacy: false,
        }
    }

    pub(crate) fn transition_to(&mut self, state: OrderState) {
        self.state = state;
    }

    pub fn total_price(&self) -> Money {
        self.details.iter().map(OrderDetail::sub_total_price).sum()
    }
}

impl Entity for Order {
    const TYPE_NAME: &'static str = "Order";

    fn id(&self) -> Option<Uuid> {
        self.id
    }

    fn assign_id(&mut self, id: Uuid) {
        self.id = Some(id);
    }

    fn display(&self) -> String {
        match (self.id, &self.customer) {
            (Some(id), Some(customer)) => format!("{id} ({customer})"),
            (Some(id), None) => id.to_string(),
            (None, _) => "New order".to_string(),
        }
    }
}

impl StatefulEntity for Order {
    type State = OrderState;

    fn state(&self) -> OrderState {
        self.state
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
