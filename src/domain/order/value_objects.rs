use serde::{Deserialize, Serialize};

use crate::domain::catalog::{Money, Product};
use crate::entity::{LifecycleState, Lite};

// ============================================================================
// Order Value Objects
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderState {
    New,
    Ordered,
    Shipped,
    Canceled,
}

impl LifecycleState for OrderState {
    const ALL: &'static [Self] = &[
        OrderState::New,
        OrderState::Ordered,
        OrderState::Shipped,
        OrderState::Canceled,
    ];

    fn is_terminal(&self) -> bool {
        matches!(self, OrderState::Canceled)
    }
}

/// Shipping address, embedded in the order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Address {
    pub address: String,
    pub city: String,
    pub region: Option<String>,
    pub postal_code: Option<String>,
    pub country: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderDetail {
    pub product: Lite<Product>,
    pub quantity: u32,
    pub unit_price: Money,
    /// Fraction in `[0, 1]`
    pub discount: f64,
}

impl OrderDetail {
    pub fn new(product: Lite<Product>, quantity: u32, unit_price: Money) -> Self {
        Self {
            product,
            quantity,
            unit_price,
            discount: 0.0,
        }
    }

    pub fn with_discount(mut self, discount: f64) -> Self {
        self.discount = discount;
        self
    }

    pub fn sub_total_price(&self) -> Money {
        (self.unit_price * self.quantity).discounted(self.discount)
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
