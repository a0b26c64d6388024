use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::aggregate::Order;
use super::value_objects::OrderState;
use crate::domain::catalog::{Customer, Employee, Money, Product};
use crate::entity::{Lite, StatefulEntity};
use crate::store::{EntityStore, Predicate, StoreError};

// ============================================================================
// Order Read Models
// ============================================================================

/// One row per order detail, flattened with its order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderLineRow {
    pub order: Uuid,
    pub state: OrderState,
    pub customer: Option<Lite<Customer>>,
    pub product: Lite<Product>,
    pub quantity: u32,
    pub unit_price: Money,
    pub discount: f64,
    pub sub_total_price: Money,
}

/// Order summary
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderRow {
    pub id: Uuid,
    pub state: OrderState,
    pub customer: Option<Lite<Customer>>,
    pub employee: Option<Lite<Employee>>,
    pub order_date: Option<DateTime<Utc>>,
    pub lines: usize,
    pub total_price: Money,
}

pub async fn order_lines<S: EntityStore>(store: &S) -> Result<Vec<OrderLineRow>, StoreError> {
    let orders = store.query::<Order>(&|_| true).await?;

    let mut rows: Vec<OrderLineRow> = orders
        .iter()
        .filter_map(|order| order.id.map(|id| (id, order)))
        .flat_map(|(id, order)| {
            order.details.iter().map(move |detail| OrderLineRow {
                order: id,
                state: order.state(),
                customer: order.customer.clone(),
                product: detail.product.clone(),
                quantity: detail.quantity,
                unit_price: detail.unit_price,
                discount: detail.discount,
                sub_total_price: detail.sub_total_price(),
            })
        })
        .collect();

    rows.sort_by_key(|row| row.order);
    Ok(rows)
}

pub async fn orders<S: EntityStore>(store: &S, predicate: Predicate<'_, Order>) -> Result<Vec<OrderRow>, StoreError> {
    let mut rows: Vec<OrderRow> = store
        .query::<Order>(predicate)
        .await?
        .into_iter()
        .filter_map(|order| {
            Some(OrderRow {
                id: order.id?,
                state: order.state(),
                customer: order.customer.clone(),
                employee: order.employee.clone(),
                order_date: order.order_date,
                lines: order.details.len(),
                total_price: order.total_price(),
            })
        })
        .collect();

    rows.sort_by_key(|row| row.id);
    Ok(rows)
}

// ============================================================================
// Unit Tests
// ============================================================================
