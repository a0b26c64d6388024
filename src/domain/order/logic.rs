use std::sync::Arc;

use super::aggregate::Order;
use super::errors::OrderError;
use super::graph::OrderOperation;
use crate::domain::catalog::Product;
use crate::entity::Entity;
use crate::metrics::Metrics;
use crate::operations::{Graph, OperationArgs, OperationContext};
use crate::store::{EntityStore, Transaction};

// ============================================================================
// Order Logic - stock-reserving creation
// ============================================================================
//
// Orchestrates: reserve stock per line → SaveNew → commit
//
// Every line is reserved with a conditional decrement
//
//   units_in_stock -= quantity  WHERE id = product AND units_in_stock >= quantity
//
// and must affect exactly one row. The first line that does not rolls the
// whole transaction back, so no partial reservation survives.
//
// ============================================================================

pub struct OrderLogic<S: EntityStore> {
    store: Arc<S>,
    graph: Arc<Graph<Order>>,
    metrics: Option<Arc<Metrics>>,
}

impl<S: EntityStore> OrderLogic<S> {
    pub fn new(store: Arc<S>, graph: Arc<Graph<Order>>) -> Self {
        Self {
            store,
            graph,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn graph(&self) -> &Arc<Graph<Order>> {
        &self.graph
    }

    /// Reserves stock for every line and saves the order as `Ordered`,
    /// all in one transaction.
    pub async fn create(&self, order: Order, ctx: &OperationContext) -> Result<Order, OrderError> {
        if !order.is_new() {
            return Err(OrderError::NotNew);
        }

        let result = self.reserve_and_save(order, ctx).await;

        if let Some(metrics) = &self.metrics {
            match &result {
                Ok(_) => metrics.record_stock_reservation(true),
                Err(OrderError::InsufficientStock { .. }) => metrics.record_stock_reservation(false),
                Err(_) => {}
            }
        }

        result
    }

    async fn reserve_and_save(&self, order: Order, ctx: &OperationContext) -> Result<Order, OrderError> {
        if let Some(detail) = order.details.iter().find(|d| d.quantity == 0) {
            return Err(OrderError::InvalidQuantity {
                product: detail.product.clone(),
                quantity: detail.quantity,
            });
        }

        let mut tx = self.store.begin().await?;

        for detail in &order.details {
            let product_id = detail.product.id();
            let quantity = detail.quantity;

            let reserved = tx
                .update_where::<Product>(
                    &|p: &Product| p.id == Some(product_id) && p.units_in_stock >= quantity,
                    &|p: &mut Product| p.units_in_stock -= quantity,
                )
                .await?;

            if reserved != 1 {
                if tx.retrieve::<Product>(product_id).await?.is_none() {
                    return Err(OrderError::UnknownProduct(detail.product.clone()));
                }

                tracing::warn!(
                    product = %detail.product,
                    requested = quantity,
                    "❌ Not enough stock, order rolled back"
                );
                return Err(OrderError::InsufficientStock {
                    product: detail.product.clone(),
                });
            }
        }

        let order = self
            .graph
            .execute_in(&mut tx, order, OrderOperation::SAVE_NEW, ctx, &OperationArgs::none())
            .await?;
        tx.commit().await?;

        tracing::info!(
            order = %order.display(),
            lines = order.details.len(),
            total = %order.total_price(),
            "✅ Order created"
        );
        Ok(order)
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::catalog::Money;
    use crate::domain::order::{OrderDetail, OrderGraph, OrderState};
    use crate::entity::{Lite, StatefulEntity};
    use crate::operations::GraphBuilder;
    use crate::store::MemoryStore;
    use uuid::Uuid;

    fn logic(store: &Arc<MemoryStore>) -> OrderLogic<MemoryStore> {
        let mut builder = GraphBuilder::new();
        OrderGraph::register(&mut builder, store.clone()).unwrap();
        OrderLogic::new(store.clone(), Arc::new(builder.build()))
    }

    async fn product(store: &MemoryStore, name: &str, stock: u32) -> Product {
        let mut product = Product::new(name, Money::from_cents(1_000), stock);
        store.save(&mut product).await.unwrap();
        product
    }

    async fn stock_of(store: &MemoryStore, product: &Product) -> u32 {
        let stored: Product = store.retrieve(product.id.unwrap()).await.unwrap().unwrap();
        stored.units_in_stock
    }

    fn line(product: &Product, quantity: u32) -> OrderDetail {
        OrderDetail::new(product.to_lite().unwrap(), quantity, product.unit_price)
    }

    #[tokio::test]
    async fn test_create_reserves_stock_and_saves_order() {
        let store = Arc::new(MemoryStore::new());
        let logic = logic(&store);
        let chai = product(&store, "Chai", 10).await;
        let chang = product(&store, "Chang", 5).await;

        let mut order = Order::new(None);
        order.details.push(line(&chai, 3));
        order.details.push(line(&chang, 5));

        let order = logic.create(order, &OperationContext::system()).await.unwrap();

        assert_eq!(order.state(), OrderState::Ordered);
        assert!(order.order_date.is_some());
        assert_eq!(stock_of(&store, &chai).await, 7);
        assert_eq!(stock_of(&store, &chang).await, 0);
        assert_eq!(store.count::<Order>().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_insufficient_stock_rolls_back_every_line() {
        let store = Arc::new(MemoryStore::new());
        let logic = logic(&store);
        let chai = product(&store, "Chai", 10).await;
        let chang = product(&store, "Chang", 2).await;
        let tofu = product(&store, "Tofu", 10).await;

        let mut order = Order::new(None);
        order.details.push(line(&chai, 4));
        order.details.push(line(&tofu, 1));
        order.details.push(line(&chang, 3));

        let err = logic.create(order, &OperationContext::system()).await.err().unwrap();

        match err {
            OrderError::InsufficientStock { product } => assert_eq!(product.id(), chang.id.unwrap()),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(stock_of(&store, &chai).await, 10);
        assert_eq!(stock_of(&store, &tofu).await, 10);
        assert_eq!(stock_of(&store, &chang).await, 2);
        assert_eq!(store.count::<Order>().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_saved_order_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let logic = logic(&store);
        let mut order = Order::new(None);
        order.id = Some(Uuid::now_v7());

        let err = logic.create(order, &OperationContext::system()).await.err().unwrap();
        assert!(matches!(err, OrderError::NotNew));
    }

    #[tokio::test]
    async fn test_unknown_product_and_zero_quantity() {
        let store = Arc::new(MemoryStore::new());
        let logic = logic(&store);
        let chai = product(&store, "Chai", 10).await;

        let mut order = Order::new(None);
        order.details.push(OrderDetail::new(
            Lite::new(Uuid::now_v7(), "Ghost"),
            1,
            Money::from_cents(100),
        ));
        let err = logic.create(order, &OperationContext::system()).await.err().unwrap();
        assert!(matches!(err, OrderError::UnknownProduct(_)));

        let mut order = Order::new(None);
        order.details.push(line(&chai, 0));
        let err = logic.create(order, &OperationContext::system()).await.err().unwrap();
        assert!(matches!(err, OrderError::InvalidQuantity { quantity: 0, .. }));
        assert_eq!(stock_of(&store, &chai).await, 10);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_creates_never_oversell() {
        const K: u32 = 16;

        let store = Arc::new(MemoryStore::new());
        let metrics = Arc::new(Metrics::new().unwrap());
        let logic = Arc::new(logic(&store).with_metrics(metrics.clone()));
        let chai = product(&store, "Chai", K - 1).await;

        let mut handles = Vec::new();
        for _ in 0..K {
            let logic = logic.clone();
            let detail = line(&chai, 1);
            handles.push(tokio::spawn(async move {
                let mut order = Order::new(None);
                order.details.push(detail);
                logic.create(order, &OperationContext::system()).await
            }));
        }

        let mut created = 0;
        let mut rejected = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => created += 1,
                Err(OrderError::InsufficientStock { .. }) => rejected += 1,
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }

        assert_eq!(created, K - 1);
        assert_eq!(rejected, 1);
        assert_eq!(stock_of(&store, &chai).await, 0);
        assert_eq!(metrics.orders_created.get(), u64::from(K - 1));
        assert_eq!(metrics.stock_reservations_failed.get(), 1);
    }
}
