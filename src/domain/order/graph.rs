use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

use super::aggregate::Order;
use super::errors::OrderError;
use super::value_objects::{OrderDetail, OrderState};
use crate::domain::catalog::{Customer, Employee, Money, Product};
use crate::entity::Lite;
use crate::operations::{
    Construct, Execute, Graph, GraphBuilder, OperationArgs, OperationContext, OperationError, OperationKey,
};
use crate::processes::{Package, PackageExecuteAlgorithm, Process, ProcessKey, ProcessState};
use crate::store::EntityStore;

// ============================================================================
// Order Graph
// ============================================================================
//
//   Create / CreateFromCustomer / CreateFromProducts ─→ New
//   New ──── SaveNew ───→ Ordered ─── Save ───→ Ordered
//   Ordered ── Ship ──→ Shipped
//   Ordered | Shipped ── Cancel ──→ Canceled
//
// CancelWithProcess lives on the process graph: it builds a Process that
// runs Cancel over many orders.
//
// ============================================================================

pub struct OrderOperation;

impl OrderOperation {
    pub const CREATE: OperationKey = OperationKey::new("Order.Create");
    pub const CREATE_FROM_CUSTOMER: OperationKey = OperationKey::new("Order.CreateFromCustomer");
    pub const CREATE_FROM_PRODUCTS: OperationKey = OperationKey::new("Order.CreateFromProducts");
    pub const SAVE_NEW: OperationKey = OperationKey::new("Order.SaveNew");
    pub const SAVE: OperationKey = OperationKey::new("Order.Save");
    pub const SHIP: OperationKey = OperationKey::new("Order.Ship");
    pub const CANCEL: OperationKey = OperationKey::new("Order.Cancel");
    pub const CANCEL_WITH_PROCESS: OperationKey = OperationKey::new("Order.CancelWithProcess");
}

pub struct OrderProcess;

impl OrderProcess {
    pub const CANCEL_ORDERS: ProcessKey = ProcessKey::new("Order.CancelOrders");
}

pub struct OrderGraph;

impl OrderGraph {
    pub fn register<S: EntityStore>(builder: &mut GraphBuilder<Order>, store: Arc<S>) -> Result<(), OperationError> {
        builder
            .register(
                Construct::new(OrderOperation::CREATE)
                    .to_state(OrderState::New)
                    .construct(|ctx: OperationContext, _args: OperationArgs| async move {
                        Ok::<_, OperationError>(Order::new(ctx.user_as::<Employee>()))
                    }),
            )?
            .register(
                Construct::new(OrderOperation::CREATE_FROM_CUSTOMER)
                    .to_state(OrderState::New)
                    .construct_from::<Customer, _, _>(
                        |customer: Lite<Customer>, ctx: OperationContext, _args: OperationArgs| async move {
                            let mut order = Order::new(ctx.user_as::<Employee>());
                            order.customer = Some(customer);
                            Ok::<_, OperationError>(order)
                        },
                    ),
            )?
            .register(
                Construct::new(OrderOperation::CREATE_FROM_PRODUCTS)
                    .to_state(OrderState::New)
                    .construct_from_many::<Product, _, _>(
                        move |products: Vec<Lite<Product>>, ctx: OperationContext, _args: OperationArgs| {
                            let store = store.clone();
                            async move {
                                let prices = current_prices(&*store, &products).await?;

                                let mut order = Order::new(ctx.user_as::<Employee>());
                                for product in products {
                                    let unit_price = prices
                                        .get(&product.id())
                                        .copied()
                                        .ok_or_else(|| OrderError::UnknownProduct(product.clone()))?;
                                    order.details.push(OrderDetail::new(product, 1, unit_price));
                                }
                                Ok::<_, OperationError>(order)
                            }
                        },
                    ),
            )?
            .register(
                Execute::new(OrderOperation::SAVE_NEW)
                    .from_states([OrderState::New])
                    .to_state(OrderState::Ordered)
                    .allows_new()
                    .effect(|order: &mut Order, _ctx, _args| {
                        order.order_date = Some(Utc::now());
                        order.transition_to(OrderState::Ordered);
                        Ok(())
                    }),
            )?
            .register(
                Execute::new(OrderOperation::SAVE)
                    .from_states([OrderState::Ordered])
                    .to_state(OrderState::Ordered)
                    .effect(|_order: &mut Order, _ctx, _args| Ok(())),
            )?
            .register(
                Execute::new(OrderOperation::SHIP)
                    .from_states([OrderState::Ordered])
                    .to_state(OrderState::Shipped)
                    .can_execute(|order: &Order| order.details.is_empty().then(|| "No order lines".to_string()))
                    .effect(|order: &mut Order, _ctx, _args| {
                        order.shipped_date = Some(Utc::now());
                        order.transition_to(OrderState::Shipped);
                        Ok(())
                    }),
            )?
            .register(
                Execute::new(OrderOperation::CANCEL)
                    .from_states([OrderState::Ordered, OrderState::Shipped])
                    .to_state(OrderState::Canceled)
                    .effect(|order: &mut Order, _ctx, _args| {
                        order.cancelation_date = Some(Utc::now());
                        order.transition_to(OrderState::Canceled);
                        Ok(())
                    }),
            )?;

        Ok(())
    }

    /// Order constructs that produce a `Process`. The package is only drafted
    /// here; it is written together with the process.
    pub fn register_processes(builder: &mut GraphBuilder<Process>) -> Result<(), OperationError> {
        builder.register(
            Construct::new(OrderOperation::CANCEL_WITH_PROCESS)
                .to_state(ProcessState::Created)
                .construct_from_many::<Order, _, _>(
                    |orders: Vec<Lite<Order>>, ctx: OperationContext, _args: OperationArgs| async move {
                        let targets = orders.iter().map(Lite::erase).collect();
                        let draft = Package::draft("Cancel orders", targets)?;

                        Ok::<_, OperationError>(Process::with_draft(OrderProcess::CANCEL_ORDERS, draft, ctx.user))
                    },
                ),
        )?;

        Ok(())
    }

    pub fn cancel_orders_algorithm(graph: Arc<Graph<Order>>) -> PackageExecuteAlgorithm<Order> {
        PackageExecuteAlgorithm::new(OrderProcess::CANCEL_ORDERS, graph, OrderOperation::CANCEL)
    }
}

async fn current_prices<S: EntityStore>(
    store: &S,
    products: &[Lite<Product>],
) -> Result<HashMap<Uuid, Money>, OperationError> {
    let wanted: HashSet<Uuid> = products.iter().map(Lite::id).collect();

    let prices = store
        .query::<Product>(&|p| p.id.is_some_and(|id| wanted.contains(&id)))
        .await?
        .into_iter()
        .filter_map(|p| p.id.map(|id| (id, p.unit_price)))
        .collect();

    Ok(prices)
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Entity, LifecycleState, StatefulEntity};
    use crate::operations::ConstructSource;
    use crate::store::MemoryStore;

    fn order_graph(store: &Arc<MemoryStore>) -> Graph<Order> {
        let mut builder = GraphBuilder::new();
        OrderGraph::register(&mut builder, store.clone()).unwrap();
        builder.build()
    }

    fn detail() -> OrderDetail {
        OrderDetail::new(Lite::new(Uuid::now_v7(), "Chai"), 2, Money::from_cents(1_800))
    }

    /// A saved order in `state`, with or without lines.
    async fn order_in(graph: &Graph<Order>, store: &MemoryStore, state: OrderState, lines: bool) -> Order {
        let ctx = OperationContext::system();
        let none = OperationArgs::none();
        let mut order = Order::new(None);
        if lines {
            order.details.push(detail());
        }

        if state == OrderState::New {
            // New orders only exist unsaved
            return order;
        }

        graph.execute(store, &mut order, OrderOperation::SAVE_NEW, &ctx, &none).await.unwrap();
        match state {
            OrderState::Shipped => {
                graph.execute(store, &mut order, OrderOperation::SHIP, &ctx, &none).await.unwrap();
            }
            OrderState::Canceled => {
                graph.execute(store, &mut order, OrderOperation::CANCEL, &ctx, &none).await.unwrap();
            }
            _ => {}
        }
        assert_eq!(order.state(), state);
        order
    }

    #[test]
    fn test_every_open_state_has_an_exit() {
        let store = Arc::new(MemoryStore::new());
        assert!(order_graph(&store).states_without_exit().is_empty());
    }

    #[tokio::test]
    async fn test_execute_matches_declared_table() {
        let store = Arc::new(MemoryStore::new());
        let graph = order_graph(&store);
        let ctx = OperationContext::system();
        let none = OperationArgs::none();

        let table = [
            (OrderOperation::SAVE_NEW, vec![OrderState::New]),
            (OrderOperation::SAVE, vec![OrderState::Ordered]),
            (OrderOperation::SHIP, vec![OrderState::Ordered]),
            (OrderOperation::CANCEL, vec![OrderState::Ordered, OrderState::Shipped]),
        ];

        for (key, allowed) in table {
            for &state in OrderState::ALL {
                let mut order = order_in(&graph, &store, state, true).await;
                let before = order.state();
                let result = graph.execute(&*store, &mut order, key, &ctx, &none).await;

                if allowed.contains(&state) {
                    assert!(result.is_ok(), "{key} from {state:?} should succeed: {result:?}");
                    assert_eq!(order.state(), graph.operation(key).unwrap().to_state());
                } else {
                    assert!(
                        matches!(result, Err(OperationError::IllegalTransition(_))),
                        "{key} from {state:?} should be illegal: {result:?}"
                    );
                    assert_eq!(order.state(), before);
                }
            }
        }
    }

    #[tokio::test]
    async fn test_constructs_cannot_be_executed() {
        let store = Arc::new(MemoryStore::new());
        let graph = order_graph(&store);

        for key in [
            OrderOperation::CREATE,
            OrderOperation::CREATE_FROM_CUSTOMER,
            OrderOperation::CREATE_FROM_PRODUCTS,
        ] {
            for &state in OrderState::ALL {
                let mut order = order_in(&graph, &store, state, true).await;
                let result = graph
                    .execute(&*store, &mut order, key, &OperationContext::system(), &OperationArgs::none())
                    .await;
                assert!(matches!(result, Err(OperationError::IllegalTransition(_))));
            }
        }
    }

    #[tokio::test]
    async fn test_ship_requires_lines() {
        let store = Arc::new(MemoryStore::new());
        let graph = order_graph(&store);
        let ctx = OperationContext::system();

        let mut empty = order_in(&graph, &store, OrderState::Ordered, false).await;
        let err = graph
            .execute(&*store, &mut empty, OrderOperation::SHIP, &ctx, &OperationArgs::none())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, OperationError::PreconditionFailed(ref r) if r == "No order lines"));
        assert_eq!(empty.state(), OrderState::Ordered);
        assert!(empty.shipped_date.is_none());

        let stored: Order = store.retrieve(empty.id.unwrap()).await.unwrap().unwrap();
        assert_eq!(stored.state(), OrderState::Ordered);

        let mut full = order_in(&graph, &store, OrderState::Ordered, true).await;
        graph
            .execute(&*store, &mut full, OrderOperation::SHIP, &ctx, &OperationArgs::none())
            .await
            .unwrap();
        assert_eq!(full.state(), OrderState::Shipped);
        assert!(full.shipped_date.is_some());
    }

    #[tokio::test]
    async fn test_create_stamps_acting_employee() {
        let store = Arc::new(MemoryStore::new());
        let graph = order_graph(&store);

        let employee: Lite<Employee> = Lite::new(Uuid::now_v7(), "Nancy Davolio");
        let customer: Lite<Customer> = Lite::new(Uuid::now_v7(), "Alfreds Futterkiste");
        let ctx = OperationContext::as_user(&employee);

        let order = graph
            .construct(OrderOperation::CREATE, ConstructSource::None, &ctx, &OperationArgs::none())
            .await
            .unwrap();
        assert_eq!(order.state(), OrderState::New);
        assert_eq!(order.employee, Some(employee.clone()));
        assert!(order.is_new());

        let order = graph
            .construct(
                OrderOperation::CREATE_FROM_CUSTOMER,
                ConstructSource::one(&customer),
                &ctx,
                &OperationArgs::none(),
            )
            .await
            .unwrap();
        assert_eq!(order.customer, Some(customer));
        assert_eq!(order.employee, Some(employee));
    }

    #[tokio::test]
    async fn test_create_from_products_uses_current_prices() {
        let store = Arc::new(MemoryStore::new());
        let graph = order_graph(&store);

        let mut chai = Product::new("Chai", Money::from_cents(1_800), 39);
        let mut chang = Product::new("Chang", Money::from_cents(1_900), 17);
        store.save(&mut chai).await.unwrap();
        store.save(&mut chang).await.unwrap();

        let products = vec![chai.to_lite().unwrap(), chang.to_lite().unwrap()];
        let order = graph
            .construct(
                OrderOperation::CREATE_FROM_PRODUCTS,
                ConstructSource::many(&products),
                &OperationContext::system(),
                &OperationArgs::none(),
            )
            .await
            .unwrap();

        assert_eq!(order.details.len(), 2);
        assert!(order.details.iter().all(|d| d.quantity == 1));
        assert_eq!(order.details[1].unit_price, Money::from_cents(1_900));
    }

    #[tokio::test]
    async fn test_construct_rejects_wrong_source() {
        let store = Arc::new(MemoryStore::new());
        let graph = order_graph(&store);
        let customer: Lite<Customer> = Lite::new(Uuid::now_v7(), "Alfreds Futterkiste");

        let err = graph
            .construct(
                OrderOperation::CREATE_FROM_PRODUCTS,
                ConstructSource::many(&[customer.clone()]),
                &OperationContext::system(),
                &OperationArgs::none(),
            )
            .await
            .err()
            .unwrap();
        assert!(matches!(err, OperationError::InvalidArguments(_)));

        let err = graph
            .construct(
                OrderOperation::CREATE_FROM_CUSTOMER,
                ConstructSource::None,
                &OperationContext::system(),
                &OperationArgs::none(),
            )
            .await
            .err()
            .unwrap();
        assert!(matches!(err, OperationError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn test_unknown_product_is_a_domain_error() {
        let store = Arc::new(MemoryStore::new());
        let graph = order_graph(&store);
        let ghost: Lite<Product> = Lite::new(Uuid::now_v7(), "Ghost");

        let err = graph
            .construct(
                OrderOperation::CREATE_FROM_PRODUCTS,
                ConstructSource::many(&[ghost]),
                &OperationContext::system(),
                &OperationArgs::none(),
            )
            .await
            .err()
            .unwrap();
        assert!(err.is_line_local());
        assert!(err.to_string().contains("Ghost"));
    }

    #[tokio::test]
    async fn test_operations_are_logged() {
        let store = Arc::new(MemoryStore::new());
        let graph = order_graph(&store);
        let employee: Lite<Employee> = Lite::new(Uuid::now_v7(), "Nancy Davolio");
        let ctx = OperationContext::as_user(&employee);

        let mut order = Order::new(employee.clone().into());
        order.details.push(detail());
        graph
            .execute(&*store, &mut order, OrderOperation::SAVE_NEW, &ctx, &OperationArgs::none())
            .await
            .unwrap();
        graph
            .execute(&*store, &mut order, OrderOperation::SHIP, &ctx, &OperationArgs::none())
            .await
            .unwrap();

        let logs = store
            .query::<crate::operations::OperationLog>(&|l| l.target.id == order.id.unwrap())
            .await
            .unwrap();
        assert_eq!(logs.len(), 2);
        assert!(logs.iter().all(|l| l.user.as_ref() == Some(&employee.erase())));
        assert!(logs
            .iter()
            .any(|l| l.operation == "Order.Ship" && l.origin_state == "Ordered" && l.end_state == "Shipped"));
    }
}
