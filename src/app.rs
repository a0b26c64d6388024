use std::sync::Arc;

use crate::config::AppConfig;
use crate::domain::order::{Order, OrderGraph, OrderLogic, OrderTasks};
use crate::metrics::Metrics;
use crate::operations::{Graph, GraphBuilder};
use crate::processes::{process_graph_builder, Process, ProcessEngine, ProcessEngineBuilder};
use crate::scheduler::{SchedulerActor, TaskRegistry};
use crate::store::EntityStore;

// ============================================================================
// Application Wiring
// ============================================================================
//
// Startup order:
//   1. Order graph     (operations on orders)
//   2. Process graph   (process lifecycle + Order.CancelWithProcess)
//   3. Process engine  (algorithms: Order.CancelOrders)
//   4. Order logic     (stock-reserving create)
//   5. Task registry   (stale-order cancellation)
//
// Graphs and the registry are frozen once built.
//
// ============================================================================

pub struct OrderFlow<S: EntityStore> {
    pub config: AppConfig,
    pub store: Arc<S>,
    pub metrics: Arc<Metrics>,
    pub orders: Arc<Graph<Order>>,
    pub processes: Arc<Graph<Process>>,
    pub engine: ProcessEngine<S>,
    pub order_logic: OrderLogic<S>,
    pub tasks: Arc<TaskRegistry>,
}

impl<S: EntityStore> OrderFlow<S> {
    pub fn build(config: AppConfig, store: Arc<S>, metrics: Arc<Metrics>) -> anyhow::Result<Self> {
        let mut orders = GraphBuilder::new();
        OrderGraph::register(&mut orders, store.clone())?;
        let orders = Arc::new(orders.build());

        let mut processes = process_graph_builder()?;
        OrderGraph::register_processes(&mut processes)?;
        let processes = Arc::new(processes.build());

        let engine = ProcessEngineBuilder::new(store.clone(), processes.clone())
            .algorithm(OrderGraph::cancel_orders_algorithm(orders.clone()))?
            .retry(config.retry.clone())
            .metrics(metrics.clone())
            .build();

        let order_logic = OrderLogic::new(store.clone(), orders.clone()).with_metrics(metrics.clone());

        let mut tasks = TaskRegistry::new();
        OrderTasks::register(&mut tasks, store.clone(), engine.clone(), config.stale_order_age()?)?;

        let stuck = orders.states_without_exit();
        if !stuck.is_empty() {
            tracing::warn!(states = ?stuck, "⚠️ Order states without exit");
        }

        tracing::info!(
            order_operations = orders.operations().count(),
            process_operations = processes.operations().count(),
            tasks = tasks.keys().len(),
            "✅ Order flow wired"
        );

        Ok(Self {
            config,
            store,
            metrics,
            orders,
            processes,
            engine,
            order_logic,
            tasks: Arc::new(tasks),
        })
    }

    /// Scheduler firing the process-backed stale-order cancellation on the
    /// configured interval. Not started.
    pub fn scheduler(&self) -> SchedulerActor {
        SchedulerActor::new(self.tasks.clone())
            .schedule(OrderTasks::CANCEL_OLD_ORDERS_WITH_PROCESS, self.config.cancel_interval)
            .with_metrics(self.metrics.clone())
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::OrderOperation;
    use crate::processes::ProcessOperation;
    use crate::store::MemoryStore;

    #[test]
    fn test_wiring_registers_everything() {
        let store = Arc::new(MemoryStore::new());
        let metrics = Arc::new(Metrics::new().unwrap());
        let app = OrderFlow::build(AppConfig::default(), store, metrics).unwrap();

        assert!(app.orders.contains(OrderOperation::CANCEL));
        assert!(app.processes.contains(ProcessOperation::EXECUTE));
        assert!(app.processes.contains(OrderOperation::CANCEL_WITH_PROCESS));
        assert!(app.orders.states_without_exit().is_empty());
        assert_eq!(
            app.tasks.keys(),
            vec![OrderTasks::CANCEL_OLD_ORDERS, OrderTasks::CANCEL_OLD_ORDERS_WITH_PROCESS]
        );
    }
}
