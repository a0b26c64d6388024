use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

use super::aggregate::Order;
use super::graph::OrderProcess;
use super::value_objects::OrderState;
use crate::entity::{AnyLite, Entity, StatefulEntity};
use crate::operations::OperationContext;
use crate::processes::{Process, ProcessEngine, ProcessState};
use crate::scheduler::{TaskKey, TaskRegistry};
use crate::store::EntityStore;

// ============================================================================
// Order Scheduled Tasks
// ============================================================================
//
// Two ways to cancel stale orders:
//
// - CancelOldOrdersWithProcess: snapshot the stale orders into a package and
//   run `Order.Cancel` over it as a process. Every order is cancelled in its
//   own transaction, failures stay on their line and the run can be resumed.
//
//   A run that never got past its start (Created, or Error after a failed
//   start or run) is resumed on the next tick instead of packaging the
//   same orders again.
//
// - CancelOldOrders: one conditional bulk update. Fast, but all-or-nothing,
//   skips the graph and writes no operation logs.
//
// ============================================================================

pub struct OrderTasks;

impl OrderTasks {
    pub const CANCEL_OLD_ORDERS_WITH_PROCESS: TaskKey = TaskKey::new("Order.CancelOldOrdersWithProcess");
    pub const CANCEL_OLD_ORDERS: TaskKey = TaskKey::new("Order.CancelOldOrders");

    pub fn register<S: EntityStore>(
        registry: &mut TaskRegistry,
        store: Arc<S>,
        engine: ProcessEngine<S>,
        max_age: Duration,
    ) -> anyhow::Result<()> {
        registry.register(Self::CANCEL_OLD_ORDERS_WITH_PROCESS, move || {
            let engine = engine.clone();
            async move {
                let process = cancel_old_orders_with_process(&engine, max_age, &OperationContext::system()).await?;
                Ok::<_, anyhow::Error>(Some(process))
            }
        })?;

        registry.register(Self::CANCEL_OLD_ORDERS, move || {
            let store = store.clone();
            async move {
                cancel_old_orders(&*store, max_age).await?;
                Ok::<_, anyhow::Error>(None)
            }
        })?;

        Ok(())
    }
}

fn cutoff_for(now: DateTime<Utc>, max_age: Duration) -> anyhow::Result<DateTime<Utc>> {
    now.checked_sub_signed(max_age)
        .ok_or_else(|| anyhow::anyhow!("Stale order age of {max_age} is out of range"))
}

/// Packages every order placed more than `max_age` ago and starts a process
/// cancelling them. Returns the process without waiting for it.
pub async fn cancel_old_orders_with_process<S: EntityStore>(
    engine: &ProcessEngine<S>,
    max_age: Duration,
    ctx: &OperationContext,
) -> anyhow::Result<AnyLite> {
    let cutoff = cutoff_for(Utc::now(), max_age)?;

    if let Some(process) = unfinished_run(engine).await? {
        let id = process.id.ok_or_else(|| anyhow::anyhow!("stored process without an id"))?;
        engine.spawn(id, ctx.clone());

        tracing::info!(
            process = %process.display(),
            state = %process.state(),
            processed = process.processed,
            total = process.total,
            "🔁 Resuming stale order cancellation"
        );
        return erase(&process);
    }

    let process = engine
        .create_process_from_query::<Order>(
            OrderTasks::CANCEL_OLD_ORDERS_WITH_PROCESS.as_str(),
            &|o: &Order| o.order_date.is_some_and(|date| date < cutoff),
            OrderProcess::CANCEL_ORDERS,
            ctx,
        )
        .await?;
    let lite = erase(&process)?;
    engine.spawn(lite.id, ctx.clone());

    tracing::info!(
        process = %lite,
        orders = process.total,
        cutoff = %cutoff,
        "🧹 Stale order cancellation started"
    );
    Ok(lite)
}

/// Oldest cancellation run that is neither finished, suspended nor running.
async fn unfinished_run<S: EntityStore>(engine: &ProcessEngine<S>) -> anyhow::Result<Option<Process>> {
    let mut runs = engine
        .store()
        .query::<Process>(&|p: &Process| {
            p.algorithm == OrderProcess::CANCEL_ORDERS.as_str()
                && matches!(p.state(), ProcessState::Created | ProcessState::Error)
        })
        .await?;
    runs.retain(|p| p.id.is_some_and(|id| !engine.is_running(id)));
    runs.sort_by_key(|p| p.creation_date);
    Ok(runs.into_iter().next())
}

fn erase(process: &Process) -> anyhow::Result<AnyLite> {
    Ok(process
        .to_lite()
        .ok_or_else(|| anyhow::anyhow!("process was not saved"))?
        .erase())
}

/// Cancels every cancelable order placed more than `max_age` ago in a single
/// conditional update. Returns the number of orders cancelled.
pub async fn cancel_old_orders<S: EntityStore>(store: &S, max_age: Duration) -> anyhow::Result<u64> {
    let now = Utc::now();
    let cutoff = cutoff_for(now, max_age)?;

    let canceled = store
        .update_where::<Order>(
            &|o: &Order| {
                matches!(o.state(), OrderState::Ordered | OrderState::Shipped)
                    && o.order_date.is_some_and(|date| date < cutoff)
            },
            &|o: &mut Order| {
                o.cancelation_date = Some(now);
                o.transition_to(OrderState::Canceled);
            },
        )
        .await?;

    tracing::info!(canceled, cutoff = %cutoff, "🧹 Stale orders cancelled in bulk");
    Ok(canceled)
}

// ============================================================================
// Unit Tests
// ============================================================================
