use actix::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use orderflow::domain::catalog::{Customer, Employee, Money, Product};
use orderflow::domain::order::{Order, OrderDetail, OrderError, OrderOperation, OrderState, OrderTasks};
use orderflow::entity::{Entity, Lite, StatefulEntity};
use orderflow::metrics::{self, Metrics};
use orderflow::operations::{ConstructSource, OperationArgs, OperationContext};
use orderflow::processes::ProcessState;
use orderflow::scheduler::RunTask;
use orderflow::store::{EntityStore, MemoryStore};
use orderflow::{AppConfig, OrderFlow};

#[actix::main]
async fn main() -> anyhow::Result<()> {
    // Default to INFO level, can be overridden with RUST_LOG env var
    // Example: RUST_LOG=debug cargo run
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,orderflow=debug")))
        .init();

    tracing::info!("🚀 Starting orderflow demo");

    let config = AppConfig::from_env()?;
    tracing::info!(?config, "Configuration loaded");

    // === 1. Metrics ===
    let metrics = Arc::new(Metrics::new()?);
    tracing::info!("📊 Metrics registry created with {} metrics", metrics.registry().gather().len());

    // Metrics HTTP server runs on its own runtime
    let metrics_registry = Arc::new(metrics.registry().clone());
    let metrics_port = config.metrics_port;
    std::thread::spawn(move || {
        let rt = match tokio::runtime::Runtime::new() {
            Ok(rt) => rt,
            Err(e) => {
                tracing::error!(error = %e, "Failed to start metrics runtime");
                return;
            }
        };
        rt.block_on(async {
            if let Err(e) = metrics::start_metrics_server(metrics_registry, metrics_port).await {
                tracing::error!("Metrics server error: {}", e);
            }
        });
    });

    // === 2. Wire the application ===
    let store = Arc::new(MemoryStore::new());
    let app = OrderFlow::build(config, store.clone(), metrics)?;

    // === 3. Seed catalog ===
    let mut employee = Employee::new("Nancy", "Davolio");
    store.save(&mut employee).await?;
    let mut customer = Customer::new("Alfreds Futterkiste");
    store.save(&mut customer).await?;

    let mut chai = Product::new("Chai", Money::from_cents(1_800), 39);
    let mut chang = Product::new("Chang", Money::from_cents(1_900), 17);
    let mut tofu = Product::new("Tofu", Money::from_cents(2_325), 3);
    for product in [&mut chai, &mut chang, &mut tofu] {
        store.save(product).await?;
    }

    let employee = lite(&employee)?;
    let ctx = OperationContext::as_user(&employee);

    // === 4. Create an order through the graph + stock reservation ===
    tracing::info!("📝 Demonstrating order lifecycle");
    let mut order: Order = app
        .orders
        .construct(
            OrderOperation::CREATE_FROM_CUSTOMER,
            ConstructSource::one(&lite(&customer)?),
            &ctx,
            &OperationArgs::none(),
        )
        .await?;
    order.details.push(OrderDetail::new(lite(&chai)?, 10, chai.unit_price));
    order.details.push(OrderDetail::new(lite(&chang)?, 2, chang.unit_price).with_discount(0.1));

    let mut order = app.order_logic.create(order, &ctx).await?;

    // Over-reserving is rejected and leaves stock untouched
    let mut greedy = Order::new(Some(employee.clone()));
    greedy.details.push(OrderDetail::new(lite(&chai)?, 1, chai.unit_price));
    greedy.details.push(OrderDetail::new(lite(&tofu)?, 5, tofu.unit_price));
    match app.order_logic.create(greedy, &ctx).await {
        Err(OrderError::InsufficientStock { product }) => {
            tracing::info!(product = %product, "🛑 Reservation refused as expected")
        }
        other => tracing::warn!(result = ?other.map(|o| o.display()), "Unexpected reservation result"),
    }

    app.orders
        .execute(&*store, &mut order, OrderOperation::SHIP, &ctx, &OperationArgs::none())
        .await?;
    tracing::info!(order = %order.display(), state = ?order.state(), "🚚 Order shipped");

    // === 5. Legacy orders, stale enough to be cancelled ===
    for days_ago in [20, 40, 60] {
        let mut legacy: Order = app
            .orders
            .construct(OrderOperation::CREATE, ConstructSource::None, &ctx, &OperationArgs::none())
            .await?;
        legacy.is_legacy = true;
        legacy.details.push(OrderDetail::new(lite(&chang)?, 1, chang.unit_price));
        let mut legacy = app.order_logic.create(legacy, &ctx).await?;
        legacy.order_date = legacy.order_date.map(|date| date - chrono::Duration::days(days_ago));
        store.save(&mut legacy).await?;
    }

    // === 6. Run the process-backed cancellation through the scheduler ===
    let scheduler = app.scheduler().start();
    let produced = scheduler
        .send(RunTask(OrderTasks::CANCEL_OLD_ORDERS_WITH_PROCESS))
        .await??
        .ok_or_else(|| anyhow::anyhow!("cancel task produced no process"))?;

    let mut report = app.engine.inspect(produced.id).await?;
    while !matches!(report.state, ProcessState::Finished | ProcessState::Error) {
        tokio::time::sleep(Duration::from_millis(50)).await;
        report = app.engine.inspect(produced.id).await?;
    }

    tracing::info!(
        process = %report.process,
        state = %report.state,
        processed = report.processed,
        errored = report.errored,
        progress = report.progress,
        "📋 Cancellation report"
    );
    for error in &report.errors {
        tracing::warn!(line = error.sequence, entity = %error.target, error = %error.error, "Line failed");
    }

    let canceled = store
        .query::<Order>(&|o: &Order| o.state() == OrderState::Canceled)
        .await?
        .len();
    tracing::info!(canceled, "🎉 Demo complete!");

    Ok(())
}

fn lite<E: Entity>(entity: &E) -> anyhow::Result<Lite<E>> {
    entity
        .to_lite()
        .ok_or_else(|| anyhow::anyhow!("{} has not been saved", E::TYPE_NAME))
}
