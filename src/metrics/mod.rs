// Private module declaration
mod server;

use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry};

// Re-export for public API
pub use server::start_metrics_server;

// ============================================================================
// Metrics Module - Prometheus metrics for observability
// ============================================================================
//
// Provides metrics for:
// - Process runs and per-line outcomes (throughput, latency)
// - Stock reservations made by order creation
// - Retry attempts against the entity store
// - Scheduled task executions
//
// All metrics are registered with Prometheus and can be scraped via /metrics
// ============================================================================

/// Central metrics registry for the entire application
pub struct Metrics {
    registry: Registry,

    // Process Engine Metrics
    pub process_lines_total: IntCounterVec,
    pub process_line_duration: HistogramVec,
    pub process_runs_total: IntCounterVec,
    pub processes_executing: IntGauge,

    // Order Metrics
    pub orders_created: IntCounter,
    pub stock_reservations_failed: IntCounter,

    // Retry Metrics
    pub retry_attempts_total: IntCounterVec,

    // Scheduler Metrics
    pub scheduled_tasks_total: IntCounterVec,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        // Process Engine Metrics
        let process_lines_total = IntCounterVec::new(
            Opts::new("process_lines_total", "Package lines handled by process runs"),
            &["algorithm", "outcome"],
        )?;
        registry.register(Box::new(process_lines_total.clone()))?;

        let process_line_duration = HistogramVec::new(
            HistogramOpts::new("process_line_duration_seconds", "Time spent on a single package line")
                .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
            &["algorithm"],
        )?;
        registry.register(Box::new(process_line_duration.clone()))?;

        let process_runs_total = IntCounterVec::new(
            Opts::new("process_runs_total", "Process runs by final state"),
            &["algorithm", "state"],
        )?;
        registry.register(Box::new(process_runs_total.clone()))?;

        let processes_executing = IntGauge::new("processes_executing", "Process runs currently executing")?;
        registry.register(Box::new(processes_executing.clone()))?;

        // Order Metrics
        let orders_created = IntCounter::new("orders_created_total", "Orders created with reserved stock")?;
        registry.register(Box::new(orders_created.clone()))?;

        let stock_reservations_failed = IntCounter::new(
            "stock_reservations_failed_total",
            "Order creations rejected for insufficient stock",
        )?;
        registry.register(Box::new(stock_reservations_failed.clone()))?;

        // Retry Metrics
        let retry_attempts_total = IntCounterVec::new(
            Opts::new("retry_attempts_total", "Total retry attempts"),
            &["operation", "attempt"],
        )?;
        registry.register(Box::new(retry_attempts_total.clone()))?;

        // Scheduler Metrics
        let scheduled_tasks_total = IntCounterVec::new(
            Opts::new("scheduled_tasks_total", "Scheduled task executions"),
            &["task", "outcome"],
        )?;
        registry.register(Box::new(scheduled_tasks_total.clone()))?;

        Ok(Self {
            registry,
            process_lines_total,
            process_line_duration,
            process_runs_total,
            processes_executing,
            orders_created,
            stock_reservations_failed,
            retry_attempts_total,
            scheduled_tasks_total,
        })
    }

    /// Get the Prometheus registry for exposing metrics via HTTP
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Helper to record a handled package line
    pub fn record_process_line(&self, algorithm: &str, duration_secs: f64, success: bool) {
        let outcome = if success { "ok" } else { "error" };
        self.process_lines_total.with_label_values(&[algorithm, outcome]).inc();
        self.process_line_duration.with_label_values(&[algorithm]).observe(duration_secs);
    }

    /// Helper to record the state a run stopped in
    pub fn record_process_run(&self, algorithm: &str, state: &str) {
        self.process_runs_total.with_label_values(&[algorithm, state]).inc();
    }

    /// Helper to record the outcome of a stock reservation
    pub fn record_stock_reservation(&self, success: bool) {
        if success {
            self.orders_created.inc();
        } else {
            self.stock_reservations_failed.inc();
        }
    }

    /// Helper to record retry attempt
    pub fn record_retry_attempt(&self, operation: &str, attempt: u32) {
        self.retry_attempts_total
            .with_label_values(&[operation, &attempt.to_string()])
            .inc();
    }

    /// Helper to record a scheduled task execution
    pub fn record_task(&self, task: &str, success: bool) {
        let outcome = if success { "ok" } else { "error" };
        self.scheduled_tasks_total.with_label_values(&[task, outcome]).inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        metrics.processes_executing.set(0);
        assert!(!metrics.registry().gather().is_empty());
    }

    #[test]
    fn test_record_process_line() {
        let metrics = Metrics::new().unwrap();
        metrics.record_process_line("Order.CancelOrders", 0.002, true);
        metrics.record_process_line("Order.CancelOrders", 0.001, false);
        metrics.record_process_line("Order.CancelOrders", 0.001, true);

        let ok = metrics.process_lines_total.with_label_values(&["Order.CancelOrders", "ok"]);
        let failed = metrics.process_lines_total.with_label_values(&["Order.CancelOrders", "error"]);
        assert_eq!(ok.get(), 2);
        assert_eq!(failed.get(), 1);
    }

    #[test]
    fn test_record_stock_reservation() {
        let metrics = Metrics::new().unwrap();
        metrics.record_stock_reservation(true);
        metrics.record_stock_reservation(false);
        metrics.record_stock_reservation(false);

        assert_eq!(metrics.orders_created.get(), 1);
        assert_eq!(metrics.stock_reservations_failed.get(), 2);
    }

    #[test]
    fn test_record_retry() {
        let metrics = Metrics::new().unwrap();
        metrics.record_retry_attempt("process_line", 2);
        metrics.record_retry_attempt("process_line", 3);

        let gathered = metrics.registry().gather();
        let attempts = gathered.iter().find(|m| m.name() == "retry_attempts_total").unwrap();
        assert_eq!(attempts.metric.len(), 2); // Two different attempt labels
    }

    #[test]
    fn test_record_task() {
        let metrics = Metrics::new().unwrap();
        metrics.record_task("Order.CancelOldOrders", true);
        metrics.record_process_run("Order.CancelOrders", "Finished");

        assert_eq!(
            metrics.scheduled_tasks_total.with_label_values(&["Order.CancelOldOrders", "ok"]).get(),
            1
        );
        assert_eq!(
            metrics.process_runs_total.with_label_values(&["Order.CancelOrders", "Finished"]).get(),
            1
        );
    }
}
