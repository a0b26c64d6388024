use actix::prelude::*;
use std::sync::Arc;
use std::time::Duration;

use super::task::{TaskKey, TaskRegistry, TaskResult};
use crate::metrics::Metrics;

// ============================================================================
// Scheduler Actor - runs registered tasks on a timer
// ============================================================================
//
// Responsibilities:
// - Fire each scheduled task on its interval
// - Run a task on demand (RunTask)
// - Record task outcomes
//
// A failing task is logged and retried on its next tick.
//
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub struct Schedule {
    pub task: TaskKey,
    pub every: Duration,
}

// ============================================================================
// Messages
// ============================================================================

#[derive(Message)]
#[rtype(result = "anyhow::Result<Option<crate::entity::AnyLite>>")]
pub struct RunTask(pub TaskKey);

#[derive(Message)]
#[rtype(result = "Vec<TaskKey>")]
pub struct ListTasks;

// ============================================================================
// Scheduler Actor
// ============================================================================

pub struct SchedulerActor {
    registry: Arc<TaskRegistry>,
    schedules: Vec<Schedule>,
    metrics: Option<Arc<Metrics>>,
}

impl SchedulerActor {
    pub fn new(registry: Arc<TaskRegistry>) -> Self {
        Self {
            registry,
            schedules: Vec::new(),
            metrics: None,
        }
    }

    pub fn schedule(mut self, task: TaskKey, every: Duration) -> Self {
        self.schedules.push(Schedule { task, every });
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    async fn run_task(registry: Arc<TaskRegistry>, metrics: Option<Arc<Metrics>>, task: TaskKey) -> TaskResult {
        let result = registry.run(task).await;

        match &result {
            Ok(Some(produced)) => tracing::info!(task = %task, produced = %produced, "⏰ Task completed"),
            Ok(None) => tracing::info!(task = %task, "⏰ Task completed"),
            Err(e) => tracing::error!(task = %task, error = %e, "❌ Task failed"),
        }

        if let Some(metrics) = metrics {
            metrics.record_task(task.as_str(), result.is_ok());
        }

        result
    }
}

impl Actor for SchedulerActor {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::info!(schedules = self.schedules.len(), "SchedulerActor started");

        for schedule in self.schedules.clone() {
            if !self.registry.contains(schedule.task) {
                tracing::warn!(task = %schedule.task, "⚠️ Scheduled task is not registered, skipping");
                continue;
            }

            ctx.run_interval(schedule.every, move |act, _ctx| {
                let registry = act.registry.clone();
                let metrics = act.metrics.clone();

                actix::spawn(async move {
                    let _ = Self::run_task(registry, metrics, schedule.task).await;
                });
            });
        }
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        tracing::info!("SchedulerActor stopped");
    }
}

// ============================================================================
// Handlers
// ============================================================================

impl Handler<RunTask> for SchedulerActor {
    type Result = ResponseFuture<TaskResult>;

    fn handle(&mut self, msg: RunTask, _: &mut Self::Context) -> Self::Result {
        let registry = self.registry.clone();
        let metrics = self.metrics.clone();

        Box::pin(Self::run_task(registry, metrics, msg.0))
    }
}

impl Handler<ListTasks> for SchedulerActor {
    type Result = MessageResult<ListTasks>;

    fn handle(&mut self, _: ListTasks, _: &mut Self::Context) -> Self::Result {
        MessageResult(self.registry.keys())
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const TICK: TaskKey = TaskKey::new("Test.Tick");
    const BROKEN: TaskKey = TaskKey::new("Test.Broken");

    fn registry(calls: Arc<AtomicUsize>) -> Arc<TaskRegistry> {
        let mut registry = TaskRegistry::new();
        registry
            .register(TICK, move || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(None)
                }
            })
            .unwrap();
        registry
            .register(BROKEN, || async { Err(anyhow::anyhow!("boom")) })
            .unwrap();
        Arc::new(registry)
    }

    #[actix::test]
    async fn test_run_task_on_demand_records_metrics() {
        let calls = Arc::new(AtomicUsize::new(0));
        let metrics = Arc::new(Metrics::new().unwrap());
        let addr = SchedulerActor::new(registry(calls.clone()))
            .with_metrics(metrics.clone())
            .start();

        assert!(addr.send(RunTask(TICK)).await.unwrap().unwrap().is_none());
        assert!(addr.send(RunTask(BROKEN)).await.unwrap().is_err());
        assert!(addr.send(RunTask(TaskKey::new("Test.Missing"))).await.unwrap().is_err());

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            metrics.scheduled_tasks_total.with_label_values(&["Test.Tick", "ok"]).get(),
            1
        );
        assert_eq!(
            metrics.scheduled_tasks_total.with_label_values(&["Test.Broken", "error"]).get(),
            1
        );
        assert_eq!(addr.send(ListTasks).await.unwrap(), vec![BROKEN, TICK]);
    }

    #[actix::test]
    async fn test_scheduled_task_fires_on_interval() {
        let calls = Arc::new(AtomicUsize::new(0));
        let _addr = SchedulerActor::new(registry(calls.clone()))
            .schedule(TICK, Duration::from_millis(20))
            .schedule(TaskKey::new("Test.Missing"), Duration::from_millis(20))
            .start();

        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(calls.load(Ordering::SeqCst) >= 2);
    }
}
