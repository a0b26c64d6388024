use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::algorithm::ProcessAlgorithm;
use super::errors::ProcessError;
use super::package::{lines_of, pending_lines_of, Package, PackageLine};
use super::process::{Process, ProcessKey, ProcessOperation, ProcessState};
use crate::entity::{AnyLite, Entity, Lite, StatefulEntity};
use crate::metrics::Metrics;
use crate::operations::{ConstructSource, Graph, OperationArgs, OperationContext, OperationError, OperationKey};
use crate::store::{EntityStore, Predicate, Transaction};
use crate::utils::{retry_on_transient, RetryConfig};

// ============================================================================
// Process Engine
// ============================================================================
//
// Runs a process over its package, one line at a time:
//
//   for each unprocessed line (sequence order):
//     suspend requested?  → Process.Suspend, stop
//     begin tx → algorithm → mark line + bump counters → commit
//       line-local error  → rollback, record error on the line (new tx)
//       anything else     → process Error, remaining lines stay pending
//   no line left          → Finished
//
// Store calls are retried while the store reports a transient failure.
// One worker per process: a second `execute` on a running process fails
// with `AlreadyRunning`.
//
// ============================================================================

type Algorithms<S> = HashMap<&'static str, Arc<dyn ProcessAlgorithm<S>>>;

pub struct ProcessEngineBuilder<S: EntityStore> {
    store: Arc<S>,
    graph: Arc<Graph<Process>>,
    algorithms: Algorithms<S>,
    retry: RetryConfig,
    metrics: Option<Arc<Metrics>>,
}

impl<S: EntityStore> ProcessEngineBuilder<S> {
    pub fn new(store: Arc<S>, graph: Arc<Graph<Process>>) -> Self {
        Self {
            store,
            graph,
            algorithms: HashMap::new(),
            retry: RetryConfig::default(),
            metrics: None,
        }
    }

    pub fn algorithm(mut self, algorithm: impl ProcessAlgorithm<S>) -> Result<Self, OperationError> {
        let key = algorithm.key();
        if self.algorithms.contains_key(key.as_str()) {
            return Err(OperationError::Configuration(format!(
                "Process algorithm {key} is already registered"
            )));
        }

        self.algorithms.insert(key.as_str(), Arc::new(algorithm));
        Ok(self)
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build(self) -> ProcessEngine<S> {
        tracing::info!(algorithms = self.algorithms.len(), "Process engine ready");

        ProcessEngine {
            store: self.store,
            graph: self.graph,
            algorithms: Arc::new(self.algorithms),
            running: Arc::new(Mutex::new(HashMap::new())),
            retry: self.retry,
            metrics: self.metrics,
        }
    }
}

pub struct ProcessEngine<S: EntityStore> {
    store: Arc<S>,
    graph: Arc<Graph<Process>>,
    algorithms: Arc<Algorithms<S>>,
    /// Suspend flags of the runs owned by this engine
    running: Arc<Mutex<HashMap<Uuid, Arc<AtomicBool>>>>,
    retry: RetryConfig,
    metrics: Option<Arc<Metrics>>,
}

impl<S: EntityStore> Clone for ProcessEngine<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            graph: self.graph.clone(),
            algorithms: self.algorithms.clone(),
            running: self.running.clone(),
            retry: self.retry.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

/// Per-line error as shown by `inspect`.
#[derive(Debug, Clone, Serialize)]
pub struct LineError {
    pub sequence: u32,
    pub target: AnyLite,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessReport {
    pub process: Lite<Process>,
    pub algorithm: String,
    pub state: ProcessState,
    pub total: u32,
    pub processed: u32,
    pub errored: u32,
    pub progress: f64,
    pub exception: Option<String>,
    pub errors: Vec<LineError>,
}

enum RunEnd {
    Completed,
    Suspended,
}

/// Registration of a running process; removed when the run ends.
struct RunGuard {
    running: Arc<Mutex<HashMap<Uuid, Arc<AtomicBool>>>>,
    id: Uuid,
    suspend: Arc<AtomicBool>,
    metrics: Option<Arc<Metrics>>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);

        if let Some(metrics) = &self.metrics {
            metrics.processes_executing.dec();
        }
    }
}

impl<S: EntityStore> ProcessEngine<S> {
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn graph(&self) -> &Arc<Graph<Process>> {
        &self.graph
    }

    // ------------------------------------------------------------------------
    // Packages & processes
    // ------------------------------------------------------------------------

    pub async fn create_package(&self, name: &str, targets: Vec<AnyLite>) -> Result<Package, ProcessError> {
        Ok(Package::create(&*self.store, name, targets).await?)
    }

    /// Snapshots the current result of `predicate` into a new package.
    pub async fn create_package_from_query<E: Entity>(
        &self,
        name: &str,
        predicate: Predicate<'_, E>,
    ) -> Result<Package, ProcessError> {
        let mut tx = self.store.begin().await?;
        let targets = tx
            .query::<E>(predicate)
            .await?
            .iter()
            .filter_map(Entity::to_lite)
            .map(|lite| lite.erase())
            .collect();

        let package = Package::create_in(&mut tx, name, targets).await?;
        tx.commit().await?;
        Ok(package)
    }

    pub async fn create_process(
        &self,
        package: &Package,
        algorithm: ProcessKey,
        ctx: &OperationContext,
    ) -> Result<Process, ProcessError> {
        self.algorithm(algorithm.as_str())?;

        let lite = package
            .to_lite()
            .ok_or_else(|| OperationError::InvalidArguments("package has not been saved".to_string()))?;

        let mut process = Process::new(algorithm, lite, package.total, ctx.user.clone());
        self.save_new(&mut process).await?;

        tracing::info!(
            process = %process.display(),
            algorithm = %algorithm,
            total = process.total,
            "📦 Process created"
        );
        Ok(process)
    }

    /// Snapshots `predicate` into a package and creates a process over it,
    /// all in one transaction.
    pub async fn create_process_from_query<E: Entity>(
        &self,
        name: &str,
        predicate: Predicate<'_, E>,
        algorithm: ProcessKey,
        ctx: &OperationContext,
    ) -> Result<Process, ProcessError> {
        self.algorithm(algorithm.as_str())?;

        let mut tx = self.store.begin().await?;
        let targets = tx
            .query::<E>(predicate)
            .await?
            .iter()
            .filter_map(Entity::to_lite)
            .map(|lite| lite.erase())
            .collect();

        let draft = Package::draft(name, targets)?;
        let mut process = Process::with_draft(algorithm, draft, ctx.user.clone());
        if let Some(draft) = process.take_draft() {
            draft.save_in(&mut tx).await?;
        }
        tx.save(&mut process).await?;
        tx.commit().await?;

        tracing::info!(
            process = %process.display(),
            algorithm = %algorithm,
            total = process.total,
            "📦 Process created"
        );
        Ok(process)
    }

    /// Builds a process with a construct registered on the process graph
    /// (e.g. `Order.CancelWithProcess`) and saves it together with its
    /// drafted package.
    pub async fn construct_process(
        &self,
        key: OperationKey,
        source: ConstructSource,
        ctx: &OperationContext,
    ) -> Result<Process, ProcessError> {
        let mut process = self.graph.construct(key, source, ctx, &OperationArgs::none()).await?;
        self.algorithm(&process.algorithm)?;
        self.save_new(&mut process).await?;

        tracing::info!(
            process = %process.display(),
            operation = %key,
            total = process.total,
            "📦 Process constructed"
        );
        Ok(process)
    }

    /// First save of a process. A drafted package is written in the same
    /// transaction, so neither exists without the other.
    async fn save_new(&self, process: &mut Process) -> Result<(), ProcessError> {
        let mut tx = self.store.begin().await?;
        if let Some(draft) = process.take_draft() {
            draft.save_in(&mut tx).await?;
        }
        tx.save(process).await?;
        tx.commit().await?;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------------

    /// Runs `execute` on a background worker. Failures are logged here, so
    /// dropping the handle loses nothing.
    pub fn spawn(&self, process_id: Uuid, ctx: OperationContext) -> JoinHandle<Result<Process, ProcessError>> {
        let engine = self.clone();
        tokio::spawn(async move {
            let result = engine.execute(process_id, &ctx).await;
            if let Err(error) = &result {
                tracing::error!(process = %process_id, error = %error, "❌ Process worker stopped");
            }
            result
        })
    }

    /// Runs (or resumes) a process until it finishes, is suspended or fails.
    /// A finished process is returned unchanged.
    pub async fn execute(&self, process_id: Uuid, ctx: &OperationContext) -> Result<Process, ProcessError> {
        let run = self.claim(process_id)?;
        let mut process = self.load(process_id).await?;

        if process.state() == ProcessState::Finished {
            tracing::debug!(process = %process_id, "Process already finished, nothing to execute");
            return Ok(process);
        }

        let algorithm = match self.algorithm(&process.algorithm) {
            Ok(algorithm) => algorithm,
            Err(error) => return Err(self.fail(process, error.into()).await),
        };

        if let Err(error) = self.start(&mut process, ctx).await {
            return Err(self.fail(process, error).await);
        }

        tracing::info!(
            process = %process_id,
            algorithm = %process.algorithm,
            total = process.total,
            processed = process.processed,
            "▶️ Process executing"
        );

        let outcome = self
            .run_lines(&mut process, algorithm.as_ref(), &run.suspend, ctx)
            .await;

        let process = match outcome {
            Ok(RunEnd::Completed) => {
                process.mark_finished();
                let process = self.save(&process).await?;
                tracing::info!(
                    process = %process_id,
                    processed = process.processed,
                    errored = process.errored,
                    "✅ Process finished"
                );
                process
            }
            Ok(RunEnd::Suspended) => {
                let process = self.transition(&process, ProcessOperation::SUSPEND, ctx).await?;
                tracing::info!(
                    process = %process_id,
                    processed = process.processed,
                    total = process.total,
                    "⏸️ Process suspended"
                );
                process
            }
            Err(error) => return Err(self.fail(process, error).await),
        };

        self.record_run(&process);
        Ok(process)
    }

    /// Asks a running process to stop at the next line boundary, or suspends
    /// a process that is queued/executing without a worker.
    pub async fn suspend(&self, process_id: Uuid, ctx: &OperationContext) -> Result<(), ProcessError> {
        let flag = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&process_id)
            .cloned();

        if let Some(flag) = flag {
            flag.store(true, Ordering::SeqCst);
            tracing::info!(process = %process_id, "Suspend requested");
            return Ok(());
        }

        let process = self.load(process_id).await?;
        self.transition(&process, ProcessOperation::SUSPEND, ctx).await?;
        Ok(())
    }

    pub fn is_running(&self, process_id: Uuid) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&process_id)
    }

    pub async fn inspect(&self, process_id: Uuid) -> Result<ProcessReport, ProcessError> {
        let process = self.load(process_id).await?;
        let lines = lines_of(&*self.store, process.package.id()).await?;

        let errors = lines
            .into_iter()
            .filter_map(|line| match line.error {
                Some(error) => Some(LineError {
                    sequence: line.sequence,
                    target: line.target,
                    error,
                }),
                None => None,
            })
            .collect();

        Ok(ProcessReport {
            process: process.to_lite().ok_or(ProcessError::NotFound(process_id))?,
            algorithm: process.algorithm.clone(),
            state: process.state(),
            total: process.total,
            processed: process.processed,
            errored: process.errored,
            progress: process.progress(),
            exception: process.exception.clone(),
            errors,
        })
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    fn claim(&self, process_id: Uuid) -> Result<RunGuard, ProcessError> {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if running.contains_key(&process_id) {
            return Err(ProcessError::AlreadyRunning(process_id));
        }

        let suspend = Arc::new(AtomicBool::new(false));
        running.insert(process_id, suspend.clone());

        if let Some(metrics) = &self.metrics {
            metrics.processes_executing.inc();
        }

        Ok(RunGuard {
            running: self.running.clone(),
            id: process_id,
            suspend,
            metrics: self.metrics.clone(),
        })
    }

    /// Recovers an orphaned run if needed, then moves the process to
    /// Executing. `process` tracks every step that was saved.
    async fn start(&self, process: &mut Process, ctx: &OperationContext) -> Result<(), ProcessError> {
        // Queued/Executing without a worker: the previous run died mid-flight.
        if matches!(process.state(), ProcessState::Queued | ProcessState::Executing) {
            tracing::warn!(
                process = %process.display(),
                state = %process.state(),
                "Recovering interrupted process run"
            );
            process.mark_error(format!("Run interrupted while {}", process.state()));
            *process = self.save(process).await?;
        }

        *process = self.transition(process, ProcessOperation::EXECUTE, ctx).await?;
        process.mark_executing();
        *process = self.save(process).await?;
        Ok(())
    }

    /// Records `error` as the process exception when the store allows it.
    async fn fail(&self, mut process: Process, error: ProcessError) -> ProcessError {
        tracing::error!(
            process = %process.display(),
            processed = process.processed,
            error = %error,
            "❌ Process failed"
        );

        process.mark_error(error.to_string());
        if let Err(save_error) = self.save(&process).await {
            tracing::error!(
                process = %process.display(),
                error = %save_error,
                "Failed to record process error"
            );
        }
        self.record_run(&process);
        error
    }

    fn algorithm(&self, key: &str) -> Result<Arc<dyn ProcessAlgorithm<S>>, OperationError> {
        self.algorithms
            .get(key)
            .cloned()
            .ok_or_else(|| OperationError::Configuration(format!("No process algorithm registered for {key}")))
    }

    async fn run_lines(
        &self,
        process: &mut Process,
        algorithm: &dyn ProcessAlgorithm<S>,
        suspend: &AtomicBool,
        ctx: &OperationContext,
    ) -> Result<RunEnd, ProcessError> {
        let package = process.package.id();
        let lines = self
            .with_retry("process_lines", move || async move {
                Ok::<_, ProcessError>(pending_lines_of(&*self.store, package).await?)
            })
            .await?;

        for line in &lines {
            if suspend.load(Ordering::SeqCst) {
                return Ok(RunEnd::Suspended);
            }

            let started = Instant::now();
            let current: &Process = process;
            let (updated, error) = self
                .with_retry("process_line", move || self.run_line(algorithm, current, line, ctx))
                .await?;
            *process = updated;

            if let Some(metrics) = &self.metrics {
                metrics.record_process_line(&process.algorithm, started.elapsed().as_secs_f64(), error.is_none());
            }

            match error {
                Some(error) => tracing::warn!(
                    package = %process.package,
                    sequence = line.sequence,
                    target = %line.target,
                    error = %error,
                    "Line failed, continuing"
                ),
                None => tracing::debug!(
                    sequence = line.sequence,
                    target = %line.target,
                    "Line processed"
                ),
            }
        }

        Ok(RunEnd::Completed)
    }

    /// One line in its own transaction. Returns the updated process and the
    /// line-local error, if any.
    async fn run_line(
        &self,
        algorithm: &dyn ProcessAlgorithm<S>,
        process: &Process,
        line: &PackageLine,
        ctx: &OperationContext,
    ) -> Result<(Process, Option<String>), ProcessError> {
        let mut process = process.clone();
        let mut line = line.clone();

        let mut tx = self.store.begin().await?;
        let result = algorithm.execute_line(&mut tx, &line.target, ctx).await;

        match result {
            Ok(()) => {
                line.mark_done();
                process.processed += 1;

                tx.save(&mut line).await?;
                tx.save(&mut process).await?;
                tx.commit().await?;
                Ok((process, None))
            }
            Err(error) if error.is_line_local() => {
                // Roll back whatever the operation wrote before recording
                drop(tx);

                let message = error.to_string();
                line.mark_failed(message.clone());
                process.processed += 1;
                process.errored += 1;

                let mut tx = self.store.begin().await?;
                tx.save(&mut line).await?;
                tx.save(&mut process).await?;
                tx.commit().await?;
                Ok((process, Some(message)))
            }
            Err(error) => Err(error.into()),
        }
    }

    async fn load(&self, process_id: Uuid) -> Result<Process, ProcessError> {
        self.with_retry("process_load", move || async move {
            self.store
                .retrieve::<Process>(process_id)
                .await?
                .ok_or(ProcessError::NotFound(process_id))
        })
        .await
    }

    async fn save(&self, process: &Process) -> Result<Process, ProcessError> {
        self.with_retry("process_save", move || async move {
            let mut updated = process.clone();
            self.store.save(&mut updated).await?;
            Ok::<_, ProcessError>(updated)
        })
        .await
    }

    async fn transition(
        &self,
        process: &Process,
        key: OperationKey,
        ctx: &OperationContext,
    ) -> Result<Process, ProcessError> {
        self.with_retry(key.as_str(), move || async move {
            let mut updated = process.clone();
            self.graph
                .execute(&*self.store, &mut updated, key, ctx, &OperationArgs::none())
                .await?;
            Ok::<_, ProcessError>(updated)
        })
        .await
    }

    async fn with_retry<T, F, Fut>(&self, label: &str, mut operation: F) -> Result<T, ProcessError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProcessError>>,
    {
        let metrics = self.metrics.as_deref();
        retry_on_transient(&self.retry, label, |attempt| {
            if attempt > 1 {
                if let Some(metrics) = metrics {
                    metrics.record_retry_attempt(label, attempt);
                }
            }
            operation()
        })
        .await
        .into_result()
    }

    fn record_run(&self, process: &Process) {
        if let Some(metrics) = &self.metrics {
            metrics.record_process_run(&process.algorithm, &process.state().to_string());
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
