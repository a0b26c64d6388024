use futures_util::future::{BoxFuture, FutureExt};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::entity::AnyLite;

// ============================================================================
// Scheduled Tasks
// ============================================================================
//
// Named zero-argument callbacks. A task returns the entity it produced (for
// process-backed tasks, the process) so the caller can follow up on it.
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskKey(&'static str);

impl TaskKey {
    pub const fn new(key: &'static str) -> Self {
        Self(key)
    }

    pub fn as_str(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

pub type TaskResult = anyhow::Result<Option<AnyLite>>;

type TaskFn = Arc<dyn Fn() -> BoxFuture<'static, TaskResult> + Send + Sync>;

#[derive(Clone, Default)]
pub struct TaskRegistry {
    tasks: HashMap<TaskKey, TaskFn>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F, Fut>(&mut self, key: TaskKey, task: F) -> anyhow::Result<()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TaskResult> + Send + 'static,
    {
        if self.tasks.contains_key(&key) {
            anyhow::bail!("Task {key} is already registered");
        }

        self.tasks.insert(key, Arc::new(move || task().boxed()));
        tracing::debug!(task = %key, "Task registered");
        Ok(())
    }

    pub fn contains(&self, key: TaskKey) -> bool {
        self.tasks.contains_key(&key)
    }

    pub fn keys(&self) -> Vec<TaskKey> {
        let mut keys: Vec<_> = self.tasks.keys().copied().collect();
        keys.sort_by_key(|k| k.as_str());
        keys
    }

    /// Resolves `key` to a future that runs the task once.
    pub fn task(&self, key: TaskKey) -> anyhow::Result<BoxFuture<'static, TaskResult>> {
        let task = self
            .tasks
            .get(&key)
            .ok_or_else(|| anyhow::anyhow!("Task {key} is not registered"))?;
        Ok(task())
    }

    pub async fn run(&self, key: TaskKey) -> TaskResult {
        self.task(key)?.await
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
