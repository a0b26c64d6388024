// ============================================================================
// Scheduler - timer-driven task runner
// ============================================================================
//
// Domains register named tasks in a `TaskRegistry`; the `SchedulerActor`
// fires them on their configured intervals or on demand.
//
// ============================================================================

pub mod actor;
pub mod task;

pub use actor::{ListTasks, RunTask, Schedule, SchedulerActor};
pub use task::{TaskKey, TaskRegistry, TaskResult};
