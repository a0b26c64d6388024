use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::package::{Package, PackageDraft};
use crate::entity::{AnyLite, Entity, LifecycleState, Lite, StatefulEntity};
use crate::operations::{Execute, GraphBuilder, OperationError, OperationKey};

// ============================================================================
// Process Entity
// ============================================================================
//
// A process is one run of an algorithm over every line of a package.
//
//   Created ─┐
//   Suspended├─ Process.Execute ─→ Queued ─→ Executing ─┬─→ Finished
//   Error ───┘                                          ├─→ Error
//   Queued | Executing ─ Process.Suspend ─→ Suspended ←─┘
//
// The two user-facing transitions are registered on the process graph; the
// engine drives Queued → Executing → Finished/Error itself.
//
// ============================================================================

/// Identifier of a registered process algorithm.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ProcessKey(&'static str);

impl ProcessKey {
    pub const fn new(key: &'static str) -> Self {
        Self(key)
    }

    pub fn as_str(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for ProcessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessState {
    Created,
    Queued,
    Executing,
    Suspended,
    Finished,
    Error,
}

impl LifecycleState for ProcessState {
    const ALL: &'static [Self] = &[
        ProcessState::Created,
        ProcessState::Queued,
        ProcessState::Executing,
        ProcessState::Suspended,
        ProcessState::Finished,
        ProcessState::Error,
    ];

    fn is_terminal(&self) -> bool {
        matches!(self, ProcessState::Finished)
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Process {
    pub id: Option<Uuid>,
    pub algorithm: String,
    pub package: Lite<Package>,
    state: ProcessState,

    // Counters. `processed` includes errored lines.
    pub total: u32,
    pub processed: u32,
    pub errored: u32,

    pub user: Option<AnyLite>,
    pub creation_date: DateTime<Utc>,
    pub queued_date: Option<DateTime<Utc>>,
    pub execution_start: Option<DateTime<Utc>>,
    pub execution_end: Option<DateTime<Utc>>,
    pub suspend_date: Option<DateTime<Utc>>,
    pub exception: Option<String>,

    /// Package still to be written alongside the process on its first save.
    #[serde(skip)]
    draft: Option<PackageDraft>,
}

impl Process {
    pub fn new(algorithm: ProcessKey, package: Lite<Package>, total: u32, user: Option<AnyLite>) -> Self {
        Self {
            id: None,
            algorithm: algorithm.as_str().to_string(),
            package,
            state: ProcessState::Created,
            total,
            processed: 0,
            errored: 0,
            user,
            creation_date: Utc::now(),
            queued_date: None,
            execution_start: None,
            execution_end: None,
            suspend_date: None,
            exception: None,
            draft: None,
        }
    }

    /// A process over a package that is not persisted yet. The engine writes
    /// the package, its lines and the process in one transaction.
    pub fn with_draft(algorithm: ProcessKey, draft: PackageDraft, user: Option<AnyLite>) -> Self {
        let mut process = Self::new(algorithm, draft.lite(), draft.package.total, user);
        process.draft = Some(draft);
        process
    }

    pub(crate) fn take_draft(&mut self) -> Option<PackageDraft> {
        self.draft.take()
    }

    /// Share of lines handled so far, in `[0, 1]`.
    pub fn progress(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        f64::from(self.processed) / f64::from(self.total)
    }

    pub(crate) fn mark_executing(&mut self) {
        self.state = ProcessState::Executing;
        self.execution_start = Some(Utc::now());
        self.execution_end = None;
    }

    pub(crate) fn mark_finished(&mut self) {
        self.state = ProcessState::Finished;
        self.execution_end = Some(Utc::now());
    }

    pub(crate) fn mark_error(&mut self, exception: String) {
        self.state = ProcessState::Error;
        self.exception = Some(exception);
        self.execution_end = Some(Utc::now());
    }
}

impl Entity for Process {
    const TYPE_NAME: &'static str = "Process";

    fn id(&self) -> Option<Uuid> {
        self.id
    }

    fn assign_id(&mut self, id: Uuid) {
        self.id = Some(id);
    }

    fn display(&self) -> String {
        format!("{} {}", self.algorithm, self.creation_date.format("%Y-%m-%d %H:%M:%S"))
    }
}

impl StatefulEntity for Process {
    type State = ProcessState;

    fn state(&self) -> ProcessState {
        self.state
    }
}

// ============================================================================
// Process Graph
// ============================================================================

pub struct ProcessOperation;

impl ProcessOperation {
    pub const EXECUTE: OperationKey = OperationKey::new("Process.Execute");
    pub const SUSPEND: OperationKey = OperationKey::new("Process.Suspend");
}

/// Builder holding the process lifecycle operations. Other domains add their
/// process constructs (e.g. `Order.CancelWithProcess`) before building.
pub fn process_graph_builder() -> Result<GraphBuilder<Process>, OperationError> {
    let mut builder = GraphBuilder::new();

    builder
        .register(
            Execute::new(ProcessOperation::EXECUTE)
                .from_states([ProcessState::Created, ProcessState::Suspended, ProcessState::Error])
                .to_state(ProcessState::Queued)
                .effect(|p: &mut Process, _ctx, _args| {
                    p.state = ProcessState::Queued;
                    p.queued_date = Some(Utc::now());
                    p.exception = None;
                    Ok(())
                }),
        )?
        .register(
            Execute::new(ProcessOperation::SUSPEND)
                .from_states([ProcessState::Queued, ProcessState::Executing])
                .to_state(ProcessState::Suspended)
                .effect(|p: &mut Process, _ctx, _args| {
                    p.state = ProcessState::Suspended;
                    p.suspend_date = Some(Utc::now());
                    Ok(())
                }),
        )?;

    Ok(builder)
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operations::{OperationArgs, OperationContext};
    use crate::store::{EntityStore, MemoryStore};

    fn process(total: u32) -> Process {
        Process::new(
            ProcessKey::new("Test.Noop"),
            Lite::new(Uuid::now_v7(), "package"),
            total,
            None,
        )
    }

    #[test]
    fn test_progress() {
        let mut p = process(10);
        assert_eq!(p.progress(), 0.0);
        p.processed = 4;
        assert!((p.progress() - 0.4).abs() < f64::EPSILON);
        assert_eq!(process(0).progress(), 1.0);
    }

    #[test]
    fn test_every_running_state_has_an_exit() {
        let graph = process_graph_builder().unwrap().build();
        assert!(graph.states_without_exit().is_empty());
    }

    #[tokio::test]
    async fn test_execute_and_suspend_transitions() {
        let store = MemoryStore::new();
        let graph = process_graph_builder().unwrap().build();
        let ctx = OperationContext::system();
        let none = OperationArgs::none();

        let mut p = process(3);
        store.save(&mut p).await.unwrap();

        graph
            .execute(&store, &mut p, ProcessOperation::EXECUTE, &ctx, &none)
            .await
            .unwrap();
        assert_eq!(p.state(), ProcessState::Queued);

        graph
            .execute(&store, &mut p, ProcessOperation::SUSPEND, &ctx, &none)
            .await
            .unwrap();
        assert_eq!(p.state(), ProcessState::Suspended);
        assert!(p.suspend_date.is_some());

        // Suspended processes are resumed, not suspended again
        let err = graph
            .execute(&store, &mut p, ProcessOperation::SUSPEND, &ctx, &none)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, OperationError::IllegalTransition(_)));
    }

    #[tokio::test]
    async fn test_finished_process_cannot_be_queued() {
        let store = MemoryStore::new();
        let graph = process_graph_builder().unwrap().build();

        let mut p = process(0);
        p.mark_finished();
        store.save(&mut p).await.unwrap();

        let reason = graph.can_execute(&p, ProcessOperation::EXECUTE);
        assert!(reason.is_some());
    }

    #[test]
    fn test_mark_error_records_exception() {
        let mut p = process(1);
        p.mark_error("store down".to_string());
        assert_eq!(p.state(), ProcessState::Error);
        assert_eq!(p.exception.as_deref(), Some("store down"));
    }
}
