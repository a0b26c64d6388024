use async_trait::async_trait;
use std::sync::Arc;

use super::process::ProcessKey;
use crate::entity::{AnyLite, StatefulEntity};
use crate::operations::{Graph, OperationArgs, OperationContext, OperationError, OperationKey};
use crate::store::EntityStore;

// ============================================================================
// Process Algorithms
// ============================================================================
//
// What a process does to each package line. The engine owns the loop,
// transactions, counters and suspension; an algorithm only handles one
// target inside the transaction it is given.
//
// ============================================================================

#[async_trait]
pub trait ProcessAlgorithm<S: EntityStore>: Send + Sync + 'static {
    fn key(&self) -> ProcessKey;

    /// Handles one line target. Line-local errors are recorded on the line;
    /// anything else stops the run.
    async fn execute_line(
        &self,
        tx: &mut S::Tx,
        target: &AnyLite,
        ctx: &OperationContext,
    ) -> Result<(), OperationError>;
}

/// Applies one graph operation to every line target.
pub struct PackageExecuteAlgorithm<E: StatefulEntity> {
    key: ProcessKey,
    graph: Arc<Graph<E>>,
    operation: OperationKey,
    args: OperationArgs,
}

impl<E: StatefulEntity> PackageExecuteAlgorithm<E> {
    pub fn new(key: ProcessKey, graph: Arc<Graph<E>>, operation: OperationKey) -> Self {
        Self {
            key,
            graph,
            operation,
            args: OperationArgs::none(),
        }
    }

    /// Arguments passed to the operation for every line.
    pub fn with_args(mut self, args: OperationArgs) -> Self {
        self.args = args;
        self
    }
}

#[async_trait]
impl<S: EntityStore, E: StatefulEntity> ProcessAlgorithm<S> for PackageExecuteAlgorithm<E> {
    fn key(&self) -> ProcessKey {
        self.key
    }

    async fn execute_line(
        &self,
        tx: &mut S::Tx,
        target: &AnyLite,
        ctx: &OperationContext,
    ) -> Result<(), OperationError> {
        let lite = target.downcast::<E>().ok_or_else(|| {
            OperationError::InvalidArguments(format!(
                "{} operates on {}, line targets {}",
                self.key,
                E::TYPE_NAME,
                target.entity_type
            ))
        })?;

        self.graph
            .execute_lite_in(tx, &lite, self.operation, ctx, &self.args)
            .await
            .map(|_| ())
    }
}
