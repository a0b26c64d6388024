use chrono::Utc;
use std::collections::HashMap;

use super::core::{
    Body, ConstructSource, IntoOperation, Operation, OperationArgs, OperationContext, OperationError,
    OperationKey, OperationKind,
};
use super::log::OperationLog;
use crate::entity::{LifecycleState, Lite, StatefulEntity};
use crate::store::{EntityStore, Transaction};

// ============================================================================
// Operation Graph
// ============================================================================
//
// `GraphBuilder` collects descriptors at start-up; `build()` freezes them
// into an immutable `Graph`. Every transition of a stateful entity goes
// through `Graph::execute*`:
//
//   lookup → kind/new check → from-state check → precondition
//          → effect on a working copy → end-state assertion
//          → save entity + operation log (one transaction)
//
// ============================================================================

pub struct GraphBuilder<E: StatefulEntity> {
    operations: HashMap<OperationKey, Operation<E>>,
}

impl<E: StatefulEntity> Default for GraphBuilder<E> {
    fn default() -> Self {
        Self {
            operations: HashMap::new(),
        }
    }
}

impl<E: StatefulEntity> GraphBuilder<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registering the same key twice is a configuration error.
    pub fn register(&mut self, operation: impl IntoOperation<E>) -> Result<&mut Self, OperationError> {
        let operation = operation.into_operation()?;
        let key = operation.key;

        if self.operations.contains_key(&key) {
            return Err(OperationError::Configuration(format!(
                "Operation {key} is already registered for {}",
                E::TYPE_NAME
            )));
        }

        tracing::debug!(
            entity_type = E::TYPE_NAME,
            operation = %key,
            kind = ?operation.kind,
            "Registered operation"
        );

        self.operations.insert(key, operation);
        Ok(self)
    }

    pub fn build(self) -> Graph<E> {
        tracing::info!(
            entity_type = E::TYPE_NAME,
            operations = self.operations.len(),
            "Operation graph ready"
        );

        Graph {
            operations: self.operations,
        }
    }
}

pub struct Graph<E: StatefulEntity> {
    operations: HashMap<OperationKey, Operation<E>>,
}

impl<E: StatefulEntity> Graph<E> {
    pub fn operation(&self, key: OperationKey) -> Result<&Operation<E>, OperationError> {
        self.operations
            .get(&key)
            .ok_or(OperationError::NotRegistered {
                entity_type: E::TYPE_NAME,
                operation: key,
            })
    }

    pub fn contains(&self, key: OperationKey) -> bool {
        self.operations.contains_key(&key)
    }

    pub fn operations(&self) -> impl Iterator<Item = &Operation<E>> {
        self.operations.values()
    }

    /// Why `key` cannot run on `entity` right now, or `None` if it can.
    pub fn can_execute(&self, entity: &E, key: OperationKey) -> Option<String> {
        self.operation(key)
            .and_then(|operation| operation.check(entity))
            .err()
            .map(|e| e.to_string())
    }

    /// Non-terminal states no execute operation can leave.
    pub fn states_without_exit(&self) -> Vec<E::State> {
        <E::State as LifecycleState>::ALL
            .iter()
            .copied()
            .filter(|state| !state.is_terminal())
            .filter(|state| !self.operations.values().any(|op| op.leaves(*state)))
            .collect()
    }

    // ------------------------------------------------------------------------
    // Execute
    // ------------------------------------------------------------------------

    /// Runs `key` on `entity` in its own transaction. `entity` is only
    /// replaced once the transaction committed.
    pub async fn execute<S: EntityStore>(
        &self,
        store: &S,
        entity: &mut E,
        key: OperationKey,
        ctx: &OperationContext,
        args: &OperationArgs,
    ) -> Result<(), OperationError> {
        let mut tx = store.begin().await?;
        let updated = self.execute_in(&mut tx, entity.clone(), key, ctx, args).await?;
        tx.commit().await?;

        *entity = updated;
        Ok(())
    }

    /// Loads the referenced entity and runs `key` on it in one transaction.
    pub async fn execute_lite<S: EntityStore>(
        &self,
        store: &S,
        lite: &Lite<E>,
        key: OperationKey,
        ctx: &OperationContext,
        args: &OperationArgs,
    ) -> Result<E, OperationError> {
        let mut tx = store.begin().await?;
        let entity = self.execute_lite_in(&mut tx, lite, key, ctx, args).await?;
        tx.commit().await?;
        Ok(entity)
    }

    pub async fn execute_lite_in<T: Transaction>(
        &self,
        tx: &mut T,
        lite: &Lite<E>,
        key: OperationKey,
        ctx: &OperationContext,
        args: &OperationArgs,
    ) -> Result<E, OperationError> {
        let entity = tx
            .retrieve::<E>(lite.id())
            .await?
            .ok_or(OperationError::NotFound {
                entity_type: E::TYPE_NAME,
                id: lite.id(),
            })?;

        self.execute_in(tx, entity, key, ctx, args).await
    }

    /// Runs `key` inside a caller-owned transaction. Nothing is committed
    /// here; on error the caller drops the transaction.
    pub async fn execute_in<T: Transaction>(
        &self,
        tx: &mut T,
        mut entity: E,
        key: OperationKey,
        ctx: &OperationContext,
        args: &OperationArgs,
    ) -> Result<E, OperationError> {
        let operation = self.operation(key)?;
        operation.check(&entity)?;

        let Body::Execute(effect) = &operation.body else {
            return Err(OperationError::IllegalTransition(format!(
                "{key} is not an execute operation"
            )));
        };

        let origin = entity.state();
        let start = Utc::now();

        effect(&mut entity, ctx, args)?;
        operation.assert_end_state(&entity)?;

        tx.save(&mut entity).await?;

        let target = entity
            .to_lite()
            .ok_or_else(|| OperationError::Configuration(format!("{} saved without an id", E::TYPE_NAME)))?
            .erase();

        let mut log = OperationLog {
            id: None,
            operation: key.to_string(),
            target,
            origin_state: format!("{origin:?}"),
            end_state: format!("{:?}", entity.state()),
            user: ctx.user.clone(),
            correlation_id: ctx.correlation_id,
            start,
            end: Utc::now(),
        };
        tx.save(&mut log).await?;

        tracing::info!(
            entity_type = E::TYPE_NAME,
            entity = %log.target,
            operation = %key,
            from = ?origin,
            to = ?entity.state(),
            correlation_id = %ctx.correlation_id,
            "Executed operation"
        );

        Ok(entity)
    }

    // ------------------------------------------------------------------------
    // Construct
    // ------------------------------------------------------------------------

    /// Builds a new, unsaved entity with a construct operation.
    pub async fn construct(
        &self,
        key: OperationKey,
        source: ConstructSource,
        ctx: &OperationContext,
        args: &OperationArgs,
    ) -> Result<E, OperationError> {
        let operation = self.operation(key)?;

        let Body::Construct(constructor) = &operation.body else {
            return Err(OperationError::IllegalTransition(format!(
                "{key} is not a construct operation"
            )));
        };

        let entity = constructor(source, ctx.clone(), args.clone()).await?;

        if !entity.is_new() {
            return Err(OperationError::Configuration(format!(
                "{key} returned an already saved {}",
                E::TYPE_NAME
            )));
        }
        operation.assert_end_state(&entity)?;
        operation.check_precondition(&entity)?;

        tracing::debug!(
            entity_type = E::TYPE_NAME,
            operation = %key,
            kind = ?operation.kind,
            "Constructed entity"
        );

        Ok(entity)
    }

    /// Kinds of every registered operation keyed by operation.
    pub fn kinds(&self) -> HashMap<OperationKey, OperationKind> {
        self.operations.iter().map(|(k, op)| (*k, op.kind)).collect()
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Entity;
    use crate::operations::core::{Construct, Execute};
    use crate::store::MemoryStore;
    use serde::{Deserialize, Serialize};
    use uuid::Uuid;

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
    enum TicketState {
        Open,
        Closed,
    }

    impl LifecycleState for TicketState {
        const ALL: &'static [Self] = &[TicketState::Open, TicketState::Closed];

        fn is_terminal(&self) -> bool {
            matches!(self, TicketState::Closed)
        }
    }

    #[derive(Clone, Debug, Serialize, Deserialize)]
    struct Ticket {
        id: Option<Uuid>,
        state: TicketState,
        title: String,
        resolution: Option<String>,
    }

    impl Entity for Ticket {
        const TYPE_NAME: &'static str = "Ticket";

        fn id(&self) -> Option<Uuid> {
            self.id
        }

        fn assign_id(&mut self, id: Uuid) {
            self.id = Some(id);
        }

        fn display(&self) -> String {
            self.title.clone()
        }
    }

    impl StatefulEntity for Ticket {
        type State = TicketState;

        fn state(&self) -> TicketState {
            self.state
        }
    }

    const OPEN: OperationKey = OperationKey::new("Ticket.Open");
    const SAVE: OperationKey = OperationKey::new("Ticket.Save");
    const CLOSE: OperationKey = OperationKey::new("Ticket.Close");
    const BROKEN: OperationKey = OperationKey::new("Ticket.Broken");

    fn ticket_graph() -> Graph<Ticket> {
        let mut builder = GraphBuilder::new();
        builder
            .register(
                Construct::new(OPEN)
                    .to_state(TicketState::Open)
                    .construct(|_ctx, args: OperationArgs| async move {
                        args.get::<String>(0).map(|title| Ticket {
                            id: None,
                            state: TicketState::Open,
                            title: title.unwrap_or_default(),
                            resolution: None,
                        })
                    }),
            )
            .unwrap()
            .register(
                Execute::new(SAVE)
                    .from_states([TicketState::Open])
                    .to_state(TicketState::Open)
                    .allows_new()
                    .effect(|_t, _ctx, _args| Ok(())),
            )
            .unwrap()
            .register(
                Execute::new(CLOSE)
                    .from_states([TicketState::Open])
                    .to_state(TicketState::Closed)
                    .can_execute(|t: &Ticket| t.title.is_empty().then(|| "Untitled".to_string()))
                    .effect(|t, _ctx, args| {
                        t.resolution = args.get::<String>(0)?;
                        t.state = TicketState::Closed;
                        Ok(())
                    }),
            )
            .unwrap()
            .register(
                Execute::new(BROKEN)
                    .from_states([TicketState::Open])
                    .to_state(TicketState::Closed)
                    .effect(|_t, _ctx, _args| Ok(())),
            )
            .unwrap();
        builder.build()
    }

    async fn saved_ticket(graph: &Graph<Ticket>, store: &MemoryStore, title: &str) -> Ticket {
        let args = OperationArgs::none().push(serde_json::json!(title));
        let mut ticket = graph
            .construct(OPEN, ConstructSource::None, &OperationContext::system(), &args)
            .await
            .unwrap();
        graph
            .execute(store, &mut ticket, SAVE, &OperationContext::system(), &OperationArgs::none())
            .await
            .unwrap();
        ticket
    }

    #[test]
    fn test_duplicate_registration_is_rejected() {
        let mut builder = GraphBuilder::<Ticket>::new();
        let op = || {
            Execute::new(SAVE)
                .from_states([TicketState::Open])
                .to_state(TicketState::Open)
                .effect(|_t, _ctx, _args| Ok(()))
        };

        builder.register(op()).unwrap();
        let err = builder.register(op()).err().unwrap();
        assert!(matches!(err, OperationError::Configuration(_)));
    }

    #[test]
    fn test_incomplete_descriptor_is_rejected() {
        let mut builder = GraphBuilder::<Ticket>::new();
        let err = builder
            .register(Execute::new(CLOSE).effect(|_t, _ctx, _args| Ok(())))
            .err()
            .unwrap();
        assert!(matches!(err, OperationError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_execute_persists_entity_and_log() {
        let store = MemoryStore::new();
        let graph = ticket_graph();
        let mut ticket = saved_ticket(&graph, &store, "printer on fire").await;

        let args = OperationArgs::none().push(serde_json::json!("extinguished"));
        graph
            .execute(&store, &mut ticket, CLOSE, &OperationContext::system(), &args)
            .await
            .unwrap();

        let stored: Ticket = store.retrieve(ticket.id.unwrap()).await.unwrap().unwrap();
        assert_eq!(stored.state, TicketState::Closed);
        assert_eq!(stored.resolution.as_deref(), Some("extinguished"));

        let logs = store.query::<OperationLog>(&|_| true).await.unwrap();
        assert_eq!(logs.len(), 2);
        assert!(logs.iter().any(|l| l.operation == "Ticket.Close" && l.end_state == "Closed"));
    }

    #[tokio::test]
    async fn test_wrong_state_is_illegal_transition() {
        let store = MemoryStore::new();
        let graph = ticket_graph();
        let mut ticket = saved_ticket(&graph, &store, "t").await;
        let ctx = OperationContext::system();

        graph
            .execute(&store, &mut ticket, CLOSE, &ctx, &OperationArgs::none())
            .await
            .unwrap();
        let err = graph
            .execute(&store, &mut ticket, CLOSE, &ctx, &OperationArgs::none())
            .await
            .err()
            .unwrap();

        assert!(matches!(err, OperationError::IllegalTransition(_)));
        assert!(graph.can_execute(&ticket, CLOSE).is_some());
    }

    #[tokio::test]
    async fn test_new_entity_requires_allows_new() {
        let store = MemoryStore::new();
        let graph = ticket_graph();
        let mut ticket = graph
            .construct(OPEN, ConstructSource::None, &OperationContext::system(), &OperationArgs::none())
            .await
            .unwrap();

        let err = graph
            .execute(&store, &mut ticket, CLOSE, &OperationContext::system(), &OperationArgs::none())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, OperationError::IllegalTransition(_)));
        assert!(ticket.is_new());
    }

    #[tokio::test]
    async fn test_precondition_failure_leaves_entity_untouched() {
        let store = MemoryStore::new();
        let graph = ticket_graph();
        let mut ticket = saved_ticket(&graph, &store, "").await;

        let err = graph
            .execute(&store, &mut ticket, CLOSE, &OperationContext::system(), &OperationArgs::none())
            .await
            .err()
            .unwrap();

        assert!(matches!(err, OperationError::PreconditionFailed(ref r) if r == "Untitled"));
        assert_eq!(ticket.state, TicketState::Open);
        assert_eq!(graph.can_execute(&ticket, CLOSE).as_deref(), Some("Untitled"));
    }

    #[tokio::test]
    async fn test_effect_missing_target_state_is_configuration_error() {
        let store = MemoryStore::new();
        let graph = ticket_graph();
        let mut ticket = saved_ticket(&graph, &store, "t").await;

        let err = graph
            .execute(&store, &mut ticket, BROKEN, &OperationContext::system(), &OperationArgs::none())
            .await
            .err()
            .unwrap();

        assert!(matches!(err, OperationError::Configuration(_)));
        assert!(!err.is_line_local());
    }

    #[tokio::test]
    async fn test_construct_cannot_be_executed() {
        let store = MemoryStore::new();
        let graph = ticket_graph();
        let mut ticket = saved_ticket(&graph, &store, "t").await;

        let err = graph
            .execute(&store, &mut ticket, OPEN, &OperationContext::system(), &OperationArgs::none())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, OperationError::IllegalTransition(_)));
    }

    #[tokio::test]
    async fn test_unknown_operation() {
        let graph = ticket_graph();
        let err = graph
            .construct(
                OperationKey::new("Ticket.Missing"),
                ConstructSource::None,
                &OperationContext::system(),
                &OperationArgs::none(),
            )
            .await
            .err()
            .unwrap();
        assert!(matches!(err, OperationError::NotRegistered { .. }));
    }

    #[test]
    fn test_every_open_state_has_an_exit() {
        assert!(ticket_graph().states_without_exit().is_empty());
        assert_eq!(ticket_graph().kinds().get(&OPEN), Some(&OperationKind::Construct));
    }
}
