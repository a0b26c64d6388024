use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use std::hash::Hash;
use uuid::Uuid;

// ============================================================================
// Entity Abstractions
// ============================================================================
//
// Everything the store persists implements `Entity`. Entities that own a
// lifecycle (Order, Process) additionally implement `StatefulEntity`, which
// is what the operation graph works against.
//
// Rows are persisted as JSON, so entities must be serde round-trippable.
//
// ============================================================================

mod lite;

pub use lite::{AnyLite, Lite};

/// A persistable entity with an identity assigned on first save.
pub trait Entity: Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Stable type name, used as the store table and in references.
    const TYPE_NAME: &'static str;

    fn id(&self) -> Option<Uuid>;

    /// Called by the store exactly once, on first save.
    fn assign_id(&mut self, id: Uuid);

    /// Human readable label carried by references to this entity.
    fn display(&self) -> String;

    fn is_new(&self) -> bool {
        self.id().is_none()
    }

    /// Reference to a saved entity; `None` while the entity is new.
    fn to_lite(&self) -> Option<Lite<Self>> {
        self.id().map(|id| Lite::new(id, self.display()))
    }
}

/// The closed set of states an entity moves through.
pub trait LifecycleState: Copy + Eq + Hash + Debug + Send + Sync + 'static {
    const ALL: &'static [Self];

    /// Terminal states are allowed to have no outgoing operation.
    fn is_terminal(&self) -> bool {
        false
    }
}

/// An entity whose state is driven by registered operations.
pub trait StatefulEntity: Entity {
    type State: LifecycleState;

    fn state(&self) -> Self::State;
}
