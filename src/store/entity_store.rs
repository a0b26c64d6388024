use async_trait::async_trait;
use uuid::Uuid;

use crate::entity::Entity;
use crate::utils::IsTransient;

// ============================================================================
// Entity Store - Persistence Port
// ============================================================================
//
// The narrow interface the core consumes from the persistence layer:
// typed queries, saves, scoped transactions and the conditional bulk update
// (`update_where`), which is the only race-free primitive the core relies on.
//
// Dropping a transaction without committing rolls it back.
//
// ============================================================================

/// Row filter evaluated against a typed entity.
pub type Predicate<'a, E> = &'a (dyn Fn(&E) -> bool + Send + Sync);

/// In-place row mutation applied by `update_where`.
pub type Setter<'a, E> = &'a (dyn Fn(&mut E) + Send + Sync);

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Entity store unavailable: {0}")]
    Unavailable(String),

    #[error("Transaction failed: {0}")]
    Transaction(String),

    #[error("Failed to (de)serialize {entity_type}: {source}")]
    Serialization {
        entity_type: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl IsTransient for StoreError {
    fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

#[async_trait]
pub trait Transaction: Send + 'static {
    async fn retrieve<E: Entity>(&mut self, id: Uuid) -> Result<Option<E>, StoreError>;

    async fn query<E: Entity>(&mut self, predicate: Predicate<'_, E>) -> Result<Vec<E>, StoreError>;

    /// Insert or update. New entities get their id assigned here.
    async fn save<E: Entity>(&mut self, entity: &mut E) -> Result<(), StoreError>;

    /// Applies `setter` to every row matching `predicate`; returns the
    /// number of affected rows. Check and write are atomic per row.
    async fn update_where<E: Entity>(
        &mut self,
        predicate: Predicate<'_, E>,
        setter: Setter<'_, E>,
    ) -> Result<u64, StoreError>;

    async fn commit(self) -> Result<(), StoreError>;
}

#[async_trait]
pub trait EntityStore: Send + Sync + 'static {
    type Tx: Transaction;

    async fn begin(&self) -> Result<Self::Tx, StoreError>;

    async fn retrieve<E: Entity>(&self, id: Uuid) -> Result<Option<E>, StoreError>;

    /// Snapshot of the rows matching `predicate` at call time.
    async fn query<E: Entity>(&self, predicate: Predicate<'_, E>) -> Result<Vec<E>, StoreError>;

    async fn save<E: Entity>(&self, entity: &mut E) -> Result<(), StoreError> {
        let mut tx = self.begin().await?;
        tx.save(entity).await?;
        tx.commit().await
    }

    /// Auto-committed `Transaction::update_where`.
    async fn update_where<E: Entity>(
        &self,
        predicate: Predicate<'_, E>,
        setter: Setter<'_, E>,
    ) -> Result<u64, StoreError> {
        let mut tx = self.begin().await?;
        let affected = tx.update_where(predicate, setter).await?;
        tx.commit().await?;
        Ok(affected)
    }
}
