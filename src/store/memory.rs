use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};
use uuid::Uuid;

use super::entity_store::{EntityStore, Predicate, Setter, StoreError, Transaction};
use crate::entity::Entity;

// ============================================================================
// In-Memory Entity Store
// ============================================================================
//
// Reference implementation of `EntityStore`:
// - rows are kept as JSON per entity type, ordered by id
// - a transaction owns the write lock for its whole lifetime, which gives
//   serializable isolation (one writer at a time, readers wait)
// - every write records the row's before-image; dropping an uncommitted
//   transaction replays them in reverse
// - faults can be injected to simulate an unreachable store
//
// ============================================================================

type Table = BTreeMap<Uuid, Value>;

#[derive(Default)]
struct Tables {
    rows: HashMap<&'static str, Table>,
}

impl Tables {
    fn table(&self, entity_type: &'static str) -> Option<&Table> {
        self.rows.get(entity_type)
    }

    fn table_mut(&mut self, entity_type: &'static str) -> &mut Table {
        self.rows.entry(entity_type).or_default()
    }
}

#[derive(Default)]
struct Faults {
    unavailable: AtomicBool,
    /// Number of transactions still allowed before the store goes down.
    begins_before_outage: Mutex<Option<usize>>,
}

impl Faults {
    fn check(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection refused".to_string()));
        }
        Ok(())
    }

    fn check_begin(&self) -> Result<(), StoreError> {
        self.check()?;

        let mut remaining = self
            .begins_before_outage
            .lock()
            .map_err(|_| StoreError::Transaction("fault state poisoned".to_string()))?;

        match *remaining {
            Some(0) => {
                self.unavailable.store(true, Ordering::SeqCst);
                *remaining = None;
                Err(StoreError::Unavailable("connection lost".to_string()))
            }
            Some(n) => {
                *remaining = Some(n - 1);
                Ok(())
            }
            None => Ok(()),
        }
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
    faults: Arc<Faults>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail with `StoreError::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.faults.unavailable.store(unavailable, Ordering::SeqCst);
        if !unavailable {
            if let Ok(mut remaining) = self.faults.begins_before_outage.lock() {
                *remaining = None;
            }
        }
    }

    /// Lets `begins` more transactions start, then goes unavailable.
    pub fn fail_after_begins(&self, begins: usize) {
        if let Ok(mut remaining) = self.faults.begins_before_outage.lock() {
            *remaining = Some(begins);
        }
    }

    pub async fn count<E: Entity>(&self) -> Result<usize, StoreError> {
        self.faults.check()?;
        let tables = self.tables.read().await;
        Ok(tables.table(E::TYPE_NAME).map_or(0, |t| t.len()))
    }
}

fn decode<E: Entity>(value: &Value) -> Result<E, StoreError> {
    serde_json::from_value(value.clone()).map_err(|source| StoreError::Serialization {
        entity_type: E::TYPE_NAME,
        source,
    })
}

fn encode<E: Entity>(entity: &E) -> Result<Value, StoreError> {
    serde_json::to_value(entity).map_err(|source| StoreError::Serialization {
        entity_type: E::TYPE_NAME,
        source,
    })
}

fn select<E: Entity>(tables: &Tables, predicate: Predicate<'_, E>) -> Result<Vec<E>, StoreError> {
    let Some(table) = tables.table(E::TYPE_NAME) else {
        return Ok(Vec::new());
    };

    let mut rows = Vec::new();
    for value in table.values() {
        let entity: E = decode(value)?;
        if predicate(&entity) {
            rows.push(entity);
        }
    }
    Ok(rows)
}

#[async_trait]
impl EntityStore for MemoryStore {
    type Tx = MemoryTransaction;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        self.faults.check_begin()?;
        let tables = self.tables.clone().write_owned().await;

        Ok(MemoryTransaction {
            tables,
            undo: Vec::new(),
            committed: false,
            faults: self.faults.clone(),
        })
    }

    async fn retrieve<E: Entity>(&self, id: Uuid) -> Result<Option<E>, StoreError> {
        self.faults.check()?;
        let tables = self.tables.read().await;
        tables
            .table(E::TYPE_NAME)
            .and_then(|t| t.get(&id))
            .map(decode::<E>)
            .transpose()
    }

    async fn query<E: Entity>(&self, predicate: Predicate<'_, E>) -> Result<Vec<E>, StoreError> {
        self.faults.check()?;
        let tables = self.tables.read().await;
        select(&tables, predicate)
    }
}

// ============================================================================
// Transaction
// ============================================================================

struct BeforeImage {
    entity_type: &'static str,
    id: Uuid,
    value: Option<Value>,
}

pub struct MemoryTransaction {
    tables: OwnedRwLockWriteGuard<Tables>,
    undo: Vec<BeforeImage>,
    committed: bool,
    faults: Arc<Faults>,
}

impl MemoryTransaction {
    fn write(&mut self, entity_type: &'static str, id: Uuid, value: Value) {
        let before = self.tables.table_mut(entity_type).insert(id, value);
        self.undo.push(BeforeImage {
            entity_type,
            id,
            value: before,
        });
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn retrieve<E: Entity>(&mut self, id: Uuid) -> Result<Option<E>, StoreError> {
        self.faults.check()?;
        self.tables
            .table(E::TYPE_NAME)
            .and_then(|t| t.get(&id))
            .map(decode::<E>)
            .transpose()
    }

    async fn query<E: Entity>(&mut self, predicate: Predicate<'_, E>) -> Result<Vec<E>, StoreError> {
        self.faults.check()?;
        select(&self.tables, predicate)
    }

    async fn save<E: Entity>(&mut self, entity: &mut E) -> Result<(), StoreError> {
        self.faults.check()?;

        let id = match entity.id() {
            Some(id) => id,
            None => {
                let id = Uuid::now_v7();
                entity.assign_id(id);
                id
            }
        };

        let value = encode(&*entity)?;
        self.write(E::TYPE_NAME, id, value);
        Ok(())
    }

    async fn update_where<E: Entity>(
        &mut self,
        predicate: Predicate<'_, E>,
        setter: Setter<'_, E>,
    ) -> Result<u64, StoreError> {
        self.faults.check()?;

        let mut updated = Vec::new();
        if let Some(table) = self.tables.table(E::TYPE_NAME) {
            for (id, value) in table {
                let mut entity: E = decode(value)?;
                if predicate(&entity) {
                    setter(&mut entity);
                    updated.push((*id, encode(&entity)?));
                }
            }
        }

        let affected = updated.len() as u64;
        for (id, value) in updated {
            self.write(E::TYPE_NAME, id, value);
        }
        Ok(affected)
    }

    async fn commit(self) -> Result<(), StoreError> {
        let mut tx = self;
        tx.faults.check()?;
        tx.committed = true;

        tracing::trace!(writes = tx.undo.len(), "Committed transaction");
        Ok(())
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        if self.committed || self.undo.is_empty() {
            return;
        }

        let undo = std::mem::take(&mut self.undo);
        let writes = undo.len();
        for image in undo.into_iter().rev() {
            let table = self.tables.table_mut(image.entity_type);
            match image.value {
                Some(value) => {
                    table.insert(image.id, value);
                }
                None => {
                    table.remove(&image.id);
                }
            }
        }

        tracing::debug!(writes, "Rolled back transaction");
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
