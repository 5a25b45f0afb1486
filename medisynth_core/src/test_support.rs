//! Fault injection for store-level tests.

use crate::store::{Delta, MemoryStore, RecordStore, StoreLock};
use crate::{Entity, EntityKind, Error, Result};
use std::collections::HashMap;
use std::sync::Mutex;

/// Wraps a [`MemoryStore`] and refuses updates on chosen documents
pub struct FaultyStore {
    inner: MemoryStore,
    // (kind, key) -> successful updates still allowed
    budgets: Mutex<HashMap<(EntityKind, String), usize>>,
}

impl FaultyStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            budgets: Mutex::new(HashMap::new()),
        }
    }

    /// Let `after` more updates on the document succeed, then fail every one
    pub fn fail_updates(&self, kind: EntityKind, key: &str, after: usize) {
        self.budgets
            .lock()
            .unwrap()
            .insert((kind, key.to_string()), after);
    }

    pub fn heal(&self) {
        self.budgets.lock().unwrap().clear();
    }
}

impl RecordStore for FaultyStore {
    fn find_one(&self, kind: EntityKind, key: &str) -> Result<Option<Entity>> {
        self.inner.find_one(kind, key)
    }

    fn list(&self, kind: EntityKind) -> Result<Vec<Entity>> {
        self.inner.list(kind)
    }

    fn insert_one(&self, entity: Entity) -> Result<()> {
        self.inner.insert_one(entity)
    }

    fn update_one(&self, kind: EntityKind, key: &str, delta: &Delta) -> Result<Entity> {
        if let Some(budget) = self.budgets.lock().unwrap().get_mut(&(kind, key.to_string())) {
            if *budget == 0 {
                return Err(Error::Store(format!("injected failure on {} {}", kind, key)));
            }
            *budget -= 1;
        }
        self.inner.update_one(kind, key, delta)
    }

    fn delete_one(&self, kind: EntityKind, key: &str) -> Result<Entity> {
        self.inner.delete_one(kind, key)
    }

    fn lock(&self) -> Result<StoreLock> {
        self.inner.lock()
    }
}
