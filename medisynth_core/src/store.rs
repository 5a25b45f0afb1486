//! Record store abstraction and the in-memory implementation.
//!
//! A store holds patients, resources and staff keyed by id. Each operation
//! is atomic on its own document; composing several documents into one
//! logical edit is the ledger's job (see [`crate::edit`]).

use crate::{Entity, EntityKind, Error, Patient, Resource, Result, StaffUser};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::sync::RwLock;

/// Relationship fields that hold back-references
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RefField {
    /// `Patient::resources_allocated`
    ResourcesAllocated,
    /// `Patient::staffs_assigned`
    StaffsAssigned,
    /// `Resource::allocated_patients`
    AllocatedPatients,
    /// `StaffUser::patients_assigned`
    PatientsAssigned,
}

impl RefField {
    /// The collection this field lives in
    pub fn owner(self) -> EntityKind {
        match self {
            RefField::ResourcesAllocated | RefField::StaffsAssigned => EntityKind::Patient,
            RefField::AllocatedPatients => EntityKind::Resource,
            RefField::PatientsAssigned => EntityKind::Staff,
        }
    }
}

/// A single-document field update
#[derive(Clone, Debug, PartialEq)]
pub enum Delta {
    /// Add an id to a reference set; the id must be absent
    Push(RefField, String),
    /// Remove an id from a reference set; the id must be present
    Pull(RefField, String),
    /// Add to `Resource::available`, staying within `[0, total]`
    AdjustAvailable(i64),
    /// Overwrite the whole document, keeping its id
    Replace(Entity),
}

impl Delta {
    /// Delta that undoes this one, given the document before it was applied.
    pub fn inverse(&self, before: &Entity) -> Delta {
        match self {
            Delta::Push(field, id) => Delta::Pull(*field, id.clone()),
            Delta::Pull(field, id) => Delta::Push(*field, id.clone()),
            Delta::AdjustAvailable(n) => Delta::AdjustAvailable(-n),
            Delta::Replace(_) => Delta::Replace(before.clone()),
        }
    }
}

/// Cross-process guard held for the duration of a multi-document edit.
///
/// Dropping the guard releases the lock.
#[derive(Debug)]
pub struct StoreLock {
    _file: Option<File>,
}

impl StoreLock {
    /// A guard that holds nothing (in-process stores)
    pub fn none() -> Self {
        Self { _file: None }
    }

    /// A guard backed by a locked file; closing the file releases the lock
    pub fn file(file: File) -> Self {
        Self { _file: Some(file) }
    }
}

/// Persistent storage for the three record collections
pub trait RecordStore {
    fn find_one(&self, kind: EntityKind, key: &str) -> Result<Option<Entity>>;

    /// All records of a kind, ordered by id
    fn list(&self, kind: EntityKind) -> Result<Vec<Entity>>;

    /// Insert a new record; fails with `AlreadyExists` on a duplicate id
    fn insert_one(&self, entity: Entity) -> Result<()>;

    /// Apply a delta to one record and return the record as it was before
    fn update_one(&self, kind: EntityKind, key: &str, delta: &Delta) -> Result<Entity>;

    /// Remove a record, returning it
    fn delete_one(&self, kind: EntityKind, key: &str) -> Result<Entity>;

    /// Serialize multi-document edits against other writers
    fn lock(&self) -> Result<StoreLock>;
}

// ============================================================================
// Collections
// ============================================================================

/// The full set of records; shared by every store implementation
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Collections {
    #[serde(default)]
    pub patients: BTreeMap<String, Patient>,
    #[serde(default)]
    pub resources: BTreeMap<String, Resource>,
    #[serde(default)]
    pub staff: BTreeMap<String, StaffUser>,
}

impl Collections {
    pub fn find(&self, kind: EntityKind, key: &str) -> Option<Entity> {
        match kind {
            EntityKind::Patient => self.patients.get(key).cloned().map(Entity::Patient),
            EntityKind::Resource => self.resources.get(key).cloned().map(Entity::Resource),
            EntityKind::Staff => self.staff.get(key).cloned().map(Entity::Staff),
        }
    }

    pub fn list(&self, kind: EntityKind) -> Vec<Entity> {
        match kind {
            EntityKind::Patient => self.patients.values().cloned().map(Entity::Patient).collect(),
            EntityKind::Resource => self.resources.values().cloned().map(Entity::Resource).collect(),
            EntityKind::Staff => self.staff.values().cloned().map(Entity::Staff).collect(),
        }
    }

    pub fn insert(&mut self, entity: Entity) -> Result<()> {
        let kind = entity.kind();
        let id = entity.id().to_string();
        if self.find(kind, &id).is_some() {
            return Err(Error::AlreadyExists { kind, id });
        }
        match entity {
            Entity::Patient(p) => {
                self.patients.insert(id, p);
            }
            Entity::Resource(r) => {
                self.resources.insert(id, r);
            }
            Entity::Staff(s) => {
                self.staff.insert(id, s);
            }
        }
        Ok(())
    }

    pub fn remove(&mut self, kind: EntityKind, key: &str) -> Result<Entity> {
        let removed = match kind {
            EntityKind::Patient => self.patients.remove(key).map(Entity::Patient),
            EntityKind::Resource => self.resources.remove(key).map(Entity::Resource),
            EntityKind::Staff => self.staff.remove(key).map(Entity::Staff),
        };
        removed.ok_or_else(|| Error::not_found(kind, key))
    }

    /// Apply a delta in place. The record is untouched when the delta is rejected.
    pub fn apply(&mut self, kind: EntityKind, key: &str, delta: &Delta) -> Result<Entity> {
        let before = self
            .find(kind, key)
            .ok_or_else(|| Error::not_found(kind, key))?;

        match delta {
            Delta::Push(field, id) => {
                let set = self.ref_set(kind, key, *field)?;
                if !set.insert(id.clone()) {
                    return Err(Error::Store(format!(
                        "{:?} of {} {} already contains {}",
                        field, kind, key, id
                    )));
                }
            }
            Delta::Pull(field, id) => {
                let set = self.ref_set(kind, key, *field)?;
                if !set.remove(id) {
                    return Err(Error::Store(format!(
                        "{:?} of {} {} does not contain {}",
                        field, kind, key, id
                    )));
                }
            }
            Delta::AdjustAvailable(n) => {
                let resource = match kind {
                    EntityKind::Resource => self.resources.get_mut(key),
                    _ => None,
                }
                .ok_or_else(|| {
                    Error::Store(format!("available is not a field of {} {}", kind, key))
                })?;
                let next = i64::from(resource.available) + n;
                if next < 0 || next > i64::from(resource.total) {
                    return Err(Error::Store(format!(
                        "available of resource {} would become {} (total {})",
                        key, next, resource.total
                    )));
                }
                resource.available = next as u32;
            }
            Delta::Replace(entity) => {
                if entity.kind() != kind || entity.id() != key {
                    return Err(Error::Store(format!(
                        "cannot replace {} {} with {} {}",
                        kind,
                        key,
                        entity.kind(),
                        entity.id()
                    )));
                }
                match entity.clone() {
                    Entity::Patient(p) => {
                        self.patients.insert(key.to_string(), p);
                    }
                    Entity::Resource(r) => {
                        self.resources.insert(key.to_string(), r);
                    }
                    Entity::Staff(s) => {
                        self.staff.insert(key.to_string(), s);
                    }
                }
            }
        }

        Ok(before)
    }

    fn ref_set(
        &mut self,
        kind: EntityKind,
        key: &str,
        field: RefField,
    ) -> Result<&mut BTreeSet<String>> {
        if field.owner() != kind {
            return Err(Error::Store(format!("{:?} is not a field of {}", field, kind)));
        }
        let set = match field {
            RefField::ResourcesAllocated => {
                self.patients.get_mut(key).map(|p| &mut p.resources_allocated)
            }
            RefField::StaffsAssigned => self.patients.get_mut(key).map(|p| &mut p.staffs_assigned),
            RefField::AllocatedPatients => {
                self.resources.get_mut(key).map(|r| &mut r.allocated_patients)
            }
            RefField::PatientsAssigned => self.staff.get_mut(key).map(|s| &mut s.patients_assigned),
        };
        set.ok_or_else(|| Error::not_found(kind, key))
    }
}

// ============================================================================
// In-memory Store
// ============================================================================

/// Store backed by in-process maps
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<Collections>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned() -> Error {
        Error::Store("memory store lock poisoned".into())
    }
}

impl RecordStore for MemoryStore {
    fn find_one(&self, kind: EntityKind, key: &str) -> Result<Option<Entity>> {
        let records = self.records.read().map_err(|_| Self::poisoned())?;
        Ok(records.find(kind, key))
    }

    fn list(&self, kind: EntityKind) -> Result<Vec<Entity>> {
        let records = self.records.read().map_err(|_| Self::poisoned())?;
        Ok(records.list(kind))
    }

    fn insert_one(&self, entity: Entity) -> Result<()> {
        let mut records = self.records.write().map_err(|_| Self::poisoned())?;
        records.insert(entity)
    }

    fn update_one(&self, kind: EntityKind, key: &str, delta: &Delta) -> Result<Entity> {
        let mut records = self.records.write().map_err(|_| Self::poisoned())?;
        records.apply(kind, key, delta)
    }

    fn delete_one(&self, kind: EntityKind, key: &str) -> Result<Entity> {
        let mut records = self.records.write().map_err(|_| Self::poisoned())?;
        records.remove(kind, key)
    }

    fn lock(&self) -> Result<StoreLock> {
        Ok(StoreLock::none())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        store.insert_one(Entity::Patient(Patient::new("p1"))).unwrap();
        store
            .insert_one(Entity::Resource(Resource::new("r1", "Ventilator", 2)))
            .unwrap();
        store
    }

    #[test]
    fn test_insert_rejects_duplicate() {
        let store = seeded();
        let err = store
            .insert_one(Entity::Patient(Patient::new("p1")))
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyExists { kind: EntityKind::Patient, .. }));
    }

    #[test]
    fn test_push_and_pull_reference() {
        let store = seeded();
        store
            .update_one(
                EntityKind::Patient,
                "p1",
                &Delta::Push(RefField::ResourcesAllocated, "r1".into()),
            )
            .unwrap();

        let patient = store
            .find_one(EntityKind::Patient, "p1")
            .unwrap()
            .and_then(Entity::into_patient)
            .unwrap();
        assert!(patient.resources_allocated.contains("r1"));

        // Pushing twice is rejected and leaves the set unchanged
        let err = store
            .update_one(
                EntityKind::Patient,
                "p1",
                &Delta::Push(RefField::ResourcesAllocated, "r1".into()),
            )
            .unwrap_err();
        assert!(matches!(err, Error::Store(_)));

        store
            .update_one(
                EntityKind::Patient,
                "p1",
                &Delta::Pull(RefField::ResourcesAllocated, "r1".into()),
            )
            .unwrap();
        let err = store
            .update_one(
                EntityKind::Patient,
                "p1",
                &Delta::Pull(RefField::ResourcesAllocated, "r1".into()),
            )
            .unwrap_err();
        assert!(matches!(err, Error::Store(_)));
    }

    #[test]
    fn test_field_must_belong_to_kind() {
        let store = seeded();
        let err = store
            .update_one(
                EntityKind::Resource,
                "r1",
                &Delta::Push(RefField::StaffsAssigned, "s1".into()),
            )
            .unwrap_err();
        assert!(matches!(err, Error::Store(_)));
    }

    #[test]
    fn test_available_stays_within_bounds() {
        let store = seeded();
        assert!(store
            .update_one(EntityKind::Resource, "r1", &Delta::AdjustAvailable(1))
            .is_err());
        store
            .update_one(EntityKind::Resource, "r1", &Delta::AdjustAvailable(-2))
            .unwrap();
        assert!(store
            .update_one(EntityKind::Resource, "r1", &Delta::AdjustAvailable(-1))
            .is_err());
    }

    #[test]
    fn test_inverse_restores_document() {
        let store = seeded();
        let delta = Delta::AdjustAvailable(-1);
        let before = store.update_one(EntityKind::Resource, "r1", &delta).unwrap();
        store
            .update_one(EntityKind::Resource, "r1", &delta.inverse(&before))
            .unwrap();
        assert_eq!(store.find_one(EntityKind::Resource, "r1").unwrap(), Some(before));
    }

    #[test]
    fn test_update_missing_record_is_not_found() {
        let store = seeded();
        let err = store
            .update_one(EntityKind::Staff, "nobody", &Delta::AdjustAvailable(1))
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { kind: EntityKind::Staff, .. }));
    }

    #[test]
    fn test_delete_returns_record() {
        let store = seeded();
        let removed = store.delete_one(EntityKind::Patient, "p1").unwrap();
        assert_eq!(removed.id(), "p1");
        assert!(store.find_one(EntityKind::Patient, "p1").unwrap().is_none());
    }
}
