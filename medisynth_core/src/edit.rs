//! Transactional relationship edits.
//!
//! Every change to a patient↔resource or patient↔staff relationship is
//! expressed as a [`RelationshipEdit`]: an ordered list of single-document
//! deltas that is applied as a unit. If any step is refused, the steps
//! already applied are compensated in reverse order, so the back-reference
//! invariant is maintained in exactly one place.

use crate::store::{Delta, RecordStore, RefField};
use crate::{EntityKind, Error, Result};

#[derive(Clone, Debug, PartialEq)]
struct Step {
    kind: EntityKind,
    key: String,
    delta: Delta,
}

/// An ordered set of deltas applied all-or-nothing
#[derive(Clone, Debug, PartialEq)]
pub struct RelationshipEdit {
    label: String,
    steps: Vec<Step>,
}

impl RelationshipEdit {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            steps: Vec::new(),
        }
    }

    /// Take one unit of the resource and record the allocation on both sides
    pub fn allocate(patient_id: &str, resource_id: &str) -> Self {
        Self::new(format!("allocate {} -> {}", resource_id, patient_id))
            .step(EntityKind::Resource, resource_id, Delta::AdjustAvailable(-1))
            .step(
                EntityKind::Resource,
                resource_id,
                Delta::Push(RefField::AllocatedPatients, patient_id.to_string()),
            )
            .step(
                EntityKind::Patient,
                patient_id,
                Delta::Push(RefField::ResourcesAllocated, resource_id.to_string()),
            )
    }

    /// Return one unit of the resource and drop both references
    pub fn deallocate(patient_id: &str, resource_id: &str) -> Self {
        Self::new(format!("deallocate {} -> {}", resource_id, patient_id))
            .step(EntityKind::Resource, resource_id, Delta::AdjustAvailable(1))
            .step(
                EntityKind::Resource,
                resource_id,
                Delta::Pull(RefField::AllocatedPatients, patient_id.to_string()),
            )
            .step(
                EntityKind::Patient,
                patient_id,
                Delta::Pull(RefField::ResourcesAllocated, resource_id.to_string()),
            )
    }

    pub fn assign(patient_id: &str, staff_id: &str) -> Self {
        Self::new(format!("assign {} -> {}", staff_id, patient_id))
            .step(
                EntityKind::Staff,
                staff_id,
                Delta::Push(RefField::PatientsAssigned, patient_id.to_string()),
            )
            .step(
                EntityKind::Patient,
                patient_id,
                Delta::Push(RefField::StaffsAssigned, staff_id.to_string()),
            )
    }

    pub fn unassign(patient_id: &str, staff_id: &str) -> Self {
        Self::new(format!("unassign {} -> {}", staff_id, patient_id))
            .step(
                EntityKind::Staff,
                staff_id,
                Delta::Pull(RefField::PatientsAssigned, patient_id.to_string()),
            )
            .step(
                EntityKind::Patient,
                patient_id,
                Delta::Pull(RefField::StaffsAssigned, staff_id.to_string()),
            )
    }

    /// Append a step
    pub fn step(mut self, kind: EntityKind, key: &str, delta: Delta) -> Self {
        self.steps.push(Step {
            kind,
            key: key.to_string(),
            delta,
        });
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Apply every step, or none of them.
    ///
    /// The caller must hold the store lock (and any in-process gate) for the
    /// whole call. On failure the original error is returned after rollback;
    /// if rollback itself fails the records are left inconsistent and
    /// `InconsistentState` is returned instead.
    pub fn commit<S: RecordStore + ?Sized>(self, store: &S) -> Result<()> {
        let mut undo: Vec<Step> = Vec::with_capacity(self.steps.len());

        for step in &self.steps {
            match store.update_one(step.kind, &step.key, &step.delta) {
                Ok(before) => undo.push(Step {
                    kind: step.kind,
                    key: step.key.clone(),
                    delta: step.delta.inverse(&before),
                }),
                Err(e) => {
                    tracing::warn!(
                        "Edit '{}' failed at {} {}: {}; rolling back {} step(s)",
                        self.label,
                        step.kind,
                        step.key,
                        e,
                        undo.len()
                    );
                    return match rollback(store, undo) {
                        Ok(()) => Err(e),
                        Err(rollback_err) => {
                            tracing::error!(
                                "Rollback of '{}' failed: {}",
                                self.label,
                                rollback_err
                            );
                            Err(Error::InconsistentState(format!(
                                "edit '{}' partially applied ({}); rollback failed: {}",
                                self.label, e, rollback_err
                            )))
                        }
                    };
                }
            }
        }

        tracing::debug!("Committed edit '{}' ({} steps)", self.label, self.steps.len());
        Ok(())
    }
}

fn rollback<S: RecordStore + ?Sized>(store: &S, undo: Vec<Step>) -> Result<()> {
    for step in undo.into_iter().rev() {
        store.update_one(step.kind, &step.key, &step.delta)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::test_support::FaultyStore;
    use crate::{Entity, Patient, Resource};

    fn seeded() -> FaultyStore {
        let store = FaultyStore::new(MemoryStore::new());
        store.insert_one(Entity::Patient(Patient::new("p1"))).unwrap();
        store
            .insert_one(Entity::Resource(Resource::new("r1", "Monitor", 1)))
            .unwrap();
        store
    }

    fn resource(store: &FaultyStore) -> Resource {
        store
            .find_one(EntityKind::Resource, "r1")
            .unwrap()
            .and_then(Entity::into_resource)
            .unwrap()
    }

    fn patient(store: &FaultyStore) -> Patient {
        store
            .find_one(EntityKind::Patient, "p1")
            .unwrap()
            .and_then(Entity::into_patient)
            .unwrap()
    }

    #[test]
    fn test_allocate_edit_touches_both_sides() {
        let store = seeded();
        let edit = RelationshipEdit::allocate("p1", "r1");
        assert_eq!(edit.len(), 3);
        edit.commit(&store).unwrap();

        assert_eq!(resource(&store).available, 0);
        assert!(resource(&store).allocated_patients.contains("p1"));
        assert!(patient(&store).resources_allocated.contains("r1"));
    }

    #[test]
    fn test_failed_step_rolls_back_earlier_steps() {
        let store = seeded();
        store.fail_updates(EntityKind::Patient, "p1", 0);

        let err = RelationshipEdit::allocate("p1", "r1").commit(&store).unwrap_err();
        assert!(matches!(err, Error::Store(_)));

        let r = resource(&store);
        assert_eq!(r.available, 1);
        assert!(r.allocated_patients.is_empty());
        assert!(patient(&store).resources_allocated.is_empty());
    }

    #[test]
    fn test_failed_rollback_reports_inconsistent_state() {
        let store = seeded();
        // The resource accepts the two forward steps, then refuses the undo
        store.fail_updates(EntityKind::Resource, "r1", 2);
        store.fail_updates(EntityKind::Patient, "p1", 0);

        let err = RelationshipEdit::allocate("p1", "r1").commit(&store).unwrap_err();
        assert!(matches!(err, Error::InconsistentState(_)));
    }

    #[test]
    fn test_unassign_of_missing_reference_changes_nothing() {
        let store = seeded();
        store
            .insert_one(Entity::Staff(crate::StaffUser::new("s1", "Nurse Kim")))
            .unwrap();

        assert!(RelationshipEdit::unassign("p1", "s1").commit(&store).is_err());
        assert!(patient(&store).staffs_assigned.is_empty());
    }
}
