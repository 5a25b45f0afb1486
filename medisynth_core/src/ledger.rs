//! Allocation ledger.
//!
//! Owns the many-to-many relationships between patients and resources and
//! between patients and staff, together with resource capacity accounting.
//! For every resource `r` and patient `p`:
//! - `r.available + |r.allocated_patients| == r.total`
//! - `r ∈ p.resources_allocated ⟺ p ∈ r.allocated_patients`
//! - the same biconditional holds for staff assignments
//!
//! All operations hold an in-process gate plus the store's lock, so a
//! reader going through the ledger never observes a half-applied edit.

use crate::edit::RelationshipEdit;
use crate::store::{RecordStore, StoreLock};
use crate::{Entity, EntityKind, Error, Patient, Resource, Result, StaffUser};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard};

/// Held for the duration of a ledger operation
pub(crate) struct Guard<'a> {
    _store: StoreLock,
    _gate: MutexGuard<'a, ()>,
}

/// A cascade step skipped during patient removal
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SkippedRef {
    pub kind: EntityKind,
    pub id: String,
    pub reason: String,
}

/// Outcome of [`Ledger::remove_patient`]
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RemovalReport {
    pub patient_id: String,
    pub deallocated: Vec<String>,
    pub unassigned: Vec<String>,
    pub skipped: Vec<SkippedRef>,
}

/// Patient/resource/staff bookkeeping over an injected record store
pub struct Ledger<S> {
    store: S,
    gate: Mutex<()>,
}

impl<S: RecordStore> Ledger<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            gate: Mutex::new(()),
        }
    }

    /// The underlying store. Writes made directly bypass the ledger's checks.
    pub fn store(&self) -> &S {
        &self.store
    }

    pub(crate) fn guard(&self) -> Result<Guard<'_>> {
        let gate = self
            .gate
            .lock()
            .map_err(|_| Error::Store("ledger gate poisoned".into()))?;
        let store = self.store.lock()?;
        Ok(Guard {
            _store: store,
            _gate: gate,
        })
    }

    // ========================================================================
    // Records
    // ========================================================================

    /// Register a new patient with no allocations or assignments
    pub fn create_patient(&self, patient: Patient) -> Result<()> {
        if patient.id.trim().is_empty() {
            return Err(Error::InvalidRecord("patient id is empty".into()));
        }
        if !patient.resources_allocated.is_empty() || !patient.staffs_assigned.is_empty() {
            return Err(Error::InvalidRecord(format!(
                "new patient {} must not carry allocations or assignments",
                patient.id
            )));
        }

        let _guard = self.guard()?;
        let id = patient.id.clone();
        self.store.insert_one(Entity::Patient(patient))?;
        tracing::info!("Created patient {}", id);
        Ok(())
    }

    /// Register a new resource; every unit must be free
    pub fn create_resource(&self, resource: Resource) -> Result<()> {
        if resource.id.trim().is_empty() {
            return Err(Error::InvalidRecord("resource id is empty".into()));
        }
        if !resource.allocated_patients.is_empty() || resource.available != resource.total {
            return Err(Error::InvalidRecord(format!(
                "new resource {} must have available == total ({} != {}) and no allocations",
                resource.id, resource.available, resource.total
            )));
        }

        let _guard = self.guard()?;
        let id = resource.id.clone();
        self.store.insert_one(Entity::Resource(resource))?;
        tracing::info!("Created resource {}", id);
        Ok(())
    }

    pub fn create_staff(&self, staff: StaffUser) -> Result<()> {
        if staff.id.trim().is_empty() {
            return Err(Error::InvalidRecord("staff id is empty".into()));
        }
        if !staff.patients_assigned.is_empty() {
            return Err(Error::InvalidRecord(format!(
                "new staff {} must not carry assignments",
                staff.id
            )));
        }

        let _guard = self.guard()?;
        let id = staff.id.clone();
        self.store.insert_one(Entity::Staff(staff))?;
        tracing::info!("Created staff {}", id);
        Ok(())
    }

    pub fn patient(&self, id: &str) -> Result<Patient> {
        let _guard = self.guard()?;
        self.load_patient(id)
    }

    pub fn resource(&self, id: &str) -> Result<Resource> {
        let _guard = self.guard()?;
        self.load_resource(id)
    }

    pub fn staff(&self, id: &str) -> Result<StaffUser> {
        let _guard = self.guard()?;
        self.load_staff(id)
    }

    pub fn patients(&self) -> Result<Vec<Patient>> {
        let _guard = self.guard()?;
        self.all_patients()
    }

    pub fn resources(&self) -> Result<Vec<Resource>> {
        let _guard = self.guard()?;
        self.all_resources()
    }

    pub fn staff_members(&self) -> Result<Vec<StaffUser>> {
        let _guard = self.guard()?;
        self.all_staff()
    }

    /// Patients whose `staffs_assigned` contains the staff member
    pub fn patients_for_staff(&self, staff_id: &str) -> Result<Vec<Patient>> {
        let _guard = self.guard()?;
        self.load_staff(staff_id)?;
        Ok(self
            .all_patients()?
            .into_iter()
            .filter(|p| p.staffs_assigned.contains(staff_id))
            .collect())
    }

    // ========================================================================
    // Relationships
    // ========================================================================

    pub fn allocate_resource(&self, patient_id: &str, resource_id: &str) -> Result<()> {
        let _guard = self.guard()?;
        self.plan_allocation(patient_id, resource_id)?
            .commit(&self.store)?;
        tracing::info!("Allocated resource {} to patient {}", resource_id, patient_id);
        Ok(())
    }

    pub fn deallocate_resource(&self, patient_id: &str, resource_id: &str) -> Result<()> {
        let _guard = self.guard()?;
        self.plan_deallocation(patient_id, resource_id)?
            .commit(&self.store)?;
        tracing::info!(
            "Deallocated resource {} from patient {}",
            resource_id,
            patient_id
        );
        Ok(())
    }

    pub fn assign_staff(&self, patient_id: &str, staff_id: &str) -> Result<()> {
        let _guard = self.guard()?;
        self.plan_assignment(patient_id, staff_id)?
            .commit(&self.store)?;
        tracing::info!("Assigned staff {} to patient {}", staff_id, patient_id);
        Ok(())
    }

    pub fn unassign_staff(&self, patient_id: &str, staff_id: &str) -> Result<()> {
        let _guard = self.guard()?;
        self.plan_unassignment(patient_id, staff_id)?
            .commit(&self.store)?;
        tracing::info!("Unassigned staff {} from patient {}", staff_id, patient_id);
        Ok(())
    }

    /// Release every resource and staff member held by the patient, then delete it.
    ///
    /// Every step is planned before anything is committed. A step refused
    /// by its precondition check is skipped and reported only when the other
    /// record no longer points at the patient (it is gone, or the reference
    /// lives on the patient side alone). If a resource or staff record still
    /// lists the patient and cannot be released, removal fails with
    /// `InconsistentState` before any change is made. A store failure while
    /// committing aborts the removal and the patient record is kept.
    pub fn remove_patient(&self, patient_id: &str) -> Result<RemovalReport> {
        let _guard = self.guard()?;
        let patient = self.load_patient(patient_id)?;

        let mut report = RemovalReport {
            patient_id: patient_id.to_string(),
            deallocated: Vec::new(),
            unassigned: Vec::new(),
            skipped: Vec::new(),
        };

        // References held on the other side count too, even if the patient forgot them
        let holding_resources: BTreeSet<String> = self
            .all_resources()?
            .into_iter()
            .filter(|r| r.allocated_patients.contains(patient_id))
            .map(|r| r.id)
            .collect();
        let holding_staff: BTreeSet<String> = self
            .all_staff()?
            .into_iter()
            .filter(|s| s.patients_assigned.contains(patient_id))
            .map(|s| s.id)
            .collect();

        let mut deallocations = Vec::new();
        for resource_id in patient.resources_allocated.union(&holding_resources) {
            match self.plan_deallocation(patient_id, resource_id) {
                Ok(edit) => deallocations.push((resource_id.clone(), edit)),
                Err(e) if holding_resources.contains(resource_id) => {
                    return Err(blocked_removal(EntityKind::Resource, resource_id, patient_id, &e))
                }
                Err(e) => report.skip(EntityKind::Resource, resource_id, &e),
            }
        }

        let mut unassignments = Vec::new();
        for staff_id in patient.staffs_assigned.union(&holding_staff) {
            match self.plan_unassignment(patient_id, staff_id) {
                Ok(edit) => unassignments.push((staff_id.clone(), edit)),
                Err(e) if holding_staff.contains(staff_id) => {
                    return Err(blocked_removal(EntityKind::Staff, staff_id, patient_id, &e))
                }
                Err(e) => report.skip(EntityKind::Staff, staff_id, &e),
            }
        }

        for (resource_id, edit) in deallocations {
            edit.commit(&self.store)?;
            report.deallocated.push(resource_id);
        }
        for (staff_id, edit) in unassignments {
            edit.commit(&self.store)?;
            report.unassigned.push(staff_id);
        }

        self.store.delete_one(EntityKind::Patient, patient_id)?;
        tracing::info!(
            "Removed patient {} ({} deallocated, {} unassigned, {} skipped)",
            patient_id,
            report.deallocated.len(),
            report.unassigned.len(),
            report.skipped.len()
        );
        Ok(report)
    }

    // ========================================================================
    // Precondition checks (caller holds the guard)
    // ========================================================================

    fn plan_allocation(&self, patient_id: &str, resource_id: &str) -> Result<RelationshipEdit> {
        let patient = self.load_patient(patient_id)?;
        let resource = self.load_resource(resource_id)?;

        let on_patient = patient.resources_allocated.contains(resource_id);
        let on_resource = resource.allocated_patients.contains(patient_id);
        match (on_patient, on_resource) {
            (true, true) => {
                return Err(Error::AlreadyAllocated {
                    patient_id: patient_id.to_string(),
                    resource_id: resource_id.to_string(),
                })
            }
            (false, false) => {}
            _ => return Err(one_sided("allocation", patient_id, resource_id, on_patient)),
        }

        if !resource.capacity_balanced() {
            return Err(unbalanced(&resource));
        }
        if resource.available == 0 {
            return Err(Error::Unavailable {
                resource_id: resource_id.to_string(),
            });
        }

        Ok(RelationshipEdit::allocate(patient_id, resource_id))
    }

    fn plan_deallocation(
        &self,
        patient_id: &str,
        resource_id: &str,
    ) -> Result<RelationshipEdit> {
        let patient = self.load_patient(patient_id)?;
        let resource = self.load_resource(resource_id)?;

        let on_patient = patient.resources_allocated.contains(resource_id);
        let on_resource = resource.allocated_patients.contains(patient_id);
        match (on_patient, on_resource) {
            (true, true) => {}
            (false, false) => {
                return Err(Error::NotAllocated {
                    patient_id: patient_id.to_string(),
                    resource_id: resource_id.to_string(),
                })
            }
            _ => return Err(one_sided("allocation", patient_id, resource_id, on_patient)),
        }

        if !resource.capacity_balanced() {
            return Err(unbalanced(&resource));
        }

        Ok(RelationshipEdit::deallocate(patient_id, resource_id))
    }

    fn plan_assignment(&self, patient_id: &str, staff_id: &str) -> Result<RelationshipEdit> {
        let patient = self.load_patient(patient_id)?;
        let staff = self.load_staff(staff_id)?;

        let on_patient = patient.staffs_assigned.contains(staff_id);
        let on_staff = staff.patients_assigned.contains(patient_id);
        match (on_patient, on_staff) {
            (true, true) => Err(Error::AlreadyAssigned {
                patient_id: patient_id.to_string(),
                staff_id: staff_id.to_string(),
            }),
            (false, false) => Ok(RelationshipEdit::assign(patient_id, staff_id)),
            _ => Err(one_sided("assignment", patient_id, staff_id, on_patient)),
        }
    }

    fn plan_unassignment(&self, patient_id: &str, staff_id: &str) -> Result<RelationshipEdit> {
        let patient = self.load_patient(patient_id)?;
        let staff = self.load_staff(staff_id)?;

        let on_patient = patient.staffs_assigned.contains(staff_id);
        let on_staff = staff.patients_assigned.contains(patient_id);
        match (on_patient, on_staff) {
            (true, true) => Ok(RelationshipEdit::unassign(patient_id, staff_id)),
            (false, false) => Err(Error::NotAssigned {
                patient_id: patient_id.to_string(),
                staff_id: staff_id.to_string(),
            }),
            _ => Err(one_sided("assignment", patient_id, staff_id, on_patient)),
        }
    }

    // ========================================================================
    // Loading (caller holds the guard)
    // ========================================================================

    pub(crate) fn load_patient(&self, id: &str) -> Result<Patient> {
        self.store
            .find_one(EntityKind::Patient, id)?
            .and_then(Entity::into_patient)
            .ok_or_else(|| Error::not_found(EntityKind::Patient, id))
    }

    pub(crate) fn load_resource(&self, id: &str) -> Result<Resource> {
        self.store
            .find_one(EntityKind::Resource, id)?
            .and_then(Entity::into_resource)
            .ok_or_else(|| Error::not_found(EntityKind::Resource, id))
    }

    pub(crate) fn load_staff(&self, id: &str) -> Result<StaffUser> {
        self.store
            .find_one(EntityKind::Staff, id)?
            .and_then(Entity::into_staff)
            .ok_or_else(|| Error::not_found(EntityKind::Staff, id))
    }

    pub(crate) fn all_patients(&self) -> Result<Vec<Patient>> {
        Ok(self
            .store
            .list(EntityKind::Patient)?
            .into_iter()
            .filter_map(Entity::into_patient)
            .collect())
    }

    pub(crate) fn all_resources(&self) -> Result<Vec<Resource>> {
        Ok(self
            .store
            .list(EntityKind::Resource)?
            .into_iter()
            .filter_map(Entity::into_resource)
            .collect())
    }

    pub(crate) fn all_staff(&self) -> Result<Vec<StaffUser>> {
        Ok(self
            .store
            .list(EntityKind::Staff)?
            .into_iter()
            .filter_map(Entity::into_staff)
            .collect())
    }
}

impl RemovalReport {
    fn skip(&mut self, kind: EntityKind, id: &str, reason: &Error) {
        tracing::warn!(
            "Skipping {} {} while removing patient {}: {}",
            kind,
            id,
            self.patient_id,
            reason
        );
        self.skipped.push(SkippedRef {
            kind,
            id: id.to_string(),
            reason: reason.to_string(),
        });
    }
}

fn one_sided(relation: &str, patient_id: &str, other_id: &str, on_patient: bool) -> Error {
    let detail = if on_patient {
        format!(
            "{} {} -> {} recorded on the patient only",
            relation, other_id, patient_id
        )
    } else {
        format!(
            "{} {} -> {} recorded on {} only",
            relation, other_id, patient_id, other_id
        )
    };
    tracing::warn!("Detected one-sided {}", detail);
    Error::InconsistentState(detail)
}

fn blocked_removal(kind: EntityKind, id: &str, patient_id: &str, cause: &Error) -> Error {
    let detail = format!(
        "{} {} still references patient {} and cannot be released: {}",
        kind, id, patient_id, cause
    );
    tracing::warn!("Refusing removal: {}", detail);
    Error::InconsistentState(detail)
}

fn unbalanced(resource: &Resource) -> Error {
    let detail = format!(
        "resource {}: available {} + allocated {} != total {}",
        resource.id,
        resource.available,
        resource.allocated_patients.len(),
        resource.total
    );
    tracing::warn!("Detected capacity mismatch on {}", detail);
    Error::InconsistentState(detail)
}
