//! Consistency audit over every stored record.
//!
//! Reports violations of the ledger invariants without repairing them.

use crate::ledger::Ledger;
use crate::store::RecordStore;
use crate::{EntityKind, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A single invariant violation
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Inconsistency {
    /// `available + |allocated_patients| != total`
    CapacityMismatch {
        resource_id: String,
        total: u32,
        available: u32,
        allocated: usize,
    },
    /// `from` references `to`, but `to` does not reference `from` back
    MissingBackReference {
        from_kind: EntityKind,
        from_id: String,
        to_kind: EntityKind,
        to_id: String,
    },
    /// `from` references a record that doesn't exist
    DanglingReference {
        from_kind: EntityKind,
        from_id: String,
        to_kind: EntityKind,
        to_id: String,
    },
}

impl fmt::Display for Inconsistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Inconsistency::CapacityMismatch {
                resource_id,
                total,
                available,
                allocated,
            } => write!(
                f,
                "resource {}: available {} + allocated {} != total {}",
                resource_id, available, allocated, total
            ),
            Inconsistency::MissingBackReference {
                from_kind,
                from_id,
                to_kind,
                to_id,
            } => write!(
                f,
                "{} {} references {} {} without a back-reference",
                from_kind, from_id, to_kind, to_id
            ),
            Inconsistency::DanglingReference {
                from_kind,
                from_id,
                to_kind,
                to_id,
            } => write!(
                f,
                "{} {} references missing {} {}",
                from_kind, from_id, to_kind, to_id
            ),
        }
    }
}

impl<S: RecordStore> Ledger<S> {
    /// Check every invariant; an empty list means the records are consistent
    pub fn audit(&self) -> Result<Vec<Inconsistency>> {
        let _guard = self.guard()?;

        let patients: BTreeMap<_, _> = self
            .all_patients()?
            .into_iter()
            .map(|p| (p.id.clone(), p))
            .collect();
        let resources: BTreeMap<_, _> = self
            .all_resources()?
            .into_iter()
            .map(|r| (r.id.clone(), r))
            .collect();
        let staff: BTreeMap<_, _> = self
            .all_staff()?
            .into_iter()
            .map(|s| (s.id.clone(), s))
            .collect();

        let mut findings = Vec::new();
        let mut link = |from_kind: EntityKind,
                        from_id: &str,
                        to_kind: EntityKind,
                        to_id: &str,
                        exists: bool,
                        mirrored: bool| {
            let (from_id, to_id) = (from_id.to_string(), to_id.to_string());
            if !exists {
                findings.push(Inconsistency::DanglingReference {
                    from_kind,
                    from_id,
                    to_kind,
                    to_id,
                });
            } else if !mirrored {
                findings.push(Inconsistency::MissingBackReference {
                    from_kind,
                    from_id,
                    to_kind,
                    to_id,
                });
            }
        };

        for patient in patients.values() {
            for rid in &patient.resources_allocated {
                let other = resources.get(rid);
                link(
                    EntityKind::Patient,
                    &patient.id,
                    EntityKind::Resource,
                    rid,
                    other.is_some(),
                    other.is_some_and(|r| r.allocated_patients.contains(&patient.id)),
                );
            }
            for sid in &patient.staffs_assigned {
                let other = staff.get(sid);
                link(
                    EntityKind::Patient,
                    &patient.id,
                    EntityKind::Staff,
                    sid,
                    other.is_some(),
                    other.is_some_and(|s| s.patients_assigned.contains(&patient.id)),
                );
            }
        }

        for resource in resources.values() {
            for pid in &resource.allocated_patients {
                let other = patients.get(pid);
                link(
                    EntityKind::Resource,
                    &resource.id,
                    EntityKind::Patient,
                    pid,
                    other.is_some(),
                    other.is_some_and(|p| p.resources_allocated.contains(&resource.id)),
                );
            }
        }

        for member in staff.values() {
            for pid in &member.patients_assigned {
                let other = patients.get(pid);
                link(
                    EntityKind::Staff,
                    &member.id,
                    EntityKind::Patient,
                    pid,
                    other.is_some(),
                    other.is_some_and(|p| p.staffs_assigned.contains(&member.id)),
                );
            }
        }

        for resource in resources.values() {
            if !resource.capacity_balanced() {
                findings.push(Inconsistency::CapacityMismatch {
                    resource_id: resource.id.clone(),
                    total: resource.total,
                    available: resource.available,
                    allocated: resource.allocated_patients.len(),
                });
            }
        }

        for finding in &findings {
            tracing::warn!("Audit: {}", finding);
        }
        tracing::info!(
            "Audited {} patients, {} resources, {} staff: {} finding(s)",
            patients.len(),
            resources.len(),
            staff.len(),
            findings.len()
        );
        Ok(findings)
    }
}
