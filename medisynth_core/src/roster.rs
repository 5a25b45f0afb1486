//! Triage roster export.
//!
//! Writes patients to CSV ordered by criticality, most critical first.

use crate::{Patient, Result};
use std::cmp::Ordering;
use std::path::Path;

/// A row in the roster CSV
#[derive(Debug, serde::Serialize)]
struct RosterRow<'a> {
    patient_id: &'a str,
    name: &'a str,
    criticality_score: Option<f64>,
    criticality_level: Option<String>,
    scored_at: Option<String>,
    resources: usize,
    staff: usize,
}

impl<'a> From<&'a Patient> for RosterRow<'a> {
    fn from(patient: &'a Patient) -> Self {
        RosterRow {
            patient_id: &patient.id,
            name: patient.name().unwrap_or(""),
            criticality_score: patient.criticality_score,
            criticality_level: patient.criticality_level.map(|l| l.to_string()),
            scored_at: patient.criticality_scored_at.map(|t| t.to_rfc3339()),
            resources: patient.resources_allocated.len(),
            staff: patient.staffs_assigned.len(),
        }
    }
}

/// Most critical first; unscored patients last; ties by id
pub fn triage_order(a: &Patient, b: &Patient) -> Ordering {
    match (a.criticality_score, b.criticality_score) {
        (Some(x), Some(y)) => y.total_cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
    .then_with(|| a.id.cmp(&b.id))
}

/// Write the roster, replacing any existing file. Returns the row count.
pub fn write_roster(patients: &[Patient], path: &Path) -> Result<usize> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut ordered: Vec<&Patient> = patients.iter().collect();
    ordered.sort_by(|a, b| triage_order(a, b));

    let mut writer = csv::Writer::from_path(path)?;
    for patient in &ordered {
        writer.serialize(RosterRow::from(*patient))?;
    }
    writer.flush()?;

    tracing::info!("Wrote {} patients to roster {:?}", ordered.len(), path);
    Ok(ordered.len())
}
