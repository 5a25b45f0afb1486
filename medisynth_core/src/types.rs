//! Core domain types for the MediSynth records system.
//!
//! This module defines the fundamental types used throughout the system:
//! - Clinical field values and lab anomalies
//! - Patients, resources and staff members
//! - Criticality levels
//! - Entity kinds used to address the record store

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

// ============================================================================
// Clinical Field Types
// ============================================================================

/// A single clinical reading as it arrives from manual entry or a lab report.
///
/// Values are loosely typed on the way in: extraction may produce numbers,
/// numeric strings, categorical codes, flags or nulls.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Flag(bool),
    Number(f64),
    Text(String),
}

impl FieldValue {
    /// Numeric view of the value. Numeric strings are accepted;
    /// non-finite numbers are treated as missing.
    pub fn as_number(&self) -> Option<f64> {
        let value = match self {
            FieldValue::Number(n) => *n,
            FieldValue::Text(s) => s.trim().parse::<f64>().ok()?,
            FieldValue::Null | FieldValue::Flag(_) => return None,
        };
        value.is_finite().then_some(value)
    }

    /// Categorical view of the value (trimmed text only)
    pub fn as_category(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s.trim()),
            _ => None,
        }
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Number(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

/// Named clinical fields (e.g. `RestingBP`, `Hemoglobin`)
pub type ClinicalFields = BTreeMap<String, FieldValue>;

/// An out-of-range lab result
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Anomaly {
    pub test_name: String,
    pub result: FieldValue,
    #[serde(default)]
    pub reference_range: String,
    #[serde(default)]
    pub unit: String,
}

/// Discrete severity band derived from the criticality score
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CriticalityLevel {
    Low,
    Medium,
    High,
}

impl fmt::Display for CriticalityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CriticalityLevel::Low => write!(f, "low"),
            CriticalityLevel::Medium => write!(f, "medium"),
            CriticalityLevel::High => write!(f, "high"),
        }
    }
}

// ============================================================================
// Record Types
// ============================================================================

/// A patient record
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Patient {
    pub id: String,
    #[serde(default)]
    pub patient_info: ClinicalFields,
    #[serde(default)]
    pub vitals: ClinicalFields,
    #[serde(default)]
    pub lab_results: ClinicalFields,
    #[serde(default)]
    pub manual_data: ClinicalFields,
    #[serde(default)]
    pub anomalies: Vec<Anomaly>,
    #[serde(default)]
    pub resources_allocated: BTreeSet<String>,
    #[serde(default)]
    pub staffs_assigned: BTreeSet<String>,
    #[serde(default)]
    pub criticality_score: Option<f64>,
    #[serde(default)]
    pub criticality_level: Option<CriticalityLevel>,
    #[serde(default)]
    pub criticality_scored_at: Option<DateTime<Utc>>,
}

impl Patient {
    /// Create an empty patient record
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            patient_info: ClinicalFields::new(),
            vitals: ClinicalFields::new(),
            lab_results: ClinicalFields::new(),
            manual_data: ClinicalFields::new(),
            anomalies: Vec::new(),
            resources_allocated: BTreeSet::new(),
            staffs_assigned: BTreeSet::new(),
            criticality_score: None,
            criticality_level: None,
            criticality_scored_at: None,
        }
    }

    /// Display name from `patient_info.name`, if present
    pub fn name(&self) -> Option<&str> {
        self.patient_info.get("name").and_then(FieldValue::as_category)
    }
}

/// A capacity-limited resource (beds, ventilators, monitors...)
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Resource {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub resource_type: String,
    pub total: u32,
    pub available: u32,
    #[serde(default)]
    pub allocated_patients: BTreeSet<String>,
}

impl Resource {
    /// Create a resource with all units free
    pub fn new(id: impl Into<String>, name: impl Into<String>, total: u32) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            resource_type: String::new(),
            total,
            available: total,
            allocated_patients: BTreeSet::new(),
        }
    }

    /// `available + |allocated_patients| == total`
    pub fn capacity_balanced(&self) -> bool {
        self.available as usize + self.allocated_patients.len() == self.total as usize
    }
}

/// A staff member who can be assigned to patients
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StaffUser {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub patients_assigned: BTreeSet<String>,
}

impl StaffUser {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            role: String::new(),
            patients_assigned: BTreeSet::new(),
        }
    }
}

// ============================================================================
// Store Addressing
// ============================================================================

/// The three record collections
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Patient,
    Resource,
    Staff,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Patient => write!(f, "Patient"),
            EntityKind::Resource => write!(f, "Resource"),
            EntityKind::Staff => write!(f, "Staff"),
        }
    }
}

/// A record of any kind, as held by the record store
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Entity {
    Patient(Patient),
    Resource(Resource),
    Staff(StaffUser),
}

impl Entity {
    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::Patient(_) => EntityKind::Patient,
            Entity::Resource(_) => EntityKind::Resource,
            Entity::Staff(_) => EntityKind::Staff,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Entity::Patient(p) => &p.id,
            Entity::Resource(r) => &r.id,
            Entity::Staff(s) => &s.id,
        }
    }

    pub fn into_patient(self) -> Option<Patient> {
        match self {
            Entity::Patient(p) => Some(p),
            _ => None,
        }
    }

    pub fn into_resource(self) -> Option<Resource> {
        match self {
            Entity::Resource(r) => Some(r),
            _ => None,
        }
    }

    pub fn into_staff(self) -> Option<StaffUser> {
        match self {
            Entity::Staff(s) => Some(s),
            _ => None,
        }
    }
}

/// Generate a fresh record identifier
pub fn new_record_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_value_accepts_mixed_json() {
        let fields: ClinicalFields = serde_json::from_str(
            r#"{"RestingBP": 140, "MaxHR": "150", "ChestPainType": "ASY", "hypertension": true, "bmi": null}"#,
        )
        .unwrap();

        assert_eq!(fields["RestingBP"].as_number(), Some(140.0));
        assert_eq!(fields["MaxHR"].as_number(), Some(150.0));
        assert_eq!(fields["ChestPainType"].as_category(), Some("ASY"));
        assert_eq!(fields["hypertension"], FieldValue::Flag(true));
        assert_eq!(fields["bmi"], FieldValue::Null);
    }

    #[test]
    fn test_non_finite_text_is_not_a_number() {
        assert_eq!(FieldValue::from("NaN").as_number(), None);
        assert_eq!(FieldValue::from("inf").as_number(), None);
        assert_eq!(FieldValue::from("abc").as_number(), None);
    }

    #[test]
    fn test_patient_defaults_missing_sections() {
        let patient: Patient = serde_json::from_str(r#"{"id": "p1"}"#).unwrap();
        assert_eq!(patient, Patient::new("p1"));
    }

    #[test]
    fn test_new_resource_is_balanced() {
        let resource = Resource::new("icu-bed", "ICU bed", 4);
        assert_eq!(resource.available, 4);
        assert!(resource.capacity_balanced());
    }

    #[test]
    fn test_entity_tagged_serialization() {
        let entity = Entity::Staff(StaffUser::new("s1", "Dr. Rao"));
        let json = serde_json::to_string(&entity).unwrap();
        assert!(json.contains(r#""kind":"staff""#));
        let back: Entity = serde_json::from_str(&json).unwrap();
        assert_eq!(back.kind(), EntityKind::Staff);
        assert_eq!(back.id(), "s1");
    }
}
