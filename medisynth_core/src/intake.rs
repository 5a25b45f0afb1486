//! Clinical data intake and criticality refresh.
//!
//! Lab reports reach us already structured: text extraction and the model
//! call that produce a [`LabExtraction`] happen upstream. This module merges
//! such extractions and manually entered readings into the patient record,
//! and stores the resulting criticality assessment.

use crate::criticality::{self, CriticalityAssessment};
use crate::ledger::Ledger;
use crate::store::{Delta, RecordStore};
use crate::{Anomaly, ClinicalFields, Entity, EntityKind, Error, Patient, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Structured content of one lab report
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct LabExtraction {
    #[serde(default)]
    pub patient_info: ClinicalFields,
    #[serde(default)]
    pub anomalies: Vec<Anomaly>,
    #[serde(default)]
    pub vitals: ClinicalFields,
    #[serde(default)]
    pub lab_results: ClinicalFields,
}

impl LabExtraction {
    /// Read an extraction from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let extraction: LabExtraction = serde_json::from_str(&contents)?;
        tracing::debug!(
            "Loaded lab extraction from {:?} ({} anomalies)",
            path,
            extraction.anomalies.len()
        );
        Ok(extraction)
    }

    /// Merge into a patient: maps key-wise (new values win), anomalies appended
    pub fn merge_into(self, patient: &mut Patient) {
        patient.patient_info.extend(self.patient_info);
        patient.vitals.extend(self.vitals);
        patient.lab_results.extend(self.lab_results);
        patient.anomalies.extend(self.anomalies);
    }
}

impl<S: RecordStore> Ledger<S> {
    /// Merge manually entered readings into `manual_data`
    pub fn record_manual_data(&self, patient_id: &str, fields: ClinicalFields) -> Result<Patient> {
        let _guard = self.guard()?;
        let mut patient = self.load_patient(patient_id)?;
        let count = fields.len();
        patient.manual_data.extend(fields);
        self.replace_patient(&patient)?;
        tracing::info!("Recorded {} manual field(s) for patient {}", count, patient_id);
        Ok(patient)
    }

    /// Merge a lab extraction, creating the patient if it doesn't exist yet
    pub fn ingest_lab_extraction(
        &self,
        patient_id: &str,
        extraction: LabExtraction,
    ) -> Result<Patient> {
        if patient_id.trim().is_empty() {
            return Err(Error::InvalidRecord("patient id is empty".into()));
        }

        let _guard = self.guard()?;
        let anomalies = extraction.anomalies.len();
        let patient = match self.load_patient(patient_id) {
            Ok(mut patient) => {
                extraction.merge_into(&mut patient);
                self.replace_patient(&patient)?;
                patient
            }
            Err(Error::NotFound { .. }) => {
                let mut patient = Patient::new(patient_id);
                extraction.merge_into(&mut patient);
                self.store().insert_one(Entity::Patient(patient.clone()))?;
                tracing::info!("Created patient {} from lab extraction", patient_id);
                patient
            }
            Err(e) => return Err(e),
        };

        tracing::info!(
            "Ingested lab extraction for patient {} ({} anomalies)",
            patient_id,
            anomalies
        );
        Ok(patient)
    }

    /// Score the stored record and persist the result on the patient
    pub fn refresh_criticality(&self, patient_id: &str) -> Result<CriticalityAssessment> {
        let _guard = self.guard()?;
        let mut patient = self.load_patient(patient_id)?;
        let assessment = criticality::score(&patient);

        patient.criticality_score = Some(assessment.score);
        patient.criticality_level = Some(assessment.level);
        patient.criticality_scored_at = Some(Utc::now());
        self.replace_patient(&patient)?;

        tracing::info!(
            "Patient {} criticality {:.2} ({})",
            patient_id,
            assessment.score,
            assessment.level
        );
        Ok(assessment)
    }

    fn replace_patient(&self, patient: &Patient) -> Result<()> {
        self.store().update_one(
            EntityKind::Patient,
            &patient.id,
            &Delta::Replace(Entity::Patient(patient.clone())),
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::criticality::{CHEST_PAIN_TYPE, RESTING_BP};
    use crate::store::MemoryStore;
    use crate::{CriticalityLevel, FieldValue, Resource};

    const EXTRACTION: &str = r#"{
        "patient_info": {"name": "Asha Verma", "age": 67, "gender": "F"},
        "anomalies": [
            {"test_name": "Mean Platelet Volume", "result": 12.4, "reference_range": "6.5-12.0", "unit": "fL"}
        ],
        "vitals": {"ChestPainType": "ASY"},
        "lab_results": {"Hemoglobin": "11.2", "Platelet Count": 180}
    }"#;

    fn ledger() -> Ledger<MemoryStore> {
        Ledger::new(MemoryStore::new())
    }

    #[test]
    fn test_ingest_creates_missing_patient() {
        let ledger = ledger();
        let extraction: LabExtraction = serde_json::from_str(EXTRACTION).unwrap();

        let patient = ledger.ingest_lab_extraction("p1", extraction).unwrap();
        assert_eq!(patient.name(), Some("Asha Verma"));
        assert_eq!(patient.anomalies.len(), 1);
        assert_eq!(ledger.patient("p1").unwrap(), patient);
    }

    #[test]
    fn test_ingest_merges_and_appends() {
        let ledger = ledger();
        let mut existing = Patient::new("p1");
        existing.vitals.insert(CHEST_PAIN_TYPE.into(), "ATA".into());
        existing.vitals.insert("SpO2".into(), 97.0.into());
        ledger.create_patient(existing).unwrap();
        ledger
            .create_resource(Resource::new("bed", "Bed", 1))
            .unwrap();
        ledger.allocate_resource("p1", "bed").unwrap();

        for _ in 0..2 {
            let extraction: LabExtraction = serde_json::from_str(EXTRACTION).unwrap();
            ledger.ingest_lab_extraction("p1", extraction).unwrap();
        }

        let patient = ledger.patient("p1").unwrap();
        assert_eq!(patient.vitals[CHEST_PAIN_TYPE], FieldValue::from("ASY"));
        assert_eq!(patient.vitals["SpO2"], FieldValue::Number(97.0));
        assert_eq!(patient.anomalies.len(), 2);
        // Relationship fields are untouched by intake
        assert!(patient.resources_allocated.contains("bed"));
    }

    #[test]
    fn test_manual_data_overwrites_same_keys_only() {
        let ledger = ledger();
        ledger.create_patient(Patient::new("p1")).unwrap();

        let mut first = ClinicalFields::new();
        first.insert(RESTING_BP.into(), 130.0.into());
        first.insert("Cholesterol".into(), 220.0.into());
        ledger.record_manual_data("p1", first).unwrap();

        let mut second = ClinicalFields::new();
        second.insert(RESTING_BP.into(), 150.0.into());
        let patient = ledger.record_manual_data("p1", second).unwrap();

        assert_eq!(patient.manual_data[RESTING_BP], FieldValue::Number(150.0));
        assert_eq!(patient.manual_data["Cholesterol"], FieldValue::Number(220.0));
    }

    #[test]
    fn test_manual_data_requires_patient() {
        let ledger = ledger();
        let err = ledger
            .record_manual_data("ghost", ClinicalFields::new())
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[test]
    fn test_refresh_criticality_persists_score() {
        let ledger = ledger();
        ledger.create_patient(Patient::new("p1")).unwrap();

        let assessment = ledger.refresh_criticality("p1").unwrap();
        assert_eq!(assessment.level, CriticalityLevel::Low);
        assert_eq!(assessment.breakdown.len(), 8);

        let patient = ledger.patient("p1").unwrap();
        assert_eq!(patient.criticality_score, Some(assessment.score));
        assert_eq!(patient.criticality_level, Some(CriticalityLevel::Low));
        assert!(patient.criticality_scored_at.is_some());
    }

    #[test]
    fn test_load_extraction_from_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("report.json");
        std::fs::write(&path, EXTRACTION).unwrap();

        let extraction = LabExtraction::load(&path).unwrap();
        assert_eq!(extraction.lab_results.len(), 2);
    }
}
