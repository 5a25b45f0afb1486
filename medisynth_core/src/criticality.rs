//! Criticality scoring.
//!
//! Maps a patient's clinical fields to a 0–10 severity index and a
//! low/medium/high level. The rubric has eight weighted categories, each a
//! blend of components normalized to a 0–10 scale:
//!
//! | Code | Category          | Weight |
//! |------|-------------------|--------|
//! | VS   | Vital signs       | 20     |
//! | LR   | Lab results       | 15     |
//! | MH   | Medical history   | 10     |
//! | S    | Symptoms          | 15     |
//! | RF   | Risk factors      | 10     |
//! | DT   | Diagnostic tests  | 15     |
//! | FS   | Functional status | 5      |
//! | MU   | Medication use    | 10     |
//!
//! Missing or unreadable fields fall back to the population-typical value
//! in [`FIELD_DEFAULTS`], so scoring never fails.

use crate::{CriticalityLevel, FieldValue, Patient};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ============================================================================
// Field Defaults
// ============================================================================

/// Where on the patient record a field is read from
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    PatientInfo,
    Vitals,
    LabResults,
    ManualData,
    /// First anomaly whose `test_name` equals the field name
    Anomalies,
}

/// Value substituted when a field is missing
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DefaultValue {
    Number(f64),
    Category(&'static str),
}

/// One scoring input and its fallback
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FieldDefault {
    pub source: Source,
    pub field: &'static str,
    pub default: DefaultValue,
}

const fn number(source: Source, field: &'static str, value: f64) -> FieldDefault {
    FieldDefault {
        source,
        field,
        default: DefaultValue::Number(value),
    }
}

const fn category(source: Source, field: &'static str, value: &'static str) -> FieldDefault {
    FieldDefault {
        source,
        field,
        default: DefaultValue::Category(value),
    }
}

pub const RESTING_BP: &str = "RestingBP";
pub const MAX_HR: &str = "MaxHR";
pub const EXERCISE_ANGINA: &str = "ExerciseAngina";
pub const HEMOGLOBIN: &str = "Hemoglobin";
pub const PLATELET_COUNT: &str = "Platelet Count";
// Two spaces, as lab extraction emits it
pub const TLC: &str = "Total Leukocyte Count  (TLC)";
pub const RDW: &str = "Red Cell Distribution Width (RDW)";
pub const MPV: &str = "Mean Platelet Volume";
pub const CHOLESTEROL: &str = "Cholesterol";
pub const CHEST_PAIN_TYPE: &str = "ChestPainType";
pub const OLDPEAK: &str = "Oldpeak";
pub const AGE: &str = "age";
pub const RESTING_ECG: &str = "RestingECG";
pub const ST_SLOPE: &str = "ST_Slope";

/// Every input the scorer reads, where it reads it from, and its fallback
pub const FIELD_DEFAULTS: &[FieldDefault] = &[
    number(Source::ManualData, RESTING_BP, 120.0),
    number(Source::ManualData, MAX_HR, 100.0),
    category(Source::ManualData, EXERCISE_ANGINA, "N"),
    number(Source::LabResults, HEMOGLOBIN, 15.0),
    number(Source::LabResults, PLATELET_COUNT, 200.0),
    number(Source::LabResults, TLC, 8.0),
    number(Source::Anomalies, RDW, 12.0),
    number(Source::Anomalies, MPV, 10.0),
    number(Source::ManualData, CHOLESTEROL, 200.0),
    category(Source::Vitals, CHEST_PAIN_TYPE, "ATA"),
    number(Source::ManualData, OLDPEAK, 0.0),
    number(Source::PatientInfo, AGE, 50.0),
    category(Source::ManualData, RESTING_ECG, "Normal"),
    category(Source::ManualData, ST_SLOPE, "Up"),
];

static DEFAULTS_BY_FIELD: Lazy<HashMap<&'static str, FieldDefault>> =
    Lazy::new(|| FIELD_DEFAULTS.iter().map(|d| (d.field, *d)).collect());

/// Look up the fallback entry for a field
pub fn field_default(field: &str) -> Option<&'static FieldDefault> {
    DEFAULTS_BY_FIELD.get(field)
}

// ============================================================================
// Rubric Constants
// ============================================================================

/// Inclusive normalization range mapped onto 0–10
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Range {
    pub min: f64,
    pub max: f64,
}

const fn range(min: f64, max: f64) -> Range {
    Range { min, max }
}

pub const BP_RANGE: Range = range(90.0, 180.0);
pub const HR_RANGE: Range = range(60.0, 200.0);
pub const HEMOGLOBIN_RANGE: Range = range(12.0, 18.0);
pub const PLATELET_RANGE: Range = range(150.0, 450.0);
pub const TLC_RANGE: Range = range(4.0, 11.0);
pub const RDW_RANGE: Range = range(11.60, 14.00);
pub const MPV_RANGE: Range = range(6.5, 12.0);
pub const CHOLESTEROL_RANGE: Range = range(150.0, 300.0);
pub const OLDPEAK_RANGE: Range = range(0.0, 6.0);
pub const AGE_RANGE: Range = range(20.0, 80.0);

/// Readings beyond this magnitude are treated as unreadable so the score stays finite
pub const MAX_READING: f64 = 1e9;

/// Categorical maps on a 0–100 scale
pub const CHEST_PAIN_MAP: &[(&str, f64)] =
    &[("ATA", 25.0), ("NAP", 50.0), ("ASY", 75.0), ("TA", 100.0)];
pub const RESTING_ECG_MAP: &[(&str, f64)] = &[("Normal", 0.0), ("Abnormal", 100.0)];
pub const ST_SLOPE_MAP: &[(&str, f64)] = &[("Up", 0.0), ("Flat", 50.0), ("Down", 100.0)];

/// Sex risk on the 0–100 scale; every patient is scored as male-equivalent
pub const SEX_RISK: f64 = 50.0;

/// Scoring categories, in rubric order
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    VitalSigns,
    LabResults,
    MedicalHistory,
    Symptoms,
    RiskFactors,
    DiagnosticTests,
    FunctionalStatus,
    MedicationUse,
}

impl Category {
    pub const ALL: [Category; 8] = [
        Category::VitalSigns,
        Category::LabResults,
        Category::MedicalHistory,
        Category::Symptoms,
        Category::RiskFactors,
        Category::DiagnosticTests,
        Category::FunctionalStatus,
        Category::MedicationUse,
    ];

    pub fn code(self) -> &'static str {
        match self {
            Category::VitalSigns => "VS",
            Category::LabResults => "LR",
            Category::MedicalHistory => "MH",
            Category::Symptoms => "S",
            Category::RiskFactors => "RF",
            Category::DiagnosticTests => "DT",
            Category::FunctionalStatus => "FS",
            Category::MedicationUse => "MU",
        }
    }

    pub fn weight(self) -> f64 {
        match self {
            Category::VitalSigns => 20.0,
            Category::LabResults => 15.0,
            Category::MedicalHistory => 10.0,
            Category::Symptoms => 15.0,
            Category::RiskFactors => 10.0,
            Category::DiagnosticTests => 15.0,
            Category::FunctionalStatus => 5.0,
            Category::MedicationUse => 10.0,
        }
    }
}

// ============================================================================
// Normalization
// ============================================================================

/// `(value - min) / (max - min) * 10`, unclamped; a degenerate range yields 0
pub fn linear(value: f64, range: Range) -> f64 {
    if range.min == range.max {
        return 0.0;
    }
    (value - range.min) / (range.max - range.min) * 10.0
}

/// 10 when the value equals the positive code, else 0
pub fn binary(value: &str, positive: &str) -> f64 {
    if value == positive {
        10.0
    } else {
        0.0
    }
}

/// Map a categorical code through a 0–100 table onto 0–10; unknown codes score 0
pub fn mapped(value: &str, map: &[(&str, f64)]) -> f64 {
    map.iter()
        .find(|(code, _)| *code == value)
        .map(|(_, points)| points / 10.0)
        .unwrap_or(0.0)
}

/// Severity band for a score: low below 3, high from 7
pub fn level_for(score: f64) -> CriticalityLevel {
    if score >= 7.0 {
        CriticalityLevel::High
    } else if score >= 3.0 {
        CriticalityLevel::Medium
    } else {
        CriticalityLevel::Low
    }
}

// ============================================================================
// Scoring
// ============================================================================

/// One category's contribution
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CategoryScore {
    pub category: Category,
    pub code: String,
    pub weight: f64,
    pub subscore: f64,
}

/// Result of scoring a patient record
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CriticalityAssessment {
    pub score: f64,
    pub level: CriticalityLevel,
    pub breakdown: Vec<CategoryScore>,
}

/// Score a patient record. Total and deterministic.
pub fn score(patient: &Patient) -> CriticalityAssessment {
    let inputs = Inputs { patient };

    let breakdown: Vec<CategoryScore> = Category::ALL
        .iter()
        .map(|&category| CategoryScore {
            category,
            code: category.code().to_string(),
            weight: category.weight(),
            subscore: inputs.subscore(category),
        })
        .collect();

    let weighted_sum: f64 = breakdown.iter().map(|c| c.weight * c.subscore).sum();
    let total_weight: f64 = breakdown.iter().map(|c| c.weight).sum();
    let score = weighted_sum / total_weight;

    tracing::debug!(
        "Scored patient {}: {:.3} ({})",
        patient.id,
        score,
        level_for(score)
    );

    CriticalityAssessment {
        score,
        level: level_for(score),
        breakdown,
    }
}

struct Inputs<'a> {
    patient: &'a Patient,
}

impl Inputs<'_> {
    fn subscore(&self, category: Category) -> f64 {
        match category {
            Category::VitalSigns => {
                linear(self.number(RESTING_BP), BP_RANGE) * 0.33
                    + linear(self.number(MAX_HR), HR_RANGE) * 0.33
                    + binary(&self.category(EXERCISE_ANGINA), "Y") * 0.33
            }
            Category::LabResults => {
                linear(self.number(HEMOGLOBIN), HEMOGLOBIN_RANGE) * 0.2
                    + linear(self.number(PLATELET_COUNT), PLATELET_RANGE) * 0.2
                    + linear(self.number(TLC), TLC_RANGE) * 0.2
                    + linear(self.number(RDW), RDW_RANGE) * 0.2
                    + linear(self.number(MPV), MPV_RANGE) * 0.2
            }
            // Fasting blood sugar has no numeric source
            Category::MedicalHistory => linear(self.number(CHOLESTEROL), CHOLESTEROL_RANGE) * 0.5,
            Category::Symptoms => {
                mapped(&self.category(CHEST_PAIN_TYPE), CHEST_PAIN_MAP) * 0.5
                    + linear(self.number(OLDPEAK), OLDPEAK_RANGE) * 0.5
            }
            Category::RiskFactors => {
                linear(self.number(AGE), AGE_RANGE) * 0.5 + SEX_RISK / 10.0
            }
            Category::DiagnosticTests => {
                mapped(&self.category(RESTING_ECG), RESTING_ECG_MAP) * 0.5
                    + mapped(&self.category(ST_SLOPE), ST_SLOPE_MAP) * 0.5
            }
            Category::FunctionalStatus | Category::MedicationUse => 0.0,
        }
    }

    fn raw(&self, entry: &FieldDefault) -> Option<&FieldValue> {
        let p = self.patient;
        match entry.source {
            Source::PatientInfo => p.patient_info.get(entry.field),
            Source::Vitals => p.vitals.get(entry.field),
            Source::LabResults => p.lab_results.get(entry.field),
            Source::ManualData => p.manual_data.get(entry.field),
            Source::Anomalies => p
                .anomalies
                .iter()
                .find(|a| a.test_name == entry.field)
                .map(|a| &a.result),
        }
    }

    fn number(&self, field: &str) -> f64 {
        let Some(entry) = field_default(field) else {
            return 0.0;
        };
        let fallback = match entry.default {
            DefaultValue::Number(n) => n,
            DefaultValue::Category(_) => 0.0,
        };
        match self.raw(entry) {
            Some(value) => value
                .as_number()
                .filter(|n| n.abs() <= MAX_READING)
                .unwrap_or_else(|| {
                    tracing::debug!("Unreadable {} {:?}, using {}", field, value, fallback);
                    fallback
                }),
            None => fallback,
        }
    }

    fn category(&self, field: &str) -> String {
        let Some(entry) = field_default(field) else {
            return String::new();
        };
        let fallback = match entry.default {
            DefaultValue::Category(c) => c,
            DefaultValue::Number(_) => "",
        };
        self.raw(entry)
            .and_then(FieldValue::as_category)
            .unwrap_or(fallback)
            .to_string()
    }
}
