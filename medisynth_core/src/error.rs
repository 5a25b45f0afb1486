//! Error types for the medisynth_core library.

use crate::EntityKind;
use std::io;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for medisynth_core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A patient, resource or staff record does not exist
    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: String },

    /// A record with the same identifier already exists
    #[error("{kind} already exists: {id}")]
    AlreadyExists { kind: EntityKind, id: String },

    /// Resource has no free capacity left
    #[error("Resource not available: {resource_id}")]
    Unavailable { resource_id: String },

    #[error("Resource {resource_id} already allocated to patient {patient_id}")]
    AlreadyAllocated {
        patient_id: String,
        resource_id: String,
    },

    #[error("Resource {resource_id} not allocated to patient {patient_id}")]
    NotAllocated {
        patient_id: String,
        resource_id: String,
    },

    #[error("Staff {staff_id} already assigned to patient {patient_id}")]
    AlreadyAssigned {
        patient_id: String,
        staff_id: String,
    },

    #[error("Staff {staff_id} not assigned to patient {patient_id}")]
    NotAssigned {
        patient_id: String,
        staff_id: String,
    },

    /// A back-reference is present on one side only, or counters disagree
    #[error("Inconsistent state: {0}")]
    InconsistentState(String),

    /// Input record rejected before it reached the store
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// Record store refused or failed an operation
    #[error("Store error: {0}")]
    Store(String),
}

impl Error {
    pub(crate) fn not_found(kind: EntityKind, id: &str) -> Self {
        Error::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// True for the relationship-level refusals a caller can act on
    /// (as opposed to infrastructure failures).
    pub fn is_domain(&self) -> bool {
        matches!(
            self,
            Error::NotFound { .. }
                | Error::AlreadyExists { .. }
                | Error::Unavailable { .. }
                | Error::AlreadyAllocated { .. }
                | Error::NotAllocated { .. }
                | Error::AlreadyAssigned { .. }
                | Error::NotAssigned { .. }
                | Error::InconsistentState(_)
                | Error::InvalidRecord(_)
        )
    }
}
