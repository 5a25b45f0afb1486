#![forbid(unsafe_code)]

//! Core domain model and business logic for the MediSynth records system.
//!
//! This crate provides:
//! - Domain types (patients, resources, staff, clinical fields)
//! - Record stores (in-memory and JSON file backed)
//! - The allocation ledger and its transactional relationship edits
//! - Criticality scoring
//! - Clinical intake, consistency audit and roster export

pub mod types;
pub mod error;
pub mod config;
pub mod logging;
pub mod store;
pub mod json_store;
pub mod edit;
pub mod ledger;
pub mod criticality;
pub mod intake;
pub mod audit;
pub mod roster;

#[cfg(test)]
mod test_support;

// Re-export commonly used types
pub use error::{Error, Result};
pub use types::*;
pub use config::{Config, StoreBackend};
pub use store::{MemoryStore, RecordStore};
pub use json_store::JsonStore;
pub use ledger::{Ledger, RemovalReport, SkippedRef};
pub use criticality::{score, CriticalityAssessment};
pub use intake::LabExtraction;
pub use audit::Inconsistency;
pub use roster::write_roster;
