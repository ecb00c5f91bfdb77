// Racing Registry - Core Library
// Exposes all modules for use in the CLI, the API server, and tests

pub mod error;
pub mod schema;         // Field validation + lenient CSV/JSON decoding
pub mod temporal;       // Age classes as of an evaluation date
pub mod rules;          // Grade and title eligibility
pub mod db;             // SQLite schema and connection setup
pub mod audit;          // Append-only change log
pub mod entities;       // Dog, Meet, MeetResult, RaceResult, TitleType, DogTitle
pub mod stats;          // Counters and rolling average
pub mod rollup;         // Race results → meet results
pub mod reconciliation; // Awarded titles vs eligibility
pub mod config;
pub mod registry;       // Transactional mutation service
pub mod import;         // CSV meet-result loader

// Re-export commonly used types
pub use error::{RegistryError, Result};
pub use schema::{ValidationError, ValidationResult};
pub use temporal::{Age, AgeClass};
pub use rules::{Eligibility, EligibilityEvaluator, Grade, Title};
pub use audit::{ChangeLog, EditContext, Operation, Tracked};
pub use entities::{Dog, DogStatus, DogTitle, Meet, MeetResult, RaceResult, TitleType};
pub use stats::{RecomputeOutcome, StatTotals};
pub use rollup::MeetRollup;
pub use reconciliation::{ReconciliationPlan, ReconciliationReport, TitleReconciler};
pub use config::{ConfigError, ReconcilePolicy, RegistryConfig};
pub use registry::{RaceChange, Registry, RefreshOutcome, ResultChange};
pub use import::{ImportMode, ImportSummary, RowError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
