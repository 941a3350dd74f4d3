//! spendtrack-core: shared types and pure logic for the spend pipeline

pub mod budget;
pub mod config;
pub mod error;
pub mod retry;
pub mod transaction;
pub mod validate;

pub use budget::{BudgetGate, GateDecision, RateBudget, UnmeteredGate};
pub use config::{CategoryHint, PipelineConfig, ProviderRule};
pub use error::{BackendError, ConfigError, ValidationError};
pub use retry::RetryPolicy;
pub use transaction::{Category, CoarseRecord, Transaction};
pub use validate::validate_transaction;
