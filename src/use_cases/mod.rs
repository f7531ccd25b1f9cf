//! Application use cases.
//! Orchestrate domain logic and storage/chain ports; no framework code here.

pub mod flag_intake;
pub mod transaction_workflow;

pub use flag_intake::{AnomalyVerdict, FlagIntake, FlagOutcome};
pub use transaction_workflow::{TransactionStateMachine, DEFAULT_ANCHOR_TIMEOUT};
