pub mod audit;
pub mod balance;
pub mod fund;
pub mod transaction;

pub use audit::AuditEntry;
pub use fund::{BudgetLineItem, Entity, Fund, FundStatus};
pub use transaction::{
    ChainStatus, NewTransaction, Transaction, TransactionStatus, TransactionType, WorkflowAction,
};
