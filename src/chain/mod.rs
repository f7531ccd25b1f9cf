//! Best-effort anchoring of workflow events onto an external append-only ledger.
//!
//! The anchor runs strictly after the local commit. Its errors are reported to the
//! caller's logs and never turned into a [`crate::error::LedgerError`].

pub mod client;
pub mod commitment;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{ChainStatus, Transaction, TransactionType};

pub use client::{ChainAnchor, ChainAnchorConfig};

#[derive(Error, Debug)]
pub enum AnchorError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("Invalid response from anchoring gateway: {0}")]
    InvalidResponse(String),
    #[error("Circuit breaker open: {0}")]
    CircuitBreakerOpen(String),
    #[error("Anchoring timed out after {0:?}")]
    Timeout(Duration),
    #[error("Encoding failed: {0}")]
    Encoding(String),
    #[error("Chain anchoring is disabled")]
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Created,
    Approved,
    Rejected,
    Completed,
    Flagged,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Created => "created",
            EventKind::Approved => "approved",
            EventKind::Rejected => "rejected",
            EventKind::Completed => "completed",
            EventKind::Flagged => "flagged",
        }
    }

    /// Chain stage a successful anchor moves the transaction to. Flags are not a stage.
    pub fn chain_status(&self) -> Option<ChainStatus> {
        match self {
            EventKind::Created => Some(ChainStatus::Recorded),
            EventKind::Approved => Some(ChainStatus::Approved),
            EventKind::Rejected => Some(ChainStatus::Rejected),
            EventKind::Completed => Some(ChainStatus::Completed),
            EventKind::Flagged => None,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Economic parameters of a transaction as mirrored to the fund manager contract.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EconomicDetails {
    pub amount: BigDecimal,
    pub currency: String,
    pub transaction_type: TransactionType,
    pub description: String,
    pub source_id: Uuid,
    pub destination_id: Uuid,
    pub fund_id: Uuid,
    pub budget_line_item_id: Option<Uuid>,
    pub document_ref: Option<String>,
    pub created_by_id: Uuid,
}

impl From<&Transaction> for EconomicDetails {
    fn from(tx: &Transaction) -> Self {
        Self {
            amount: tx.amount.clone(),
            currency: tx.currency.clone(),
            transaction_type: tx.transaction_type,
            description: tx.description.clone(),
            source_id: tx.source_id,
            destination_id: tx.destination_id,
            fund_id: tx.fund_id,
            budget_line_item_id: tx.budget_line_item_id,
            document_ref: tx.document_ref.clone(),
            created_by_id: tx.created_by_id,
        }
    }
}

/// One workflow event to be anchored, built from the committed transaction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnchorEvent {
    pub transaction_id: Uuid,
    pub kind: EventKind,
    /// Acting user; `None` for anomaly flags.
    pub actor_id: Option<Uuid>,
    pub reason: Option<String>,
    pub details: EconomicDetails,
    pub occurred_at: DateTime<Utc>,
}

impl AnchorEvent {
    fn new(tx: &Transaction, kind: EventKind, actor_id: Option<Uuid>, reason: Option<String>) -> Self {
        Self {
            transaction_id: tx.id,
            kind,
            actor_id,
            reason,
            details: EconomicDetails::from(tx),
            occurred_at: tx.updated_at,
        }
    }

    pub fn created(tx: &Transaction) -> Self {
        Self::new(tx, EventKind::Created, Some(tx.created_by_id), None)
    }

    pub fn approved(tx: &Transaction, approver_id: Uuid) -> Self {
        Self::new(tx, EventKind::Approved, Some(approver_id), None)
    }

    pub fn rejected(tx: &Transaction, rejected_by_id: Uuid) -> Self {
        Self::new(tx, EventKind::Rejected, Some(rejected_by_id), tx.rejection_reason.clone())
    }

    /// Completion carries no actor of its own and is attributed to the creator.
    pub fn completed(tx: &Transaction) -> Self {
        Self::new(tx, EventKind::Completed, Some(tx.created_by_id), None)
    }

    pub fn flagged(tx: &Transaction) -> Self {
        Self::new(tx, EventKind::Flagged, None, tx.ai_reason.clone())
    }
}

/// Externally verifiable record of one anchored event. Produced, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChainRecord {
    pub transaction_id: Uuid,
    pub event: EventKind,
    pub actor_hash: Option<String>,
    pub details_hash: Option<String>,
    /// Free text stored next to the event, e.g. the flag reason.
    pub metadata: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub chain_tx_hash: String,
}

#[async_trait]
pub trait Anchor: Send + Sync {
    async fn anchor(&self, event: &AnchorEvent) -> Result<ChainRecord, AnchorError>;

    /// Secondary copy of an already anchored event. Runs after `anchor` has been
    /// recorded locally, under its own time bound.
    async fn mirror(&self, _event: &AnchorEvent, _record: &ChainRecord) -> Result<(), AnchorError> {
        Ok(())
    }
}

/// Used when no chain endpoint is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledAnchor;

#[async_trait]
impl Anchor for DisabledAnchor {
    async fn anchor(&self, _event: &AnchorEvent) -> Result<ChainRecord, AnchorError> {
        Err(AnchorError::Disabled)
    }
}
