//! Transaction domain entity and its approval workflow.
//! Framework-agnostic; persistence adapters map rows into these types.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult};
use crate::validation::{self, DESCRIPTION_MAX_LEN, DOCUMENT_REF_MAX_LEN};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    /// Funds allocated from the envelope to a department or line item.
    Allocation,
    /// Funds paid out to a project or contractor.
    Disbursement,
    /// Funds spent by the responsible entity.
    Expenditure,
    /// Unused allocation handed back to the fund.
    Returns,
}

impl TransactionType {
    pub const ALL: [TransactionType; 4] = [
        TransactionType::Allocation,
        TransactionType::Disbursement,
        TransactionType::Expenditure,
        TransactionType::Returns,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Allocation => "ALLOCATION",
            TransactionType::Disbursement => "DISBURSEMENT",
            TransactionType::Expenditure => "EXPENDITURE",
            TransactionType::Returns => "RETURNS",
        }
    }

    /// Types that draw down the fund and are checked against the available balance at creation.
    pub fn draws_down(&self) -> bool {
        matches!(
            self,
            TransactionType::Disbursement | TransactionType::Expenditure
        )
    }

    /// Numeric code used by the on-chain fund manager contract.
    pub fn chain_code(&self) -> u8 {
        match self {
            TransactionType::Allocation => 0,
            TransactionType::Disbursement => 1,
            TransactionType::Expenditure => 2,
            TransactionType::Returns => 3,
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionType {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TransactionType::ALL
            .into_iter()
            .find(|candidate| candidate.as_str() == s)
            .ok_or_else(|| {
                LedgerError::Validation(format!(
                    "transaction_type: must be one of ALLOCATION, DISBURSEMENT, EXPENDITURE, RETURNS (got {})",
                    s
                ))
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Approved,
    Rejected,
    Flagged,
    Completed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::Approved => "APPROVED",
            TransactionStatus::Rejected => "REJECTED",
            TransactionStatus::Flagged => "FLAGGED",
            TransactionStatus::Completed => "COMPLETED",
        }
    }

    /// Returns the status `action` leads to, or `InvalidState` if it is not legal from here.
    pub fn after(self, action: WorkflowAction) -> LedgerResult<TransactionStatus> {
        use TransactionStatus::*;

        let next = match (action, self) {
            (WorkflowAction::Approve, Pending | Flagged) => Approved,
            (WorkflowAction::Reject, Pending | Flagged) => Rejected,
            (WorkflowAction::Flag, Pending) => Flagged,
            (WorkflowAction::Complete, Approved) => Completed,
            _ => {
                return Err(LedgerError::InvalidState {
                    action: action.as_str(),
                    status: self,
                })
            }
        };

        Ok(next)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(TransactionStatus::Pending),
            "APPROVED" => Ok(TransactionStatus::Approved),
            "REJECTED" => Ok(TransactionStatus::Rejected),
            "FLAGGED" => Ok(TransactionStatus::Flagged),
            "COMPLETED" => Ok(TransactionStatus::Completed),
            other => Err(LedgerError::Validation(format!(
                "status: unknown transaction status {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowAction {
    Approve,
    Reject,
    Flag,
    Complete,
}

impl WorkflowAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowAction::Approve => "approve",
            WorkflowAction::Reject => "reject",
            WorkflowAction::Flag => "flag",
            WorkflowAction::Complete => "complete",
        }
    }
}

/// Last workflow stage that was successfully anchored on chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainStatus {
    #[default]
    None,
    Recorded,
    Approved,
    Rejected,
    Completed,
}

impl ChainStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChainStatus::None => "none",
            ChainStatus::Recorded => "recorded",
            ChainStatus::Approved => "approved",
            ChainStatus::Rejected => "rejected",
            ChainStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for ChainStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChainStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(ChainStatus::None),
            "recorded" => Ok(ChainStatus::Recorded),
            "approved" => Ok(ChainStatus::Approved),
            "rejected" => Ok(ChainStatus::Rejected),
            "completed" => Ok(ChainStatus::Completed),
            other => Err(LedgerError::Storage(format!(
                "unknown chain status {}",
                other
            ))),
        }
    }
}

/// Input for a new transaction proposal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTransaction {
    pub transaction_type: TransactionType,
    pub amount: BigDecimal,
    pub currency: String,
    #[serde(default)]
    pub description: String,
    pub source_id: Uuid,
    pub destination_id: Uuid,
    pub fund_id: Uuid,
    #[serde(default)]
    pub budget_line_item_id: Option<Uuid>,
    #[serde(default)]
    pub document_ref: Option<String>,
}

impl NewTransaction {
    /// Checks the self-contained fields and normalizes free text.
    /// Reference checks need the store and happen in the workflow.
    pub fn validated(mut self) -> LedgerResult<Self> {
        validation::validate_positive_amount(&self.amount)?;

        self.currency = validation::sanitize_string(&self.currency);
        validation::validate_currency(&self.currency)?;

        self.description = validation::sanitize_string(&self.description);
        validation::validate_max_len("description", &self.description, DESCRIPTION_MAX_LEN)?;

        self.document_ref = self
            .document_ref
            .map(|doc| validation::sanitize_string(&doc))
            .filter(|doc| !doc.is_empty());
        if let Some(doc) = &self.document_ref {
            validation::validate_max_len("document_ref", doc, DOCUMENT_REF_MAX_LEN)?;
        }

        Ok(self)
    }
}

/// Domain entity representing a proposed movement of funds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub transaction_type: TransactionType,
    pub amount: BigDecimal,
    pub currency: String,
    pub description: String,
    pub status: TransactionStatus,
    pub source_id: Uuid,
    pub destination_id: Uuid,
    pub fund_id: Uuid,
    pub budget_line_item_id: Option<Uuid>,
    pub document_ref: Option<String>,
    pub created_by_id: Uuid,
    pub approved_by_id: Option<Uuid>,
    pub rejected_by_id: Option<Uuid>,
    pub rejection_reason: Option<String>,
    pub reviewed_by_id: Option<Uuid>,
    pub ai_flagged: bool,
    pub ai_score: Option<f64>,
    pub ai_reason: Option<String>,
    pub chain_tx_hash: Option<String>,
    pub chain_status: ChainStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    pub fn new(input: NewTransaction, created_by_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            transaction_type: input.transaction_type,
            amount: input.amount,
            currency: input.currency,
            description: input.description,
            status: TransactionStatus::Pending,
            source_id: input.source_id,
            destination_id: input.destination_id,
            fund_id: input.fund_id,
            budget_line_item_id: input.budget_line_item_id,
            document_ref: input.document_ref,
            created_by_id,
            approved_by_id: None,
            rejected_by_id: None,
            rejection_reason: None,
            reviewed_by_id: None,
            ai_flagged: false,
            ai_score: None,
            ai_reason: None,
            chain_tx_hash: None,
            chain_status: ChainStatus::None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn approve(&mut self, approver_id: Uuid) -> LedgerResult<()> {
        self.status = self.status.after(WorkflowAction::Approve)?;
        self.approved_by_id = Some(approver_id);
        self.touch();
        Ok(())
    }

    pub fn reject(&mut self, rejected_by_id: Uuid, reason: String) -> LedgerResult<()> {
        self.status = self.status.after(WorkflowAction::Reject)?;
        self.rejected_by_id = Some(rejected_by_id);
        self.rejection_reason = Some(reason);
        self.touch();
        Ok(())
    }

    pub fn flag(&mut self, reason: String, score: f64) -> LedgerResult<()> {
        self.status = self.status.after(WorkflowAction::Flag)?;
        self.ai_flagged = true;
        self.ai_score = Some(score);
        self.ai_reason = Some(reason);
        self.touch();
        Ok(())
    }

    pub fn complete(&mut self) -> LedgerResult<()> {
        self.status = self.status.after(WorkflowAction::Complete)?;
        self.touch();
        Ok(())
    }

    pub fn review(&mut self, auditor_id: Uuid) {
        self.reviewed_by_id = Some(auditor_id);
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
