//! Anomaly intake: turns a detector verdict into a Flag transition.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::{Transaction, TransactionStatus};
use crate::error::{LedgerError, LedgerResult};
use crate::use_cases::TransactionStateMachine;
use crate::validation;

/// Verdict as posted by the anomaly detection service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyVerdict {
    pub transaction_id: Uuid,
    pub is_anomaly: bool,
    pub anomaly_score: f64,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FlagOutcome {
    Flagged(Transaction),
    /// The transaction had already left PENDING.
    Ignored { status: TransactionStatus },
    NotAnomalous,
}

pub struct FlagIntake {
    workflow: Arc<TransactionStateMachine>,
}

impl FlagIntake {
    pub fn new(workflow: Arc<TransactionStateMachine>) -> Self {
        Self { workflow }
    }

    pub async fn receive(&self, verdict: AnomalyVerdict) -> LedgerResult<FlagOutcome> {
        validation::validate_anomaly_score(verdict.anomaly_score)?;

        if !verdict.is_anomaly {
            tracing::debug!(transaction_id = %verdict.transaction_id, "Verdict is not an anomaly");
            return Ok(FlagOutcome::NotAnomalous);
        }

        // The status check happens under the row lock inside flag; losing a race to
        // an approver surfaces as InvalidState and is not an error for the detector.
        match self
            .workflow
            .flag(verdict.transaction_id, &verdict.reason, verdict.anomaly_score)
            .await
        {
            Ok(tx) => Ok(FlagOutcome::Flagged(tx)),
            Err(LedgerError::InvalidState { status, .. }) => {
                tracing::info!(
                    transaction_id = %verdict.transaction_id,
                    status = %status,
                    "Transaction is no longer pending; anomaly verdict ignored"
                );
                Ok(FlagOutcome::Ignored { status })
            }
            Err(err) => Err(err),
        }
    }
}
