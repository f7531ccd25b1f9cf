//! Append-only audit trail rows written alongside workflow changes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use super::Transaction;

pub const TRANSACTION_COMPLETED: &str = "TRANSACTION_COMPLETED";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub actor_id: Option<Uuid>,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub detail: Value,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    /// Completion carries no actor of its own; the creator is recorded.
    pub fn completed(tx: &Transaction) -> Self {
        Self {
            id: Uuid::new_v4(),
            actor_id: Some(tx.created_by_id),
            action: TRANSACTION_COMPLETED.to_string(),
            entity_type: "Transaction".to_string(),
            entity_id: tx.id,
            detail: json!({
                "transaction_type": tx.transaction_type.as_str(),
                "amount": tx.amount.to_string(),
                "currency": tx.currency,
                "fund_id": tx.fund_id,
                "budget_line_item_id": tx.budget_line_item_id,
            }),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{NewTransaction, TransactionType};
    use bigdecimal::BigDecimal;

    #[test]
    fn completion_entry_describes_the_balance_effect() {
        let creator = Uuid::new_v4();
        let tx = Transaction::new(
            NewTransaction {
                transaction_type: TransactionType::Disbursement,
                amount: "250.50".parse::<BigDecimal>().unwrap(),
                currency: "KES".to_string(),
                description: "clinic supplies".to_string(),
                source_id: Uuid::new_v4(),
                destination_id: Uuid::new_v4(),
                fund_id: Uuid::new_v4(),
                budget_line_item_id: None,
                document_ref: None,
            },
            creator,
        );

        let entry = AuditEntry::completed(&tx);
        assert_eq!(entry.action, TRANSACTION_COMPLETED);
        assert_eq!(entry.entity_id, tx.id);
        assert_eq!(entry.actor_id, Some(creator));
        assert_eq!(entry.detail["transaction_type"], "DISBURSEMENT");
        assert_eq!(entry.detail["amount"], "250.50");
        assert_eq!(entry.detail["budget_line_item_id"], Value::Null);
    }
}
