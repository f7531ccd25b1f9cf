//! Transaction approval workflow.
//!
//! Every status change runs inside one unit of work: the transaction row is locked,
//! the precondition is checked, and the new status is written before commit.
//! Completion additionally locks the fund and line item and applies the balance
//! delta and writes its audit row in the same commit. Anchoring happens only after
//! the commit returns.

use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::chain::{Anchor, AnchorError, AnchorEvent, ChainRecord};
use crate::domain::balance::{apply_delta, ensure_available};
use crate::domain::{AuditEntry, Fund, FundStatus, NewTransaction, Transaction, WorkflowAction};
use crate::error::{LedgerError, LedgerResult};
use crate::ports::{
    in_unit_of_work, LedgerStore, Page, TransactionDetails, TransactionFilter, TransactionPage,
};
use crate::validation;

pub const DEFAULT_ANCHOR_TIMEOUT: Duration = Duration::from_secs(5);

pub struct TransactionStateMachine {
    store: Arc<dyn LedgerStore>,
    anchor: Arc<dyn Anchor>,
    anchor_timeout: Duration,
}

impl TransactionStateMachine {
    pub fn new(store: Arc<dyn LedgerStore>, anchor: Arc<dyn Anchor>, anchor_timeout: Duration) -> Self {
        Self {
            store,
            anchor,
            anchor_timeout,
        }
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    pub async fn create(&self, input: NewTransaction, actor_id: Uuid) -> LedgerResult<Transaction> {
        tracing::info!(
            fund_id = %input.fund_id,
            transaction_type = %input.transaction_type,
            amount = %input.amount,
            actor_id = %actor_id,
            "Creating transaction"
        );

        let input = input.validated()?;
        let fund = self.check_references(&input).await?;
        if let Err(err) = ensure_available(&fund, input.transaction_type, &input.amount) {
            tracing::warn!(fund_id = %fund.id, error = %err, "Transaction exceeds available balance");
            return Err(err);
        }

        let tx = Transaction::new(input, actor_id);
        let tx = in_unit_of_work(self.store.as_ref(), move |uow| {
            Box::pin(async move {
                uow.insert_transaction(&tx).await?;
                Ok(tx)
            })
        })
        .await?;

        tracing::info!(transaction_id = %tx.id, "Transaction created");
        let event = AnchorEvent::created(&tx);
        Ok(self.anchor_event(tx, event).await)
    }

    pub async fn approve(&self, id: Uuid, approver_id: Uuid) -> LedgerResult<Transaction> {
        tracing::info!(transaction_id = %id, approver_id = %approver_id, "Approving transaction");

        let tx = self
            .transition(id, WorkflowAction::Approve.as_str(), move |tx| tx.approve(approver_id))
            .await?;
        let event = AnchorEvent::approved(&tx, approver_id);
        Ok(self.anchor_event(tx, event).await)
    }

    pub async fn reject(&self, id: Uuid, actor_id: Uuid, reason: &str) -> LedgerResult<Transaction> {
        tracing::info!(transaction_id = %id, actor_id = %actor_id, "Rejecting transaction");

        let reason = validation::sanitize_string(reason);
        validation::validate_reason(&reason)?;

        let tx = self
            .transition(id, WorkflowAction::Reject.as_str(), move |tx| tx.reject(actor_id, reason))
            .await?;
        let event = AnchorEvent::rejected(&tx, actor_id);
        Ok(self.anchor_event(tx, event).await)
    }

    /// Applies the balance delta and marks the transaction COMPLETED in one commit.
    pub async fn complete(&self, id: Uuid) -> LedgerResult<Transaction> {
        tracing::info!(transaction_id = %id, "Completing transaction");

        let result = in_unit_of_work(self.store.as_ref(), move |uow| {
            Box::pin(async move {
                let mut tx = uow.lock_transaction(id).await?;
                tx.status.after(WorkflowAction::Complete)?;

                let fund = uow.lock_fund(tx.fund_id).await?;
                let line_item = match tx.budget_line_item_id {
                    Some(item_id) => Some(uow.lock_line_item(item_id).await?),
                    None => None,
                };

                let applied = apply_delta(&fund, line_item.as_ref(), tx.transaction_type, &tx.amount)?;
                tx.complete()?;
                uow.write_completion(&tx, &applied.fund, applied.line_item.as_ref())
                    .await?;
                uow.insert_audit(&AuditEntry::completed(&tx)).await?;
                Ok(tx)
            })
        })
        .await;

        let tx = match result {
            Ok(tx) => tx,
            Err(err) => {
                tracing::warn!(transaction_id = %id, error = %err, "Completion rejected");
                return Err(err);
            }
        };

        tracing::info!(
            transaction_id = %tx.id,
            fund_id = %tx.fund_id,
            transaction_type = %tx.transaction_type,
            amount = %tx.amount,
            "Transaction completed"
        );
        let event = AnchorEvent::completed(&tx);
        Ok(self.anchor_event(tx, event).await)
    }

    pub async fn audit_trail(&self, id: Uuid) -> LedgerResult<Vec<AuditEntry>> {
        self.store.audit_trail(id).await
    }

    /// Only reached through anomaly intake.
    pub async fn flag(&self, id: Uuid, reason: &str, score: f64) -> LedgerResult<Transaction> {
        tracing::info!(transaction_id = %id, score, "Flagging transaction");

        let reason = validation::sanitize_string(reason);
        validation::validate_reason(&reason)?;
        validation::validate_anomaly_score(score)?;

        let tx = self
            .transition(id, WorkflowAction::Flag.as_str(), move |tx| tx.flag(reason, score))
            .await?;
        let event = AnchorEvent::flagged(&tx);
        Ok(self.anchor_event(tx, event).await)
    }

    /// Records the reviewing auditor. No status, balance or chain effect.
    pub async fn review(&self, id: Uuid, auditor_id: Uuid) -> LedgerResult<Transaction> {
        tracing::info!(transaction_id = %id, auditor_id = %auditor_id, "Reviewing transaction");

        self.transition(id, "review", move |tx| {
            tx.review(auditor_id);
            Ok(())
        })
        .await
    }

    pub async fn read(&self, id: Uuid) -> LedgerResult<TransactionDetails> {
        self.store.read_transaction(id).await
    }

    pub async fn list(&self, filter: &TransactionFilter, page: Page) -> LedgerResult<TransactionPage> {
        self.store.list_transactions(filter, page).await
    }

    /// Resolves the referenced fund after checking every reference exists and fits.
    async fn check_references(&self, input: &NewTransaction) -> LedgerResult<Fund> {
        let fund = self.store.find_fund(input.fund_id).await?.ok_or_else(|| {
            LedgerError::Validation(format!("fund_id: fund {} does not exist", input.fund_id))
        })?;
        if fund.status != FundStatus::Active {
            return Err(LedgerError::Validation(format!(
                "fund_id: fund {} is {}",
                fund.id, fund.status
            )));
        }

        for (field, entity_id) in [
            ("source_id", input.source_id),
            ("destination_id", input.destination_id),
        ] {
            if self.store.find_entity(entity_id).await?.is_none() {
                return Err(LedgerError::Validation(format!(
                    "{}: entity {} does not exist",
                    field, entity_id
                )));
            }
        }

        if let Some(item_id) = input.budget_line_item_id {
            let item = self.store.find_line_item(item_id).await?.ok_or_else(|| {
                LedgerError::Validation(format!(
                    "budget_line_item_id: line item {} does not exist",
                    item_id
                ))
            })?;
            if item.fund_id != fund.id {
                return Err(LedgerError::Validation(format!(
                    "budget_line_item_id: line item {} does not belong to fund {}",
                    item_id, fund.id
                )));
            }
        }

        Ok(fund)
    }

    /// Locks the transaction, applies `apply` and writes it back in one unit of work.
    async fn transition<F>(&self, id: Uuid, action: &'static str, apply: F) -> LedgerResult<Transaction>
    where
        F: FnOnce(&mut Transaction) -> LedgerResult<()> + Send + 'static,
    {
        let result = in_unit_of_work(self.store.as_ref(), move |uow| {
            Box::pin(async move {
                let mut tx = uow.lock_transaction(id).await?;
                apply(&mut tx)?;
                uow.update_transaction(&tx).await?;
                Ok(tx)
            })
        })
        .await;

        match result {
            Ok(tx) => {
                tracing::info!(transaction_id = %id, action, status = %tx.status, "Transaction updated");
                Ok(tx)
            }
            Err(err) => {
                tracing::warn!(transaction_id = %id, action, error = %err, "Transition rejected");
                Err(err)
            }
        }
    }

    /// Best effort: failures are logged and the committed transaction is returned as is.
    async fn anchor_event(&self, mut tx: Transaction, event: AnchorEvent) -> Transaction {
        let outcome = match tokio::time::timeout(self.anchor_timeout, self.anchor.anchor(&event)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(AnchorError::Timeout(self.anchor_timeout)),
        };

        let record = match outcome {
            Ok(record) => record,
            Err(AnchorError::Disabled) => {
                tracing::debug!(transaction_id = %tx.id, event = %event.kind, "Chain anchoring disabled");
                return tx;
            }
            Err(err) => {
                tracing::error!(
                    transaction_id = %tx.id,
                    event = %event.kind,
                    error = %err,
                    "Chain anchoring failed"
                );
                return tx;
            }
        };

        let chain_status = event.kind.chain_status();
        if let Err(err) = self
            .store
            .record_anchor(tx.id, &record.chain_tx_hash, chain_status)
            .await
        {
            tracing::error!(
                transaction_id = %tx.id,
                event = %event.kind,
                chain_tx_hash = %record.chain_tx_hash,
                error = %err,
                "Anchored event could not be recorded locally"
            );
            return tx;
        }

        tracing::info!(
            transaction_id = %tx.id,
            event = %event.kind,
            chain_tx_hash = %record.chain_tx_hash,
            "Event anchored"
        );
        tx.chain_tx_hash = Some(record.chain_tx_hash.clone());
        if let Some(status) = chain_status {
            tx.chain_status = status;
        }

        self.mirror_event(&event, &record).await;
        tx
    }

    /// Runs after the primary anchor is recorded, so a slow mirror cannot undo it.
    async fn mirror_event(&self, event: &AnchorEvent, record: &ChainRecord) {
        let outcome = match tokio::time::timeout(self.anchor_timeout, self.anchor.mirror(event, record)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(AnchorError::Timeout(self.anchor_timeout)),
        };

        if let Err(err) = outcome {
            tracing::warn!(
                transaction_id = %event.transaction_id,
                event = %event.kind,
                error = %err,
                "Chain mirror failed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryLedgerStore;
    use crate::chain::DisabledAnchor;
    use crate::domain::{BudgetLineItem, ChainStatus, Entity, TransactionStatus, TransactionType};
    use bigdecimal::BigDecimal;

    struct Fixture {
        store: InMemoryLedgerStore,
        workflow: TransactionStateMachine,
        fund: Fund,
        source: Entity,
        destination: Entity,
    }

    async fn fixture() -> Fixture {
        let store = InMemoryLedgerStore::new();
        let source = Entity::new("Treasury", "Ministry", "TRS");
        let destination = Entity::new("County Health", "Department", "CHD");
        let fund = Fund::new("Health", "HL-01", BigDecimal::from(1000), source.id);
        store.seed_entity(source.clone()).await;
        store.seed_entity(destination.clone()).await;
        store.seed_fund(fund.clone()).await;

        let workflow = TransactionStateMachine::new(
            Arc::new(store.clone()),
            Arc::new(DisabledAnchor),
            DEFAULT_ANCHOR_TIMEOUT,
        );
        Fixture {
            store,
            workflow,
            fund,
            source,
            destination,
        }
    }

    fn draft(fx: &Fixture, transaction_type: TransactionType, amount: i64) -> NewTransaction {
        NewTransaction {
            transaction_type,
            amount: BigDecimal::from(amount),
            currency: "KES".to_string(),
            description: "clinic supplies".to_string(),
            source_id: fx.source.id,
            destination_id: fx.destination.id,
            fund_id: fx.fund.id,
            budget_line_item_id: None,
            document_ref: None,
        }
    }

    #[tokio::test]
    async fn create_rejects_unknown_references() {
        let fx = fixture().await;

        let mut input = draft(&fx, TransactionType::Allocation, 10);
        input.destination_id = Uuid::new_v4();
        assert!(matches!(
            fx.workflow.create(input, Uuid::new_v4()).await,
            Err(LedgerError::Validation(_))
        ));

        let mut input = draft(&fx, TransactionType::Allocation, 10);
        input.fund_id = Uuid::new_v4();
        assert!(matches!(
            fx.workflow.create(input, Uuid::new_v4()).await,
            Err(LedgerError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn create_rejects_line_item_of_another_fund() {
        let fx = fixture().await;
        let other_fund = Fund::new("Water", "WT-01", BigDecimal::from(10), fx.source.id);
        let item = BudgetLineItem::new(other_fund.id, "Boreholes", "BH", BigDecimal::from(10));
        fx.store.seed_fund(other_fund).await;
        fx.store.seed_line_item(item.clone()).await;

        let mut input = draft(&fx, TransactionType::Expenditure, 5);
        input.budget_line_item_id = Some(item.id);

        assert!(matches!(
            fx.workflow.create(input, Uuid::new_v4()).await,
            Err(LedgerError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn create_rejects_inactive_fund() {
        let fx = fixture().await;
        let mut closed = fx.fund.clone();
        closed.status = FundStatus::Inactive;
        fx.store.seed_fund(closed).await;

        let result = fx
            .workflow
            .create(draft(&fx, TransactionType::Allocation, 10), Uuid::new_v4())
            .await;
        assert!(matches!(result, Err(LedgerError::Validation(_))));
    }

    #[tokio::test]
    async fn approve_reject_and_review_leave_balances_alone() {
        let fx = fixture().await;
        let creator = Uuid::new_v4();
        let auditor = Uuid::new_v4();

        let tx = fx
            .workflow
            .create(draft(&fx, TransactionType::Disbursement, 400), creator)
            .await
            .unwrap();
        assert_eq!(tx.status, TransactionStatus::Pending);
        assert_eq!(tx.chain_status, ChainStatus::None);

        let approved = fx.workflow.approve(tx.id, Uuid::new_v4()).await.unwrap();
        assert_eq!(approved.status, TransactionStatus::Approved);

        let reviewed = fx.workflow.review(tx.id, auditor).await.unwrap();
        assert_eq!(reviewed.reviewed_by_id, Some(auditor));
        assert_eq!(reviewed.status, TransactionStatus::Approved);

        let fund = fx.store.find_fund(fx.fund.id).await.unwrap().unwrap();
        assert_eq!(fund.committed(), BigDecimal::from(0));
    }

    #[tokio::test]
    async fn reject_requires_a_reason() {
        let fx = fixture().await;
        let tx = fx
            .workflow
            .create(draft(&fx, TransactionType::Allocation, 10), Uuid::new_v4())
            .await
            .unwrap();

        assert!(matches!(
            fx.workflow.reject(tx.id, Uuid::new_v4(), "   ").await,
            Err(LedgerError::Validation(_))
        ));
        let rejected = fx
            .workflow
            .reject(tx.id, Uuid::new_v4(), "duplicate request")
            .await
            .unwrap();
        assert_eq!(rejected.status, TransactionStatus::Rejected);
    }

    #[tokio::test]
    async fn unknown_transaction_is_not_found() {
        let fx = fixture().await;

        assert!(matches!(
            fx.workflow.approve(Uuid::new_v4(), Uuid::new_v4()).await,
            Err(LedgerError::NotFound(_))
        ));
        assert!(matches!(
            fx.workflow.complete(Uuid::new_v4()).await,
            Err(LedgerError::NotFound(_))
        ));
        assert!(matches!(
            fx.workflow.read(Uuid::new_v4()).await,
            Err(LedgerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn complete_moves_fund_and_line_item() {
        let fx = fixture().await;
        let item = BudgetLineItem::new(fx.fund.id, "Drugs", "DR", BigDecimal::from(500));
        fx.store.seed_line_item(item.clone()).await;

        let mut input = draft(&fx, TransactionType::Expenditure, 120);
        input.budget_line_item_id = Some(item.id);
        let tx = fx.workflow.create(input, Uuid::new_v4()).await.unwrap();
        fx.workflow.approve(tx.id, Uuid::new_v4()).await.unwrap();
        let done = fx.workflow.complete(tx.id).await.unwrap();
        assert_eq!(done.status, TransactionStatus::Completed);

        let details = fx.workflow.read(tx.id).await.unwrap();
        assert_eq!(details.fund.utilized, BigDecimal::from(120));
        assert_eq!(
            details.budget_line_item.map(|item| item.utilized),
            Some(BigDecimal::from(120))
        );
    }
}
