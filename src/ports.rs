//! Storage boundary for the ledger core.
//!
//! Every mutation goes through a [`UnitOfWork`]: one storage transaction whose row
//! locks are held from the first `lock_*` call until `commit` or `rollback`.
//! [`in_unit_of_work`] makes that boundary explicit at the call site.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{
    AuditEntry, BudgetLineItem, ChainStatus, Entity, Fund, Transaction, TransactionStatus, TransactionType,
};
use crate::error::LedgerResult;

pub const DEFAULT_PAGE_LIMIT: u32 = 20;
pub const MAX_PAGE_LIMIT: u32 = 100;

/// A transaction with every aggregate it references.
#[derive(Debug, Clone, Serialize)]
pub struct TransactionDetails {
    pub transaction: Transaction,
    pub fund: Fund,
    pub budget_line_item: Option<BudgetLineItem>,
    pub source: Entity,
    pub destination: Entity,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TransactionFilter {
    pub transaction_type: Option<TransactionType>,
    pub status: Option<TransactionStatus>,
    pub fund_id: Option<Uuid>,
    pub source_id: Option<Uuid>,
    pub destination_id: Option<Uuid>,
    /// Matches either side of the transfer.
    pub entity_id: Option<Uuid>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub ai_flagged: Option<bool>,
}

impl TransactionFilter {
    pub fn matches(&self, tx: &Transaction) -> bool {
        self.transaction_type.map_or(true, |t| tx.transaction_type == t)
            && self.status.map_or(true, |s| tx.status == s)
            && self.fund_id.map_or(true, |id| tx.fund_id == id)
            && self.source_id.map_or(true, |id| tx.source_id == id)
            && self.destination_id.map_or(true, |id| tx.destination_id == id)
            && self
                .entity_id
                .map_or(true, |id| tx.source_id == id || tx.destination_id == id)
            && self.created_after.map_or(true, |after| tx.created_at >= after)
            && self.created_before.map_or(true, |before| tx.created_at <= before)
            && self.ai_flagged.map_or(true, |flagged| tx.ai_flagged == flagged)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Page {
    pub page: u32,
    pub limit: u32,
}

impl Page {
    /// Clamps to a 1-based page and a limit in `1..=MAX_PAGE_LIMIT`.
    pub fn new(page: u32, limit: u32) -> Self {
        Self {
            page: page.max(1),
            limit: limit.clamp(1, MAX_PAGE_LIMIT),
        }
    }

    pub fn offset(&self) -> i64 {
        (i64::from(self.page) - 1) * i64::from(self.limit)
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(1, DEFAULT_PAGE_LIMIT)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TransactionPage {
    pub items: Vec<Transaction>,
    pub total: i64,
    pub page: u32,
    pub limit: u32,
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn begin(&self) -> LedgerResult<Box<dyn UnitOfWork>>;

    async fn find_fund(&self, id: Uuid) -> LedgerResult<Option<Fund>>;

    async fn find_line_item(&self, id: Uuid) -> LedgerResult<Option<BudgetLineItem>>;

    async fn find_entity(&self, id: Uuid) -> LedgerResult<Option<Entity>>;

    async fn read_transaction(&self, id: Uuid) -> LedgerResult<TransactionDetails>;

    async fn list_transactions(
        &self,
        filter: &TransactionFilter,
        page: Page,
    ) -> LedgerResult<TransactionPage>;

    /// Stores the outcome of a successful anchoring. `None` keeps the current chain status.
    async fn record_anchor(
        &self,
        id: Uuid,
        chain_tx_hash: &str,
        chain_status: Option<ChainStatus>,
    ) -> LedgerResult<()>;

    /// Audit rows for one entity, oldest first.
    async fn audit_trail(&self, entity_id: Uuid) -> LedgerResult<Vec<AuditEntry>>;

    async fn ping(&self) -> LedgerResult<()>;

    /// Persists a completed transaction with its fund and line item, all or nothing.
    async fn complete_atomic(
        &self,
        transaction: &Transaction,
        fund: &Fund,
        line_item: Option<&BudgetLineItem>,
    ) -> LedgerResult<()> {
        let mut uow = self.begin().await?;
        let written = uow.write_completion(transaction, fund, line_item).await;
        finish(uow, written).await
    }
}

#[async_trait]
pub trait UnitOfWork: Send {
    async fn insert_transaction(&mut self, transaction: &Transaction) -> LedgerResult<()>;

    /// Reads and row-locks a transaction. `NotFound` if it does not exist.
    async fn lock_transaction(&mut self, id: Uuid) -> LedgerResult<Transaction>;

    async fn lock_fund(&mut self, id: Uuid) -> LedgerResult<Fund>;

    async fn lock_line_item(&mut self, id: Uuid) -> LedgerResult<BudgetLineItem>;

    async fn update_transaction(&mut self, transaction: &Transaction) -> LedgerResult<()>;

    async fn update_fund(&mut self, fund: &Fund) -> LedgerResult<()>;

    async fn update_line_item(&mut self, item: &BudgetLineItem) -> LedgerResult<()>;

    async fn insert_audit(&mut self, entry: &AuditEntry) -> LedgerResult<()>;

    async fn write_completion(
        &mut self,
        transaction: &Transaction,
        fund: &Fund,
        line_item: Option<&BudgetLineItem>,
    ) -> LedgerResult<()> {
        self.update_fund(fund).await?;
        if let Some(item) = line_item {
            self.update_line_item(item).await?;
        }
        self.update_transaction(transaction).await
    }

    async fn commit(self: Box<Self>) -> LedgerResult<()>;

    async fn rollback(self: Box<Self>) -> LedgerResult<()>;
}

/// Runs `work` inside one storage transaction: commits on `Ok`, rolls back on `Err`.
///
/// ```ignore
/// in_unit_of_work(store, move |uow| Box::pin(async move {
///     let mut tx = uow.lock_transaction(id).await?;
///     tx.approve(approver_id)?;
///     uow.update_transaction(&tx).await?;
///     Ok(tx)
/// }))
/// .await
/// ```
pub async fn in_unit_of_work<T, F>(store: &dyn LedgerStore, work: F) -> LedgerResult<T>
where
    T: Send,
    F: for<'u> FnOnce(&'u mut dyn UnitOfWork) -> BoxFuture<'u, LedgerResult<T>> + Send,
{
    let mut uow = store.begin().await?;
    let scope: &mut dyn UnitOfWork = &mut *uow;
    let outcome = work(scope).await;
    finish(uow, outcome).await
}

async fn finish<T>(uow: Box<dyn UnitOfWork>, outcome: LedgerResult<T>) -> LedgerResult<T> {
    match outcome {
        Ok(value) => {
            uow.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = uow.rollback().await {
                tracing::warn!(error = %rollback_err, "Rollback failed after {}", err);
            }
            Err(err)
        }
    }
}
