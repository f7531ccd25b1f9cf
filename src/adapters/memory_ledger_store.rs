//! In-process implementation of LedgerStore.
//!
//! A unit of work takes the store-wide lock and stages its writes on a copy of the
//! state; commit swaps the copy in, anything else discards it. Used by the test
//! suites and for running the workflow without a database.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::domain::{AuditEntry, BudgetLineItem, ChainStatus, Entity, Fund, Transaction};
use crate::error::{LedgerError, LedgerResult};
use crate::ports::{
    LedgerStore, Page, TransactionDetails, TransactionFilter, TransactionPage, UnitOfWork,
};

#[derive(Debug, Clone, Default)]
struct LedgerState {
    transactions: HashMap<Uuid, Transaction>,
    funds: HashMap<Uuid, Fund>,
    line_items: HashMap<Uuid, BudgetLineItem>,
    entities: HashMap<Uuid, Entity>,
    audit_logs: Vec<AuditEntry>,
}

#[derive(Clone, Default)]
pub struct InMemoryLedgerStore {
    state: Arc<Mutex<LedgerState>>,
    fail_commits: Arc<AtomicBool>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed_entity(&self, entity: Entity) {
        self.state.lock().await.entities.insert(entity.id, entity);
    }

    pub async fn seed_fund(&self, fund: Fund) {
        self.state.lock().await.funds.insert(fund.id, fund);
    }

    pub async fn seed_line_item(&self, item: BudgetLineItem) {
        self.state.lock().await.line_items.insert(item.id, item);
    }

    /// Makes every subsequent commit fail until switched off again.
    pub fn fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn begin(&self) -> LedgerResult<Box<dyn UnitOfWork>> {
        let guard = self.state.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(InMemoryUnitOfWork {
            guard,
            staged,
            fail_commit: self.fail_commits.load(Ordering::SeqCst),
        }))
    }

    async fn find_fund(&self, id: Uuid) -> LedgerResult<Option<Fund>> {
        Ok(self.state.lock().await.funds.get(&id).cloned())
    }

    async fn find_line_item(&self, id: Uuid) -> LedgerResult<Option<BudgetLineItem>> {
        Ok(self.state.lock().await.line_items.get(&id).cloned())
    }

    async fn find_entity(&self, id: Uuid) -> LedgerResult<Option<Entity>> {
        Ok(self.state.lock().await.entities.get(&id).cloned())
    }

    async fn read_transaction(&self, id: Uuid) -> LedgerResult<TransactionDetails> {
        let state = self.state.lock().await;
        let transaction = state
            .transactions
            .get(&id)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(format!("transaction {}", id)))?;

        let fund = lookup(&state.funds, transaction.fund_id, "fund")?;
        let budget_line_item = match transaction.budget_line_item_id {
            Some(item_id) => Some(lookup(&state.line_items, item_id, "budget line item")?),
            None => None,
        };
        let source = lookup(&state.entities, transaction.source_id, "entity")?;
        let destination = lookup(&state.entities, transaction.destination_id, "entity")?;

        Ok(TransactionDetails {
            transaction,
            fund,
            budget_line_item,
            source,
            destination,
        })
    }

    async fn list_transactions(
        &self,
        filter: &TransactionFilter,
        page: Page,
    ) -> LedgerResult<TransactionPage> {
        let state = self.state.lock().await;
        let mut matching: Vec<Transaction> = state
            .transactions
            .values()
            .filter(|tx| filter.matches(tx))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = matching.len() as i64;
        let items = matching
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.limit as usize)
            .collect();

        Ok(TransactionPage {
            items,
            total,
            page: page.page,
            limit: page.limit,
        })
    }

    async fn record_anchor(
        &self,
        id: Uuid,
        chain_tx_hash: &str,
        chain_status: Option<ChainStatus>,
    ) -> LedgerResult<()> {
        let mut state = self.state.lock().await;
        let tx = state
            .transactions
            .get_mut(&id)
            .ok_or_else(|| LedgerError::NotFound(format!("transaction {}", id)))?;
        tx.chain_tx_hash = Some(chain_tx_hash.to_string());
        if let Some(status) = chain_status {
            tx.chain_status = status;
        }
        Ok(())
    }

    async fn audit_trail(&self, entity_id: Uuid) -> LedgerResult<Vec<AuditEntry>> {
        let state = self.state.lock().await;
        Ok(state
            .audit_logs
            .iter()
            .filter(|entry| entry.entity_id == entity_id)
            .cloned()
            .collect())
    }

    async fn ping(&self) -> LedgerResult<()> {
        Ok(())
    }
}

fn lookup<T: Clone>(map: &HashMap<Uuid, T>, id: Uuid, kind: &str) -> LedgerResult<T> {
    map.get(&id)
        .cloned()
        .ok_or_else(|| LedgerError::NotFound(format!("{} {}", kind, id)))
}

pub struct InMemoryUnitOfWork {
    guard: OwnedMutexGuard<LedgerState>,
    staged: LedgerState,
    fail_commit: bool,
}

#[async_trait]
impl UnitOfWork for InMemoryUnitOfWork {
    async fn insert_transaction(&mut self, transaction: &Transaction) -> LedgerResult<()> {
        if self.staged.transactions.contains_key(&transaction.id) {
            return Err(LedgerError::Storage(format!(
                "transaction {} already exists",
                transaction.id
            )));
        }
        self.staged
            .transactions
            .insert(transaction.id, transaction.clone());
        Ok(())
    }

    async fn lock_transaction(&mut self, id: Uuid) -> LedgerResult<Transaction> {
        lookup(&self.staged.transactions, id, "transaction")
    }

    async fn lock_fund(&mut self, id: Uuid) -> LedgerResult<Fund> {
        lookup(&self.staged.funds, id, "fund")
    }

    async fn lock_line_item(&mut self, id: Uuid) -> LedgerResult<BudgetLineItem> {
        lookup(&self.staged.line_items, id, "budget line item")
    }

    async fn update_transaction(&mut self, transaction: &Transaction) -> LedgerResult<()> {
        replace(&mut self.staged.transactions, transaction.id, transaction, "transaction")
    }

    async fn update_fund(&mut self, fund: &Fund) -> LedgerResult<()> {
        replace(&mut self.staged.funds, fund.id, fund, "fund")
    }

    async fn update_line_item(&mut self, item: &BudgetLineItem) -> LedgerResult<()> {
        replace(&mut self.staged.line_items, item.id, item, "budget line item")
    }

    async fn insert_audit(&mut self, entry: &AuditEntry) -> LedgerResult<()> {
        self.staged.audit_logs.push(entry.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> LedgerResult<()> {
        let InMemoryUnitOfWork {
            mut guard,
            staged,
            fail_commit,
        } = *self;
        if fail_commit {
            return Err(LedgerError::Storage("commit rejected".to_string()));
        }
        *guard = staged;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> LedgerResult<()> {
        Ok(())
    }
}

fn replace<T: Clone>(
    map: &mut HashMap<Uuid, T>,
    id: Uuid,
    value: &T,
    kind: &str,
) -> LedgerResult<()> {
    match map.get_mut(&id) {
        Some(slot) => {
            *slot = value.clone();
            Ok(())
        }
        None => Err(LedgerError::NotFound(format!("{} {}", kind, id))),
    }
}
