#![allow(dead_code)]

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::Utc;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use watchdog_ledger::adapters::InMemoryLedgerStore;
use watchdog_ledger::chain::{Anchor, AnchorError, AnchorEvent, ChainRecord, EventKind};
use watchdog_ledger::domain::{BudgetLineItem, Entity, Fund, NewTransaction, TransactionType};
use watchdog_ledger::ports::LedgerStore;
use watchdog_ledger::use_cases::TransactionStateMachine;

/// Accepts every event and remembers the kinds it saw.
#[derive(Default)]
pub struct RecordingAnchor {
    pub events: Mutex<Vec<EventKind>>,
}

impl RecordingAnchor {
    pub fn kinds(&self) -> Vec<EventKind> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl Anchor for RecordingAnchor {
    async fn anchor(&self, event: &AnchorEvent) -> Result<ChainRecord, AnchorError> {
        let mut events = self.events.lock().unwrap();
        events.push(event.kind);
        Ok(ChainRecord {
            transaction_id: event.transaction_id,
            event: event.kind,
            actor_hash: None,
            details_hash: None,
            metadata: None,
            timestamp: Utc::now(),
            chain_tx_hash: format!("0x{:04x}", events.len()),
        })
    }
}

pub struct FailingAnchor;

#[async_trait]
impl Anchor for FailingAnchor {
    async fn anchor(&self, _event: &AnchorEvent) -> Result<ChainRecord, AnchorError> {
        Err(AnchorError::Rpc {
            code: -32000,
            message: "execution reverted".to_string(),
        })
    }
}

/// Never answers within any reasonable timeout.
pub struct SlowAnchor;

#[async_trait]
impl Anchor for SlowAnchor {
    async fn anchor(&self, event: &AnchorEvent) -> Result<ChainRecord, AnchorError> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Err(AnchorError::InvalidResponse(format!(
            "late answer for {}",
            event.transaction_id
        )))
    }
}

/// Anchors immediately but never finishes mirroring.
pub struct SlowMirrorAnchor;

#[async_trait]
impl Anchor for SlowMirrorAnchor {
    async fn anchor(&self, event: &AnchorEvent) -> Result<ChainRecord, AnchorError> {
        Ok(ChainRecord {
            transaction_id: event.transaction_id,
            event: event.kind,
            actor_hash: None,
            details_hash: None,
            metadata: None,
            timestamp: Utc::now(),
            chain_tx_hash: "0xbeef".to_string(),
        })
    }

    async fn mirror(&self, _event: &AnchorEvent, _record: &ChainRecord) -> Result<(), AnchorError> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(())
    }
}

pub struct Ledger {
    pub store: InMemoryLedgerStore,
    pub workflow: Arc<TransactionStateMachine>,
    pub source: Entity,
    pub destination: Entity,
    pub fund: Fund,
}

impl Ledger {
    pub fn draft(&self, transaction_type: TransactionType, amount: i64) -> NewTransaction {
        NewTransaction {
            transaction_type,
            amount: BigDecimal::from(amount),
            currency: "KES".to_string(),
            description: "ward renovation".to_string(),
            source_id: self.source.id,
            destination_id: self.destination.id,
            fund_id: self.fund.id,
            budget_line_item_id: None,
            document_ref: Some("INV-2024-001".to_string()),
        }
    }

    pub async fn fund(&self) -> Fund {
        self.store
            .find_fund(self.fund.id)
            .await
            .unwrap()
            .unwrap()
    }

    pub async fn add_line_item(&self, amount: i64) -> BudgetLineItem {
        let item = BudgetLineItem::new(self.fund.id, "Equipment", "EQ-01", BigDecimal::from(amount));
        self.store.seed_line_item(item.clone()).await;
        item
    }
}

/// A ledger with one ACTIVE fund of the given ceiling, already carrying `allocated`.
pub async fn ledger_with(
    anchor: Arc<dyn Anchor>,
    timeout: Duration,
    amount: i64,
    allocated: i64,
) -> Ledger {
    let store = InMemoryLedgerStore::new();
    let source = Entity::new("National Treasury", "Ministry", "NT");
    let destination = Entity::new("County Hospital", "Department", "CH");
    let mut fund = Fund::new("Health Services", "HS-2024", BigDecimal::from(amount), source.id);
    fund.allocated = BigDecimal::from(allocated);

    store.seed_entity(source.clone()).await;
    store.seed_entity(destination.clone()).await;
    store.seed_fund(fund.clone()).await;

    let workflow = Arc::new(TransactionStateMachine::new(
        Arc::new(store.clone()),
        anchor,
        timeout,
    ));

    Ledger {
        store,
        workflow,
        source,
        destination,
        fund,
    }
}

pub fn actor() -> Uuid {
    Uuid::new_v4()
}
