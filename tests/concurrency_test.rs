mod common;

use bigdecimal::BigDecimal;
use std::sync::Arc;

use common::{actor, ledger_with};
use watchdog_ledger::chain::DisabledAnchor;
use watchdog_ledger::domain::{TransactionStatus, TransactionType};
use watchdog_ledger::error::LedgerError;
use watchdog_ledger::use_cases::DEFAULT_ANCHOR_TIMEOUT;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_completions_never_exceed_the_fund() {
    let ledger = ledger_with(Arc::new(DisabledAnchor), DEFAULT_ANCHOR_TIMEOUT, 1000, 0).await;

    // Each fits on its own at creation time; only three fit together.
    let mut ids = Vec::new();
    for _ in 0..5 {
        let tx = ledger
            .workflow
            .create(ledger.draft(TransactionType::Expenditure, 300), actor())
            .await
            .unwrap();
        ledger.workflow.approve(tx.id, actor()).await.unwrap();
        ids.push(tx.id);
    }

    let handles: Vec<_> = ids
        .into_iter()
        .map(|id| {
            let workflow = ledger.workflow.clone();
            tokio::spawn(async move { workflow.complete(id).await })
        })
        .collect();

    let mut completed = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(tx) => {
                assert_eq!(tx.status, TransactionStatus::Completed);
                completed += 1;
            }
            Err(LedgerError::InvariantViolation(_)) => {}
            Err(other) => panic!("unexpected error: {:?}", other),
        }
    }

    let fund = ledger.fund().await;
    assert_eq!(completed, 3);
    assert_eq!(fund.utilized, BigDecimal::from(900));
    assert!(fund.committed() <= fund.amount);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn approve_and_reject_race_has_one_winner() {
    let ledger = ledger_with(Arc::new(DisabledAnchor), DEFAULT_ANCHOR_TIMEOUT, 1000, 0).await;

    for _ in 0..10 {
        let tx = ledger
            .workflow
            .create(ledger.draft(TransactionType::Disbursement, 10), actor())
            .await
            .unwrap();

        let approver = ledger.workflow.clone();
        let rejecter = ledger.workflow.clone();
        let id = tx.id;
        let approve = tokio::spawn(async move { approver.approve(id, actor()).await });
        let reject =
            tokio::spawn(async move { rejecter.reject(id, actor(), "missing invoice").await });

        let outcomes = [approve.await.unwrap(), reject.await.unwrap()];
        let winners: Vec<_> = outcomes.iter().filter_map(|o| o.as_ref().ok()).collect();
        assert_eq!(winners.len(), 1);
        assert!(outcomes
            .iter()
            .any(|o| matches!(o, Err(LedgerError::InvalidState { .. }))));

        let stored = ledger.workflow.read(id).await.unwrap().transaction;
        assert_eq!(stored.status, winners[0].status);
    }
}
