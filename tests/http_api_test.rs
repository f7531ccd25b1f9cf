mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::json;
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

use common::{actor, ledger_with, Ledger};
use watchdog_ledger::chain::DisabledAnchor;
use watchdog_ledger::domain::{Transaction, TransactionStatus, TransactionType};
use watchdog_ledger::handlers::anomaly::{sign_body, SIGNATURE_HEADER};
use watchdog_ledger::use_cases::DEFAULT_ANCHOR_TIMEOUT;
use watchdog_ledger::{create_app, AppState};

const SECRET: &str = "detector-shared-secret";

async fn setup() -> (Router, Ledger, Transaction) {
    let ledger = ledger_with(Arc::new(DisabledAnchor), DEFAULT_ANCHOR_TIMEOUT, 1000, 0).await;
    let tx = ledger
        .workflow
        .create(ledger.draft(TransactionType::Disbursement, 250), actor())
        .await
        .unwrap();
    let app = create_app(AppState::new(ledger.workflow.clone(), SECRET));
    (app, ledger, tx)
}

fn verdict_request(body: &serde_json::Value, signature: Option<String>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/anomalies")
        .header("content-type", "application/json");
    if let Some(signature) = signature {
        builder = builder.header(SIGNATURE_HEADER, signature);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn signed(body: &serde_json::Value) -> Request<Body> {
    let signature = sign_body(SECRET, body.to_string().as_bytes()).unwrap();
    verdict_request(body, Some(signature))
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn signed_anomaly_flags_pending_transaction() {
    let (app, ledger, tx) = setup().await;
    let body = json!({
        "transaction_id": tx.id,
        "is_anomaly": true,
        "anomaly_score": 0.93,
        "reason": "amount is 12x the vendor median"
    });

    let response = app.oneshot(signed(&body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let stored = ledger.workflow.read(tx.id).await.unwrap().transaction;
    assert_eq!(stored.status, TransactionStatus::Flagged);
    assert_eq!(stored.ai_score, Some(0.93));
}

#[tokio::test]
async fn verdict_for_decided_transaction_is_accepted_without_change() {
    let (app, ledger, tx) = setup().await;
    ledger.workflow.approve(tx.id, actor()).await.unwrap();
    let body = json!({
        "transaction_id": tx.id,
        "is_anomaly": true,
        "anomaly_score": 0.6,
        "reason": "late flag"
    });

    let response = app.oneshot(signed(&body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let stored = ledger.workflow.read(tx.id).await.unwrap().transaction;
    assert_eq!(stored.status, TransactionStatus::Approved);
    assert!(!stored.ai_flagged);
}

#[tokio::test]
async fn clean_verdict_is_accepted() {
    let (app, _ledger, tx) = setup().await;
    let body = json!({
        "transaction_id": tx.id,
        "is_anomaly": false,
        "anomaly_score": 0.05
    });

    let response = app.oneshot(signed(&body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
}

#[tokio::test]
async fn unsigned_or_badly_signed_verdicts_are_refused() {
    let (app, ledger, tx) = setup().await;
    let body = json!({
        "transaction_id": tx.id,
        "is_anomaly": true,
        "anomaly_score": 0.9,
        "reason": "x"
    });

    let missing = app.clone().oneshot(verdict_request(&body, None)).await.unwrap();
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

    let wrong = sign_body("another-secret", body.to_string().as_bytes()).unwrap();
    let mismatched = app
        .clone()
        .oneshot(verdict_request(&body, Some(wrong)))
        .await
        .unwrap();
    assert_eq!(mismatched.status(), StatusCode::UNAUTHORIZED);

    let garbled = app
        .oneshot(verdict_request(&body, Some("zz-not-hex".to_string())))
        .await
        .unwrap();
    assert_eq!(garbled.status(), StatusCode::UNAUTHORIZED);

    let stored = ledger.workflow.read(tx.id).await.unwrap().transaction;
    assert_eq!(stored.status, TransactionStatus::Pending);
}

#[tokio::test]
async fn malformed_verdicts_are_bad_requests() {
    let (app, _ledger, tx) = setup().await;

    let not_a_verdict = json!({ "hello": "world" });
    let response = app.clone().oneshot(signed(&not_a_verdict)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let out_of_range = json!({
        "transaction_id": tx.id,
        "is_anomaly": true,
        "anomaly_score": 4.2,
        "reason": "x"
    });
    let response = app.oneshot(signed(&out_of_range)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn verdict_for_unknown_transaction_is_not_found() {
    let (app, _ledger, _tx) = setup().await;
    let body = json!({
        "transaction_id": Uuid::new_v4(),
        "is_anomaly": true,
        "anomaly_score": 0.9,
        "reason": "x"
    });

    let response = app.oneshot(signed(&body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn read_endpoints() {
    let (app, _ledger, tx) = setup().await;

    let found = app
        .clone()
        .oneshot(get(&format!("/transactions/{}", tx.id)))
        .await
        .unwrap();
    assert_eq!(found.status(), StatusCode::OK);

    let missing = app
        .clone()
        .oneshot(get(&format!("/transactions/{}", Uuid::new_v4())))
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    let listed = app
        .clone()
        .oneshot(get("/transactions?status=PENDING&limit=5"))
        .await
        .unwrap();
    assert_eq!(listed.status(), StatusCode::OK);

    let bad_filter = app
        .clone()
        .oneshot(get("/transactions?status=SETTLED"))
        .await
        .unwrap();
    assert_eq!(bad_filter.status(), StatusCode::BAD_REQUEST);

    let health = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(health.status(), StatusCode::OK);
}
