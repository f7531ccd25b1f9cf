pub mod adapters;
pub mod chain;
pub mod cli;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod handlers;
pub mod ports;
pub mod use_cases;
pub mod validation;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::use_cases::{FlagIntake, TransactionStateMachine};

#[derive(Clone)]
pub struct AppState {
    pub workflow: Arc<TransactionStateMachine>,
    pub flag_intake: Arc<FlagIntake>,
    pub webhook_secret: Arc<str>,
}

impl AppState {
    pub fn new(workflow: Arc<TransactionStateMachine>, webhook_secret: &str) -> Self {
        Self {
            flag_intake: Arc::new(FlagIntake::new(workflow.clone())),
            workflow,
            webhook_secret: Arc::from(webhook_secret),
        }
    }
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/transactions", get(handlers::transactions::list_transactions))
        .route("/transactions/:id", get(handlers::transactions::get_transaction))
        .route("/anomalies", post(handlers::anomaly::receive_verdict))
        .with_state(state)
}
