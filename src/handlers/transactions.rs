use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::domain::{TransactionStatus, TransactionType};
use crate::error::LedgerError;
use crate::ports::{Page, TransactionDetails, TransactionFilter, TransactionPage, DEFAULT_PAGE_LIMIT};
use crate::AppState;

/// Query string for `GET /transactions`. Kept flat so the urlencoded parser can
/// read typed values.
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub transaction_type: Option<TransactionType>,
    pub status: Option<TransactionStatus>,
    pub fund_id: Option<Uuid>,
    pub source_id: Option<Uuid>,
    pub destination_id: Option<Uuid>,
    pub entity_id: Option<Uuid>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub ai_flagged: Option<bool>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl ListQuery {
    pub fn into_parts(self) -> (TransactionFilter, Page) {
        let page = Page::new(
            self.page.unwrap_or(1),
            self.limit.unwrap_or(DEFAULT_PAGE_LIMIT),
        );
        let filter = TransactionFilter {
            transaction_type: self.transaction_type,
            status: self.status,
            fund_id: self.fund_id,
            source_id: self.source_id,
            destination_id: self.destination_id,
            entity_id: self.entity_id,
            created_after: self.created_after,
            created_before: self.created_before,
            ai_flagged: self.ai_flagged,
        };
        (filter, page)
    }
}

pub async fn get_transaction(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<TransactionDetails>, LedgerError> {
    let details = state.workflow.read(id).await?;
    Ok(Json(details))
}

pub async fn list_transactions(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<TransactionPage>, LedgerError> {
    let (filter, page) = query.into_parts();
    let result = state.workflow.list(&filter, page).await?;
    Ok(Json(result))
}
