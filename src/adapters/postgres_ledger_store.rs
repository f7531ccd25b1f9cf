//! Postgres implementation of LedgerStore.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnection, PgPool, Postgres};
use sqlx::types::Json;
use sqlx::{Executor, QueryBuilder};
use uuid::Uuid;

use crate::domain::{AuditEntry, BudgetLineItem, ChainStatus, Entity, Fund, Transaction};
use crate::error::{LedgerError, LedgerResult};
use crate::ports::{
    LedgerStore, Page, TransactionDetails, TransactionFilter, TransactionPage, UnitOfWork,
};

const TRANSACTION_COLUMNS: &str = "id, transaction_type, amount, currency, description, status, \
     source_id, destination_id, fund_id, budget_line_item_id, document_ref, created_by_id, \
     approved_by_id, rejected_by_id, rejection_reason, reviewed_by_id, ai_flagged, ai_score, \
     ai_reason, chain_tx_hash, chain_status, created_at, updated_at";

const FUND_COLUMNS: &str = "id, name, code, amount, allocated, disbursed, utilized, currency, \
     status, entity_id, created_at, updated_at";

const LINE_ITEM_COLUMNS: &str = "id, fund_id, name, code, amount, utilized, created_at, updated_at";

const ENTITY_COLUMNS: &str = "id, name, entity_type, code, is_active";

const AUDIT_COLUMNS: &str = "id, actor_id, action, entity_type, entity_id, detail, created_at";

/// Postgres-backed ledger store.
#[derive(Clone)]
pub struct PostgresLedgerStore {
    pool: PgPool,
}

impl PostgresLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn insert_entity(&self, entity: &Entity) -> LedgerResult<()> {
        sqlx::query(
            "INSERT INTO entities (id, name, entity_type, code, is_active) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(entity.id)
        .bind(&entity.name)
        .bind(&entity.entity_type)
        .bind(&entity.code)
        .bind(entity.is_active)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_fund(&self, fund: &Fund) -> LedgerResult<()> {
        sqlx::query(&format!(
            "INSERT INTO funds ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
            FUND_COLUMNS
        ))
        .bind(fund.id)
        .bind(&fund.name)
        .bind(&fund.code)
        .bind(&fund.amount)
        .bind(&fund.allocated)
        .bind(&fund.disbursed)
        .bind(&fund.utilized)
        .bind(&fund.currency)
        .bind(fund.status.as_str())
        .bind(fund.entity_id)
        .bind(fund.created_at)
        .bind(fund.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_line_item(&self, item: &BudgetLineItem) -> LedgerResult<()> {
        sqlx::query(&format!(
            "INSERT INTO budget_line_items ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            LINE_ITEM_COLUMNS
        ))
        .bind(item.id)
        .bind(item.fund_id)
        .bind(&item.name)
        .bind(&item.code)
        .bind(&item.amount)
        .bind(&item.utilized)
        .bind(item.created_at)
        .bind(item.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    async fn begin(&self) -> LedgerResult<Box<dyn UnitOfWork>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgUnitOfWork { tx }))
    }

    async fn find_fund(&self, id: Uuid) -> LedgerResult<Option<Fund>> {
        fetch_fund(&self.pool, id, false).await
    }

    async fn find_line_item(&self, id: Uuid) -> LedgerResult<Option<BudgetLineItem>> {
        fetch_line_item(&self.pool, id, false).await
    }

    async fn find_entity(&self, id: Uuid) -> LedgerResult<Option<Entity>> {
        let row = sqlx::query_as::<_, EntityRow>(&format!(
            "SELECT {} FROM entities WHERE id = $1",
            ENTITY_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(EntityRow::into_domain))
    }

    async fn read_transaction(&self, id: Uuid) -> LedgerResult<TransactionDetails> {
        let transaction = fetch_transaction(&self.pool, id, false)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("transaction {}", id)))?;

        let fund = self
            .find_fund(transaction.fund_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("fund {}", transaction.fund_id)))?;
        let budget_line_item = match transaction.budget_line_item_id {
            Some(item_id) => Some(self.find_line_item(item_id).await?.ok_or_else(|| {
                LedgerError::NotFound(format!("budget line item {}", item_id))
            })?),
            None => None,
        };
        let source = self
            .find_entity(transaction.source_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("entity {}", transaction.source_id)))?;
        let destination = self
            .find_entity(transaction.destination_id)
            .await?
            .ok_or_else(|| {
                LedgerError::NotFound(format!("entity {}", transaction.destination_id))
            })?;

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
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM transactions");
        push_filters(&mut count, filter);
        let total = count.build_query_scalar::<i64>().fetch_one(&self.pool).await?;

        let mut select =
            QueryBuilder::<Postgres>::new(format!("SELECT {} FROM transactions", TRANSACTION_COLUMNS));
        push_filters(&mut select, filter);
        select
            .push(" ORDER BY created_at DESC LIMIT ")
            .push_bind(i64::from(page.limit))
            .push(" OFFSET ")
            .push_bind(page.offset());
        let rows = select
            .build_query_as::<TransactionRow>()
            .fetch_all(&self.pool)
            .await?;

        let items = rows
            .into_iter()
            .map(TransactionRow::into_domain)
            .collect::<LedgerResult<Vec<_>>>()?;

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
        let result = sqlx::query(
            "UPDATE transactions SET chain_tx_hash = $2, chain_status = COALESCE($3, chain_status) \
             WHERE id = $1",
        )
        .bind(id)
        .bind(chain_tx_hash)
        .bind(chain_status.map(|status| status.as_str()))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::NotFound(format!("transaction {}", id)));
        }
        Ok(())
    }

    async fn audit_trail(&self, entity_id: Uuid) -> LedgerResult<Vec<AuditEntry>> {
        let rows = sqlx::query_as::<_, AuditRow>(&format!(
            "SELECT {} FROM audit_logs WHERE entity_id = $1 ORDER BY created_at, id",
            AUDIT_COLUMNS
        ))
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(AuditRow::into_domain).collect())
    }

    async fn ping(&self) -> LedgerResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// One Postgres transaction. Row locks taken with `FOR UPDATE` last until commit or
/// rollback; dropping it without either rolls back.
pub struct PgUnitOfWork {
    tx: sqlx::Transaction<'static, Postgres>,
}

impl PgUnitOfWork {
    fn conn(&mut self) -> &mut PgConnection {
        &mut self.tx
    }
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn insert_transaction(&mut self, tx: &Transaction) -> LedgerResult<()> {
        sqlx::query(&format!(
            "INSERT INTO transactions ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, \
             $12, $13, $14, $15, $16, $17, $18, $19, $20, $21, $22, $23)",
            TRANSACTION_COLUMNS
        ))
        .bind(tx.id)
        .bind(tx.transaction_type.as_str())
        .bind(&tx.amount)
        .bind(&tx.currency)
        .bind(&tx.description)
        .bind(tx.status.as_str())
        .bind(tx.source_id)
        .bind(tx.destination_id)
        .bind(tx.fund_id)
        .bind(tx.budget_line_item_id)
        .bind(&tx.document_ref)
        .bind(tx.created_by_id)
        .bind(tx.approved_by_id)
        .bind(tx.rejected_by_id)
        .bind(&tx.rejection_reason)
        .bind(tx.reviewed_by_id)
        .bind(tx.ai_flagged)
        .bind(tx.ai_score)
        .bind(&tx.ai_reason)
        .bind(&tx.chain_tx_hash)
        .bind(tx.chain_status.as_str())
        .bind(tx.created_at)
        .bind(tx.updated_at)
        .execute(self.conn())
        .await?;
        Ok(())
    }

    async fn lock_transaction(&mut self, id: Uuid) -> LedgerResult<Transaction> {
        fetch_transaction(self.conn(), id, true)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("transaction {}", id)))
    }

    async fn lock_fund(&mut self, id: Uuid) -> LedgerResult<Fund> {
        fetch_fund(self.conn(), id, true)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("fund {}", id)))
    }

    async fn lock_line_item(&mut self, id: Uuid) -> LedgerResult<BudgetLineItem> {
        fetch_line_item(self.conn(), id, true)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("budget line item {}", id)))
    }

    /// Workflow columns only; chain columns belong to `record_anchor`.
    async fn update_transaction(&mut self, tx: &Transaction) -> LedgerResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE transactions SET
                status = $2, approved_by_id = $3, rejected_by_id = $4, rejection_reason = $5,
                reviewed_by_id = $6, ai_flagged = $7, ai_score = $8, ai_reason = $9,
                updated_at = $10
            WHERE id = $1
            "#,
        )
        .bind(tx.id)
        .bind(tx.status.as_str())
        .bind(tx.approved_by_id)
        .bind(tx.rejected_by_id)
        .bind(&tx.rejection_reason)
        .bind(tx.reviewed_by_id)
        .bind(tx.ai_flagged)
        .bind(tx.ai_score)
        .bind(&tx.ai_reason)
        .bind(tx.updated_at)
        .execute(self.conn())
        .await?;
        expect_one_row(result.rows_affected(), "transaction", tx.id)
    }

    async fn update_fund(&mut self, fund: &Fund) -> LedgerResult<()> {
        let result = sqlx::query(
            "UPDATE funds SET allocated = $2, disbursed = $3, utilized = $4, updated_at = $5 \
             WHERE id = $1",
        )
        .bind(fund.id)
        .bind(&fund.allocated)
        .bind(&fund.disbursed)
        .bind(&fund.utilized)
        .bind(fund.updated_at)
        .execute(self.conn())
        .await?;
        expect_one_row(result.rows_affected(), "fund", fund.id)
    }

    async fn update_line_item(&mut self, item: &BudgetLineItem) -> LedgerResult<()> {
        let result = sqlx::query(
            "UPDATE budget_line_items SET utilized = $2, updated_at = $3 WHERE id = $1",
        )
        .bind(item.id)
        .bind(&item.utilized)
        .bind(item.updated_at)
        .execute(self.conn())
        .await?;
        expect_one_row(result.rows_affected(), "budget line item", item.id)
    }

    async fn insert_audit(&mut self, entry: &AuditEntry) -> LedgerResult<()> {
        sqlx::query(&format!(
            "INSERT INTO audit_logs ({}) VALUES ($1, $2, $3, $4, $5, $6, $7)",
            AUDIT_COLUMNS
        ))
        .bind(entry.id)
        .bind(entry.actor_id)
        .bind(&entry.action)
        .bind(&entry.entity_type)
        .bind(entry.entity_id)
        .bind(Json(&entry.detail))
        .bind(entry.created_at)
        .execute(self.conn())
        .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> LedgerResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> LedgerResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

fn expect_one_row(rows: u64, kind: &str, id: Uuid) -> LedgerResult<()> {
    if rows == 0 {
        return Err(LedgerError::NotFound(format!("{} {}", kind, id)));
    }
    Ok(())
}

fn lock_clause(lock: bool) -> &'static str {
    if lock {
        " FOR UPDATE"
    } else {
        ""
    }
}

async fn fetch_transaction<'e, E>(executor: E, id: Uuid, lock: bool) -> LedgerResult<Option<Transaction>>
where
    E: Executor<'e, Database = Postgres>,
{
    let sql = format!(
        "SELECT {} FROM transactions WHERE id = $1{}",
        TRANSACTION_COLUMNS,
        lock_clause(lock)
    );
    let row = sqlx::query_as::<_, TransactionRow>(&sql)
        .bind(id)
        .fetch_optional(executor)
        .await?;
    row.map(TransactionRow::into_domain).transpose()
}

async fn fetch_fund<'e, E>(executor: E, id: Uuid, lock: bool) -> LedgerResult<Option<Fund>>
where
    E: Executor<'e, Database = Postgres>,
{
    let sql = format!(
        "SELECT {} FROM funds WHERE id = $1{}",
        FUND_COLUMNS,
        lock_clause(lock)
    );
    let row = sqlx::query_as::<_, FundRow>(&sql)
        .bind(id)
        .fetch_optional(executor)
        .await?;
    row.map(FundRow::into_domain).transpose()
}

async fn fetch_line_item<'e, E>(
    executor: E,
    id: Uuid,
    lock: bool,
) -> LedgerResult<Option<BudgetLineItem>>
where
    E: Executor<'e, Database = Postgres>,
{
    let sql = format!(
        "SELECT {} FROM budget_line_items WHERE id = $1{}",
        LINE_ITEM_COLUMNS,
        lock_clause(lock)
    );
    let row = sqlx::query_as::<_, LineItemRow>(&sql)
        .bind(id)
        .fetch_optional(executor)
        .await?;
    Ok(row.map(LineItemRow::into_domain))
}

fn push_filters(builder: &mut QueryBuilder<'_, Postgres>, filter: &TransactionFilter) {
    builder.push(" WHERE 1 = 1");
    if let Some(transaction_type) = filter.transaction_type {
        builder
            .push(" AND transaction_type = ")
            .push_bind(transaction_type.as_str());
    }
    if let Some(status) = filter.status {
        builder.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(fund_id) = filter.fund_id {
        builder.push(" AND fund_id = ").push_bind(fund_id);
    }
    if let Some(source_id) = filter.source_id {
        builder.push(" AND source_id = ").push_bind(source_id);
    }
    if let Some(destination_id) = filter.destination_id {
        builder.push(" AND destination_id = ").push_bind(destination_id);
    }
    if let Some(entity_id) = filter.entity_id {
        builder
            .push(" AND (source_id = ")
            .push_bind(entity_id)
            .push(" OR destination_id = ")
            .push_bind(entity_id)
            .push(")");
    }
    if let Some(after) = filter.created_after {
        builder.push(" AND created_at >= ").push_bind(after);
    }
    if let Some(before) = filter.created_before {
        builder.push(" AND created_at <= ").push_bind(before);
    }
    if let Some(flagged) = filter.ai_flagged {
        builder.push(" AND ai_flagged = ").push_bind(flagged);
    }
}

/// Internal row types for SQLx. Not exposed outside the adapter.
#[derive(Debug, sqlx::FromRow)]
struct TransactionRow {
    id: Uuid,
    transaction_type: String,
    amount: BigDecimal,
    currency: String,
    description: String,
    status: String,
    source_id: Uuid,
    destination_id: Uuid,
    fund_id: Uuid,
    budget_line_item_id: Option<Uuid>,
    document_ref: Option<String>,
    created_by_id: Uuid,
    approved_by_id: Option<Uuid>,
    rejected_by_id: Option<Uuid>,
    rejection_reason: Option<String>,
    reviewed_by_id: Option<Uuid>,
    ai_flagged: bool,
    ai_score: Option<f64>,
    ai_reason: Option<String>,
    chain_tx_hash: Option<String>,
    chain_status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TransactionRow {
    fn into_domain(self) -> LedgerResult<Transaction> {
        Ok(Transaction {
            id: self.id,
            transaction_type: self
                .transaction_type
                .parse()
                .map_err(|_| corrupt("transaction_type", &self.transaction_type))?,
            amount: self.amount,
            currency: self.currency,
            description: self.description,
            status: self
                .status
                .parse()
                .map_err(|_| corrupt("status", &self.status))?,
            source_id: self.source_id,
            destination_id: self.destination_id,
            fund_id: self.fund_id,
            budget_line_item_id: self.budget_line_item_id,
            document_ref: self.document_ref,
            created_by_id: self.created_by_id,
            approved_by_id: self.approved_by_id,
            rejected_by_id: self.rejected_by_id,
            rejection_reason: self.rejection_reason,
            reviewed_by_id: self.reviewed_by_id,
            ai_flagged: self.ai_flagged,
            ai_score: self.ai_score,
            ai_reason: self.ai_reason,
            chain_tx_hash: self.chain_tx_hash,
            chain_status: self.chain_status.parse()?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

fn corrupt(column: &str, value: &str) -> LedgerError {
    LedgerError::Storage(format!("unexpected {} value {:?} in transactions", column, value))
}

#[derive(Debug, sqlx::FromRow)]
struct FundRow {
    id: Uuid,
    name: String,
    code: String,
    amount: BigDecimal,
    allocated: BigDecimal,
    disbursed: BigDecimal,
    utilized: BigDecimal,
    currency: String,
    status: String,
    entity_id: Uuid,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl FundRow {
    fn into_domain(self) -> LedgerResult<Fund> {
        Ok(Fund {
            id: self.id,
            name: self.name,
            code: self.code,
            amount: self.amount,
            allocated: self.allocated,
            disbursed: self.disbursed,
            utilized: self.utilized,
            currency: self.currency,
            status: self.status.parse()?,
            entity_id: self.entity_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct LineItemRow {
    id: Uuid,
    fund_id: Uuid,
    name: String,
    code: String,
    amount: BigDecimal,
    utilized: BigDecimal,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl LineItemRow {
    fn into_domain(self) -> BudgetLineItem {
        BudgetLineItem {
            id: self.id,
            fund_id: self.fund_id,
            name: self.name,
            code: self.code,
            amount: self.amount,
            utilized: self.utilized,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct EntityRow {
    id: Uuid,
    name: String,
    entity_type: String,
    code: String,
    is_active: bool,
}

impl EntityRow {
    fn into_domain(self) -> Entity {
        Entity {
            id: self.id,
            name: self.name,
            entity_type: self.entity_type,
            code: self.code,
            is_active: self.is_active,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AuditRow {
    id: Uuid,
    actor_id: Option<Uuid>,
    action: String,
    entity_type: String,
    entity_id: Uuid,
    detail: Json<serde_json::Value>,
    created_at: DateTime<Utc>,
}

impl AuditRow {
    fn into_domain(self) -> AuditEntry {
        AuditEntry {
            id: self.id,
            actor_id: self.actor_id,
            action: self.action,
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            detail: self.detail.0,
            created_at: self.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TransactionType;

    #[test]
    fn filters_render_in_a_stable_order() {
        let entity = Uuid::new_v4();
        let filter = TransactionFilter {
            transaction_type: Some(TransactionType::Returns),
            entity_id: Some(entity),
            ai_flagged: Some(true),
            ..Default::default()
        };

        let mut builder = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM transactions");
        push_filters(&mut builder, &filter);

        assert_eq!(
            builder.sql(),
            "SELECT COUNT(*) FROM transactions WHERE 1 = 1 AND transaction_type = $1 \
             AND (source_id = $2 OR destination_id = $3) AND ai_flagged = $4"
        );
    }

    #[test]
    fn lock_clause_only_when_locking() {
        assert_eq!(lock_clause(true), " FOR UPDATE");
        assert_eq!(lock_clause(false), "");
    }

    #[test]
    fn unknown_status_in_row_is_a_storage_error() {
        let row = TransactionRow {
            id: Uuid::new_v4(),
            transaction_type: "ALLOCATION".to_string(),
            amount: BigDecimal::from(1),
            currency: "KES".to_string(),
            description: String::new(),
            status: "ARCHIVED".to_string(),
            source_id: Uuid::new_v4(),
            destination_id: Uuid::new_v4(),
            fund_id: Uuid::new_v4(),
            budget_line_item_id: None,
            document_ref: None,
            created_by_id: Uuid::new_v4(),
            approved_by_id: None,
            rejected_by_id: None,
            rejection_reason: None,
            reviewed_by_id: None,
            ai_flagged: false,
            ai_score: None,
            ai_reason: None,
            chain_tx_hash: None,
            chain_status: "none".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        assert!(matches!(row.into_domain(), Err(LedgerError::Storage(_))));
    }
}
