use crate::{corrupt, storage};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use girder_core::finance::{
    CostEntry, FinanceGateway, FinanceReader, FinanceTransaction, TransactionKind,
    TransactionRequest,
};
use girder_core::DomainResult;
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

/// Postgres finance collaborator: idempotent transaction booking plus the
/// cost/invoice read side for profit analysis.
pub struct PgFinanceHub {
    pool: PgPool,
}

impl PgFinanceHub {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct TransactionRow {
    id: Uuid,
    kind: String,
    amount: Decimal,
    entry_date: NaiveDate,
    category: String,
    description: Option<String>,
    project_id: Uuid,
    reference_type: String,
    reference_id: String,
    created_by: String,
    created_at: DateTime<Utc>,
}

impl TransactionRow {
    fn into_domain(self) -> DomainResult<FinanceTransaction> {
        let kind = match self.kind.as_str() {
            "INCOME" => TransactionKind::Income,
            "EXPENSE" => TransactionKind::Expense,
            other => {
                return Err(corrupt(format!(
                    "finance transaction {}: unknown kind {}",
                    self.id, other
                )))
            }
        };
        Ok(FinanceTransaction {
            id: self.id,
            kind,
            amount: self.amount,
            date: self.entry_date,
            category: self.category,
            description: self.description,
            project_id: self.project_id,
            reference_type: self.reference_type,
            reference_id: self.reference_id,
            created_by: self.created_by,
            created_at: self.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CostRow {
    id: Uuid,
    project_id: Uuid,
    category: String,
    amount: Decimal,
    paid: bool,
}

#[async_trait]
impl FinanceGateway for PgFinanceHub {
    async fn create_from_source(
        &self,
        request: TransactionRequest,
    ) -> DomainResult<FinanceTransaction> {
        let kind = match request.kind {
            TransactionKind::Income => "INCOME",
            TransactionKind::Expense => "EXPENSE",
        };
        // DO NOTHING on the reference pair, then read whichever row holds
        // it: a replay lands on the original.
        sqlx::query(
            r#"
            INSERT INTO finance_transactions (id, kind, amount, entry_date, category,
                                              description, project_id, reference_type,
                                              reference_id, created_by, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (reference_type, reference_id) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(kind)
        .bind(request.amount)
        .bind(request.date)
        .bind(&request.category)
        .bind(&request.description)
        .bind(request.project_id)
        .bind(&request.reference_type)
        .bind(&request.reference_id)
        .bind(&request.created_by)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        sqlx::query_as::<_, TransactionRow>(
            r#"
            SELECT id, kind, amount, entry_date, category, description, project_id,
                   reference_type, reference_id, created_by, created_at
            FROM finance_transactions
            WHERE reference_type = $1 AND reference_id = $2
            "#,
        )
        .bind(&request.reference_type)
        .bind(&request.reference_id)
        .fetch_one(&self.pool)
        .await
        .map_err(storage)?
        .into_domain()
    }
}

#[async_trait]
impl FinanceReader for PgFinanceHub {
    async fn costs_for_project(&self, project_id: Uuid) -> DomainResult<Vec<CostEntry>> {
        let rows = sqlx::query_as::<_, CostRow>(
            r#"
            SELECT id, project_id, category, amount, paid
            FROM cost_entries
            WHERE project_id = $1
            ORDER BY id
            "#,
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        Ok(rows
            .into_iter()
            .map(|row| CostEntry {
                id: row.id,
                project_id: row.project_id,
                category: row.category,
                amount: row.amount,
                paid: row.paid,
            })
            .collect())
    }

    async fn invoiced_total(&self, project_id: Uuid) -> DomainResult<Decimal> {
        sqlx::query_scalar::<_, Decimal>(
            "SELECT COALESCE(SUM(amount), 0) FROM invoices WHERE project_id = $1",
        )
        .bind(project_id)
        .fetch_one(&self.pool)
        .await
        .map_err(storage)
    }
}
