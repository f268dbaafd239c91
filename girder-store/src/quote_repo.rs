use crate::{corrupt, storage};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use girder_core::lifecycle::Lock;
use girder_core::DomainResult;
use girder_quote::models::{Quotation, QuotationItem};
use girder_quote::repository::QuotationRepository;
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

pub struct PgQuotationRepository {
    pool: PgPool,
}

impl PgQuotationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct QuotationRow {
    id: String,
    project_id: Uuid,
    version_no: i32,
    parent_id: Option<String>,
    is_current: bool,
    title: String,
    tax_rate: Decimal,
    is_tax_included: bool,
    subtotal: Decimal,
    tax_amount: Decimal,
    total_amount: Decimal,
    status: String,
    notes: Option<String>,
    locked_at: Option<DateTime<Utc>>,
    locked_by: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct QuotationItemRow {
    id: Uuid,
    name: String,
    quantity: Decimal,
    unit_price: Decimal,
    amount: Decimal,
    sort_order: i32,
}

fn to_domain(row: QuotationRow, items: Vec<QuotationItemRow>) -> DomainResult<Quotation> {
    let status = row
        .status
        .parse()
        .map_err(|e: String| corrupt(format!("quotation {}: {}", row.id, e)))?;
    let lock = match (row.locked_at, row.locked_by) {
        (Some(locked_at), Some(locked_by)) => Some(Lock {
            locked_at,
            locked_by,
        }),
        _ => None,
    };
    Ok(Quotation {
        id: row.id,
        project_id: row.project_id,
        version_no: row.version_no,
        parent_id: row.parent_id,
        is_current: row.is_current,
        title: row.title,
        tax_rate: row.tax_rate,
        is_tax_included: row.is_tax_included,
        subtotal: row.subtotal,
        tax_amount: row.tax_amount,
        total_amount: row.total_amount,
        status,
        notes: row.notes,
        lock,
        items: items
            .into_iter()
            .map(|item| QuotationItem {
                id: item.id,
                name: item.name,
                quantity: item.quantity,
                unit_price: item.unit_price,
                amount: item.amount,
                sort_order: item.sort_order,
            })
            .collect(),
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}

const SELECT_QUOTATION: &str = r#"
    SELECT id, project_id, version_no, parent_id, is_current, title,
           tax_rate, is_tax_included, subtotal, tax_amount, total_amount,
           status, notes, locked_at, locked_by, created_at, updated_at
    FROM quotations
"#;

async fn write_row(
    tx: &mut Transaction<'_, Postgres>,
    quotation: &Quotation,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO quotations (id, project_id, version_no, parent_id, is_current,
                                title, tax_rate, is_tax_included, subtotal, tax_amount,
                                total_amount, status, notes, locked_at, locked_by,
                                created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
        ON CONFLICT (id) DO UPDATE SET
            is_current = EXCLUDED.is_current,
            title = EXCLUDED.title,
            tax_rate = EXCLUDED.tax_rate,
            is_tax_included = EXCLUDED.is_tax_included,
            subtotal = EXCLUDED.subtotal,
            tax_amount = EXCLUDED.tax_amount,
            total_amount = EXCLUDED.total_amount,
            status = EXCLUDED.status,
            notes = EXCLUDED.notes,
            locked_at = EXCLUDED.locked_at,
            locked_by = EXCLUDED.locked_by,
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(&quotation.id)
    .bind(quotation.project_id)
    .bind(quotation.version_no)
    .bind(&quotation.parent_id)
    .bind(quotation.is_current)
    .bind(&quotation.title)
    .bind(quotation.tax_rate)
    .bind(quotation.is_tax_included)
    .bind(quotation.subtotal)
    .bind(quotation.tax_amount)
    .bind(quotation.total_amount)
    .bind(quotation.status.as_str())
    .bind(&quotation.notes)
    .bind(quotation.lock.as_ref().map(|l| l.locked_at))
    .bind(quotation.lock.as_ref().map(|l| l.locked_by.clone()))
    .bind(quotation.created_at)
    .bind(quotation.updated_at)
    .execute(&mut **tx)
    .await?;

    // Items are owned: replace the child set wholesale.
    sqlx::query("DELETE FROM quotation_items WHERE quotation_id = $1")
        .bind(&quotation.id)
        .execute(&mut **tx)
        .await?;
    for item in &quotation.items {
        sqlx::query(
            r#"
            INSERT INTO quotation_items (id, quotation_id, name, quantity, unit_price, amount, sort_order)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(item.id)
        .bind(&quotation.id)
        .bind(&item.name)
        .bind(item.quantity)
        .bind(item.unit_price)
        .bind(item.amount)
        .bind(item.sort_order)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

impl PgQuotationRepository {
    async fn load_items(&self, quotation_id: &str) -> DomainResult<Vec<QuotationItemRow>> {
        sqlx::query_as::<_, QuotationItemRow>(
            r#"
            SELECT id, name, quantity, unit_price, amount, sort_order
            FROM quotation_items
            WHERE quotation_id = $1
            ORDER BY sort_order
            "#,
        )
        .bind(quotation_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)
    }
}

#[async_trait]
impl QuotationRepository for PgQuotationRepository {
    async fn insert(&self, quotation: &Quotation) -> DomainResult<()> {
        let mut tx = self.pool.begin().await.map_err(storage)?;
        write_row(&mut tx, quotation).await.map_err(storage)?;
        tx.commit().await.map_err(storage)
    }

    async fn fetch(&self, id: &str) -> DomainResult<Option<Quotation>> {
        let row = sqlx::query_as::<_, QuotationRow>(&format!("{} WHERE id = $1", SELECT_QUOTATION))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;
        match row {
            Some(row) => {
                let items = self.load_items(id).await?;
                Ok(Some(to_domain(row, items)?))
            }
            None => Ok(None),
        }
    }

    async fn update(&self, quotation: &Quotation) -> DomainResult<()> {
        let mut tx = self.pool.begin().await.map_err(storage)?;
        write_row(&mut tx, quotation).await.map_err(storage)?;
        tx.commit().await.map_err(storage)
    }

    async fn list_by_project(&self, project_id: Uuid) -> DomainResult<Vec<Quotation>> {
        let rows = sqlx::query_as::<_, QuotationRow>(&format!(
            "{} WHERE project_id = $1 ORDER BY version_no, id",
            SELECT_QUOTATION
        ))
        .bind(project_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        let mut quotations = Vec::with_capacity(rows.len());
        for row in rows {
            let items = self.load_items(&row.id).await?;
            quotations.push(to_domain(row, items)?);
        }
        Ok(quotations)
    }

    async fn insert_version(&self, next: &Quotation, superseded: &Quotation) -> DomainResult<()> {
        let mut tx = self.pool.begin().await.map_err(storage)?;
        write_row(&mut tx, superseded).await.map_err(storage)?;
        write_row(&mut tx, next).await.map_err(storage)?;
        tx.commit().await.map_err(storage)
    }
}
