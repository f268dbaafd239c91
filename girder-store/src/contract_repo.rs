use crate::{corrupt, storage};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use girder_contract::changes::{ChangeOrder, ChangeOrderItem};
use girder_contract::models::{Contract, ContractStatus};
use girder_contract::payment::{CreateApplication, PaymentApplication, PaymentReceipt};
use girder_contract::repository::{
    ChangeOrderRepository, ContractRepository, PaymentApplicationRepository,
};
use girder_core::lifecycle::Lock;
use girder_core::DomainResult;
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

/// Postgres store for the contract side: contracts, change orders and
/// payment applications share one pool so cross-aggregate writes can run
/// in one transaction.
pub struct PgContractStore {
    pool: PgPool,
}

impl PgContractStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn compose_lock(locked_at: Option<DateTime<Utc>>, locked_by: Option<String>) -> Option<Lock> {
    match (locked_at, locked_by) {
        (Some(locked_at), Some(locked_by)) => Some(Lock {
            locked_at,
            locked_by,
        }),
        _ => None,
    }
}

// ---------------------------------------------------------------- contracts

#[derive(sqlx::FromRow)]
struct ContractRow {
    id: String,
    project_id: Uuid,
    quotation_id: Option<String>,
    title: String,
    original_amount: Decimal,
    change_amount: Decimal,
    current_amount: Decimal,
    retention_rate: Decimal,
    retention_amount: Decimal,
    warranty_months: i32,
    warranty_end: Option<DateTime<Utc>>,
    sign_date: Option<NaiveDate>,
    status: String,
    notes: Option<String>,
    locked_at: Option<DateTime<Utc>>,
    locked_by: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ContractRow {
    fn into_domain(self) -> DomainResult<Contract> {
        let status: ContractStatus = self
            .status
            .parse()
            .map_err(|e: String| corrupt(format!("contract {}: {}", self.id, e)))?;
        Ok(Contract {
            id: self.id,
            project_id: self.project_id,
            quotation_id: self.quotation_id,
            title: self.title,
            original_amount: self.original_amount,
            change_amount: self.change_amount,
            current_amount: self.current_amount,
            retention_rate: self.retention_rate,
            retention_amount: self.retention_amount,
            warranty_months: self.warranty_months,
            warranty_end: self.warranty_end,
            sign_date: self.sign_date,
            status,
            notes: self.notes,
            lock: compose_lock(self.locked_at, self.locked_by),
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

const SELECT_CONTRACT: &str = r#"
    SELECT id, project_id, quotation_id, title, original_amount, change_amount,
           current_amount, retention_rate, retention_amount, warranty_months,
           warranty_end, sign_date, status, notes, locked_at, locked_by,
           created_at, updated_at
    FROM contracts
"#;

async fn write_contract(
    tx: &mut Transaction<'_, Postgres>,
    contract: &Contract,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO contracts (id, project_id, quotation_id, title, original_amount,
                               change_amount, current_amount, retention_rate,
                               retention_amount, warranty_months, warranty_end,
                               sign_date, status, notes, locked_at, locked_by,
                               created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
        ON CONFLICT (id) DO UPDATE SET
            title = EXCLUDED.title,
            original_amount = EXCLUDED.original_amount,
            change_amount = EXCLUDED.change_amount,
            current_amount = EXCLUDED.current_amount,
            retention_rate = EXCLUDED.retention_rate,
            retention_amount = EXCLUDED.retention_amount,
            warranty_months = EXCLUDED.warranty_months,
            warranty_end = EXCLUDED.warranty_end,
            sign_date = EXCLUDED.sign_date,
            status = EXCLUDED.status,
            notes = EXCLUDED.notes,
            locked_at = EXCLUDED.locked_at,
            locked_by = EXCLUDED.locked_by,
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(&contract.id)
    .bind(contract.project_id)
    .bind(&contract.quotation_id)
    .bind(&contract.title)
    .bind(contract.original_amount)
    .bind(contract.change_amount)
    .bind(contract.current_amount)
    .bind(contract.retention_rate)
    .bind(contract.retention_amount)
    .bind(contract.warranty_months)
    .bind(contract.warranty_end)
    .bind(contract.sign_date)
    .bind(contract.status.as_str())
    .bind(&contract.notes)
    .bind(contract.lock.as_ref().map(|l| l.locked_at))
    .bind(contract.lock.as_ref().map(|l| l.locked_by.clone()))
    .bind(contract.created_at)
    .bind(contract.updated_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[async_trait]
impl ContractRepository for PgContractStore {
    async fn insert(&self, contract: &Contract) -> DomainResult<()> {
        let mut tx = self.pool.begin().await.map_err(storage)?;
        write_contract(&mut tx, contract).await.map_err(storage)?;
        tx.commit().await.map_err(storage)
    }

    async fn fetch(&self, id: &str) -> DomainResult<Option<Contract>> {
        sqlx::query_as::<_, ContractRow>(&format!("{} WHERE id = $1", SELECT_CONTRACT))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?
            .map(ContractRow::into_domain)
            .transpose()
    }

    async fn update(&self, contract: &Contract) -> DomainResult<()> {
        ContractRepository::insert(self, contract).await
    }

    async fn find_by_quotation(&self, quotation_id: &str) -> DomainResult<Option<Contract>> {
        sqlx::query_as::<_, ContractRow>(&format!(
            "{} WHERE quotation_id = $1",
            SELECT_CONTRACT
        ))
        .bind(quotation_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?
        .map(ContractRow::into_domain)
        .transpose()
    }

    async fn find_by_project(&self, project_id: Uuid) -> DomainResult<Option<Contract>> {
        sqlx::query_as::<_, ContractRow>(&format!(
            "{} WHERE project_id = $1 ORDER BY id LIMIT 1",
            SELECT_CONTRACT
        ))
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?
        .map(ContractRow::into_domain)
        .transpose()
    }

    async fn list_by_status(&self, status: ContractStatus) -> DomainResult<Vec<Contract>> {
        sqlx::query_as::<_, ContractRow>(&format!(
            "{} WHERE status = $1 ORDER BY id",
            SELECT_CONTRACT
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?
        .into_iter()
        .map(ContractRow::into_domain)
        .collect()
    }
}

// ------------------------------------------------------------ change orders

#[derive(sqlx::FromRow)]
struct ChangeOrderRow {
    id: String,
    contract_id: String,
    project_id: Uuid,
    title: String,
    amount: Decimal,
    days_impact: i32,
    status: String,
    notes: Option<String>,
    approved_at: Option<DateTime<Utc>>,
    approved_by: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct ChangeOrderItemRow {
    id: Uuid,
    name: String,
    quantity: Decimal,
    unit_price: Decimal,
    amount: Decimal,
    sort_order: i32,
}

fn change_order_to_domain(
    row: ChangeOrderRow,
    items: Vec<ChangeOrderItemRow>,
) -> DomainResult<ChangeOrder> {
    let status = row
        .status
        .parse()
        .map_err(|e: String| corrupt(format!("change order {}: {}", row.id, e)))?;
    Ok(ChangeOrder {
        id: row.id,
        contract_id: row.contract_id,
        project_id: row.project_id,
        title: row.title,
        amount: row.amount,
        days_impact: row.days_impact,
        status,
        notes: row.notes,
        approved_at: row.approved_at,
        approved_by: row.approved_by,
        items: items
            .into_iter()
            .map(|item| ChangeOrderItem {
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

const SELECT_CHANGE_ORDER: &str = r#"
    SELECT id, contract_id, project_id, title, amount, days_impact, status,
           notes, approved_at, approved_by, created_at, updated_at
    FROM change_orders
"#;

async fn write_change_order(
    tx: &mut Transaction<'_, Postgres>,
    change_order: &ChangeOrder,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO change_orders (id, contract_id, project_id, title, amount,
                                   days_impact, status, notes, approved_at,
                                   approved_by, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        ON CONFLICT (id) DO UPDATE SET
            title = EXCLUDED.title,
            amount = EXCLUDED.amount,
            days_impact = EXCLUDED.days_impact,
            status = EXCLUDED.status,
            notes = EXCLUDED.notes,
            approved_at = EXCLUDED.approved_at,
            approved_by = EXCLUDED.approved_by,
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(&change_order.id)
    .bind(&change_order.contract_id)
    .bind(change_order.project_id)
    .bind(&change_order.title)
    .bind(change_order.amount)
    .bind(change_order.days_impact)
    .bind(change_order.status.as_str())
    .bind(&change_order.notes)
    .bind(change_order.approved_at)
    .bind(&change_order.approved_by)
    .bind(change_order.created_at)
    .bind(change_order.updated_at)
    .execute(&mut **tx)
    .await?;

    sqlx::query("DELETE FROM change_order_items WHERE change_order_id = $1")
        .bind(&change_order.id)
        .execute(&mut **tx)
        .await?;
    for item in &change_order.items {
        sqlx::query(
            r#"
            INSERT INTO change_order_items (id, change_order_id, name, quantity, unit_price, amount, sort_order)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(item.id)
        .bind(&change_order.id)
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

impl PgContractStore {
    async fn load_change_order_items(&self, id: &str) -> DomainResult<Vec<ChangeOrderItemRow>> {
        sqlx::query_as::<_, ChangeOrderItemRow>(
            r#"
            SELECT id, name, quantity, unit_price, amount, sort_order
            FROM change_order_items
            WHERE change_order_id = $1
            ORDER BY sort_order
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)
    }
}

#[async_trait]
impl ChangeOrderRepository for PgContractStore {
    async fn insert(&self, change_order: &ChangeOrder) -> DomainResult<()> {
        let mut tx = self.pool.begin().await.map_err(storage)?;
        write_change_order(&mut tx, change_order)
            .await
            .map_err(storage)?;
        tx.commit().await.map_err(storage)
    }

    async fn fetch(&self, id: &str) -> DomainResult<Option<ChangeOrder>> {
        let row = sqlx::query_as::<_, ChangeOrderRow>(&format!(
            "{} WHERE id = $1",
            SELECT_CHANGE_ORDER
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;
        match row {
            Some(row) => {
                let items = self.load_change_order_items(id).await?;
                Ok(Some(change_order_to_domain(row, items)?))
            }
            None => Ok(None),
        }
    }

    async fn update(&self, change_order: &ChangeOrder) -> DomainResult<()> {
        ChangeOrderRepository::insert(self, change_order).await
    }

    async fn persist_approval(
        &self,
        change_order: &ChangeOrder,
        contract: &Contract,
    ) -> DomainResult<()> {
        // The status write and the amount write succeed or fail together.
        let mut tx = self.pool.begin().await.map_err(storage)?;
        write_change_order(&mut tx, change_order)
            .await
            .map_err(storage)?;
        write_contract(&mut tx, contract).await.map_err(storage)?;
        tx.commit().await.map_err(storage)
    }

    async fn list_by_contract(&self, contract_id: &str) -> DomainResult<Vec<ChangeOrder>> {
        let rows = sqlx::query_as::<_, ChangeOrderRow>(&format!(
            "{} WHERE contract_id = $1 ORDER BY id",
            SELECT_CHANGE_ORDER
        ))
        .bind(contract_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        let mut orders = Vec::with_capacity(rows.len());
        for row in rows {
            let items = self.load_change_order_items(&row.id).await?;
            orders.push(change_order_to_domain(row, items)?);
        }
        Ok(orders)
    }

    async fn approved_total_for_project(&self, project_id: Uuid) -> DomainResult<Decimal> {
        sqlx::query_scalar::<_, Decimal>(
            r#"
            SELECT COALESCE(SUM(amount), 0)
            FROM change_orders
            WHERE project_id = $1 AND status = 'APPROVED'
            "#,
        )
        .bind(project_id)
        .fetch_one(&self.pool)
        .await
        .map_err(storage)
    }
}

// ------------------------------------------------------ payment applications

#[derive(sqlx::FromRow)]
struct ApplicationRow {
    id: String,
    contract_id: String,
    project_id: Uuid,
    period_no: i32,
    progress_percent: Decimal,
    cumulative_percent: Decimal,
    request_amount: Decimal,
    retention_amount: Decimal,
    net_amount: Decimal,
    received_amount: Decimal,
    application_date: NaiveDate,
    status: String,
    notes: Option<String>,
    locked_at: Option<DateTime<Utc>>,
    locked_by: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct ReceiptRow {
    id: String,
    application_id: String,
    amount: Decimal,
    receipt_date: NaiveDate,
    method: Option<String>,
    received_by: String,
    created_at: DateTime<Utc>,
}

fn application_to_domain(
    row: ApplicationRow,
    receipts: Vec<ReceiptRow>,
) -> DomainResult<PaymentApplication> {
    let status = row
        .status
        .parse()
        .map_err(|e: String| corrupt(format!("payment application {}: {}", row.id, e)))?;
    Ok(PaymentApplication {
        id: row.id,
        contract_id: row.contract_id,
        project_id: row.project_id,
        period_no: row.period_no,
        progress_percent: row.progress_percent,
        cumulative_percent: row.cumulative_percent,
        request_amount: row.request_amount,
        retention_amount: row.retention_amount,
        net_amount: row.net_amount,
        received_amount: row.received_amount,
        application_date: row.application_date,
        status,
        notes: row.notes,
        lock: compose_lock(row.locked_at, row.locked_by),
        receipts: receipts
            .into_iter()
            .map(|r| PaymentReceipt {
                id: r.id,
                application_id: r.application_id,
                amount: r.amount,
                receipt_date: r.receipt_date,
                method: r.method,
                received_by: r.received_by,
                created_at: r.created_at,
            })
            .collect(),
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}

const SELECT_APPLICATION: &str = r#"
    SELECT id, contract_id, project_id, period_no, progress_percent,
           cumulative_percent, request_amount, retention_amount, net_amount,
           received_amount, application_date, status, notes, locked_at,
           locked_by, created_at, updated_at
    FROM payment_applications
"#;

async fn write_application(
    tx: &mut Transaction<'_, Postgres>,
    application: &PaymentApplication,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO payment_applications (id, contract_id, project_id, period_no,
                                          progress_percent, cumulative_percent,
                                          request_amount, retention_amount, net_amount,
                                          received_amount, application_date, status,
                                          notes, locked_at, locked_by, created_at,
                                          updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
        ON CONFLICT (id) DO UPDATE SET
            progress_percent = EXCLUDED.progress_percent,
            cumulative_percent = EXCLUDED.cumulative_percent,
            request_amount = EXCLUDED.request_amount,
            retention_amount = EXCLUDED.retention_amount,
            net_amount = EXCLUDED.net_amount,
            received_amount = EXCLUDED.received_amount,
            application_date = EXCLUDED.application_date,
            status = EXCLUDED.status,
            notes = EXCLUDED.notes,
            locked_at = EXCLUDED.locked_at,
            locked_by = EXCLUDED.locked_by,
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(&application.id)
    .bind(&application.contract_id)
    .bind(application.project_id)
    .bind(application.period_no)
    .bind(application.progress_percent)
    .bind(application.cumulative_percent)
    .bind(application.request_amount)
    .bind(application.retention_amount)
    .bind(application.net_amount)
    .bind(application.received_amount)
    .bind(application.application_date)
    .bind(application.status.as_str())
    .bind(&application.notes)
    .bind(application.lock.as_ref().map(|l| l.locked_at))
    .bind(application.lock.as_ref().map(|l| l.locked_by.clone()))
    .bind(application.created_at)
    .bind(application.updated_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

impl PgContractStore {
    async fn load_receipts(&self, application_id: &str) -> DomainResult<Vec<ReceiptRow>> {
        sqlx::query_as::<_, ReceiptRow>(
            r#"
            SELECT id, application_id, amount, receipt_date, method, received_by, created_at
            FROM payment_receipts
            WHERE application_id = $1
            ORDER BY created_at, id
            "#,
        )
        .bind(application_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)
    }
}

#[async_trait]
impl PaymentApplicationRepository for PgContractStore {
    async fn create_next(
        &self,
        contract: &Contract,
        id: String,
        input: CreateApplication,
    ) -> DomainResult<PaymentApplication> {
        let mut tx = self.pool.begin().await.map_err(storage)?;

        // Serialize creators on the contract row: concurrent calls for the
        // same contract queue here until this transaction resolves.
        sqlx::query("SELECT id FROM contracts WHERE id = $1 FOR UPDATE")
            .bind(&contract.id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(storage)?;

        let previous = sqlx::query_as::<_, ApplicationRow>(&format!(
            "{} WHERE contract_id = $1 ORDER BY period_no DESC LIMIT 1",
            SELECT_APPLICATION
        ))
        .bind(&contract.id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(storage)?
        .map(|row| application_to_domain(row, Vec::new()))
        .transpose()?;

        let existing = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM payment_applications WHERE contract_id = $1",
        )
        .bind(&contract.id)
        .fetch_one(&mut *tx)
        .await
        .map_err(storage)?;

        let application = PaymentApplication::next_in_series(
            id,
            contract,
            previous.as_ref(),
            existing as usize,
            &input,
        )?;
        write_application(&mut tx, &application)
            .await
            .map_err(storage)?;
        tx.commit().await.map_err(storage)?;
        Ok(application)
    }

    async fn fetch(&self, id: &str) -> DomainResult<Option<PaymentApplication>> {
        let row = sqlx::query_as::<_, ApplicationRow>(&format!(
            "{} WHERE id = $1",
            SELECT_APPLICATION
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;
        match row {
            Some(row) => {
                let receipts = self.load_receipts(id).await?;
                Ok(Some(application_to_domain(row, receipts)?))
            }
            None => Ok(None),
        }
    }

    async fn update(&self, application: &PaymentApplication) -> DomainResult<()> {
        let mut tx = self.pool.begin().await.map_err(storage)?;
        write_application(&mut tx, application)
            .await
            .map_err(storage)?;
        tx.commit().await.map_err(storage)
    }

    async fn add_receipt(
        &self,
        application: &PaymentApplication,
        receipt: &PaymentReceipt,
    ) -> DomainResult<()> {
        // Receipt insert and settlement update land together.
        let mut tx = self.pool.begin().await.map_err(storage)?;
        sqlx::query(
            r#"
            INSERT INTO payment_receipts (id, application_id, amount, receipt_date,
                                          method, received_by, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&receipt.id)
        .bind(&receipt.application_id)
        .bind(receipt.amount)
        .bind(receipt.receipt_date)
        .bind(&receipt.method)
        .bind(&receipt.received_by)
        .bind(receipt.created_at)
        .execute(&mut *tx)
        .await
        .map_err(storage)?;
        write_application(&mut tx, application)
            .await
            .map_err(storage)?;
        tx.commit().await.map_err(storage)
    }

    async fn list_by_contract(&self, contract_id: &str) -> DomainResult<Vec<PaymentApplication>> {
        let rows = sqlx::query_as::<_, ApplicationRow>(&format!(
            "{} WHERE contract_id = $1 ORDER BY period_no",
            SELECT_APPLICATION
        ))
        .bind(contract_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        let mut applications = Vec::with_capacity(rows.len());
        for row in rows {
            let receipts = self.load_receipts(&row.id).await?;
            applications.push(application_to_domain(row, receipts)?);
        }
        Ok(applications)
    }

    async fn list_by_project(&self, project_id: Uuid) -> DomainResult<Vec<PaymentApplication>> {
        let rows = sqlx::query_as::<_, ApplicationRow>(&format!(
            "{} WHERE project_id = $1 ORDER BY id",
            SELECT_APPLICATION
        ))
        .bind(project_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        let mut applications = Vec::with_capacity(rows.len());
        for row in rows {
            let receipts = self.load_receipts(&row.id).await?;
            applications.push(application_to_domain(row, receipts)?);
        }
        Ok(applications)
    }
}
