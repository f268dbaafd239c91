//! Finance collaborator ports.
//!
//! The core never books transactions itself; it hands the finance module a
//! request carrying a stable `(reference_type, reference_id)` pair and the
//! collaborator inserts idempotently. The read side feeds profit analysis.

use crate::error::DomainResult;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionKind {
    Income,
    Expense,
}

/// Request to book a transaction from a source document.
#[derive(Debug, Clone)]
pub struct TransactionRequest {
    pub kind: TransactionKind,
    pub amount: Decimal,
    pub date: NaiveDate,
    pub category: String,
    pub description: Option<String>,
    pub project_id: Uuid,
    pub reference_type: String,
    pub reference_id: String,
    pub created_by: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinanceTransaction {
    pub id: Uuid,
    pub kind: TransactionKind,
    pub amount: Decimal,
    pub date: NaiveDate,
    pub category: String,
    pub description: Option<String>,
    pub project_id: Uuid,
    pub reference_type: String,
    pub reference_id: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait FinanceGateway: Send + Sync {
    /// Idempotent on `(reference_type, reference_id)`: a replay returns the
    /// originally booked transaction and creates nothing.
    async fn create_from_source(
        &self,
        request: TransactionRequest,
    ) -> DomainResult<FinanceTransaction>;
}

/// A recorded project cost, paid or still owed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostEntry {
    pub id: Uuid,
    pub project_id: Uuid,
    pub category: String,
    pub amount: Decimal,
    pub paid: bool,
}

/// Read side consumed by profit analysis.
#[async_trait]
pub trait FinanceReader: Send + Sync {
    async fn costs_for_project(&self, project_id: Uuid) -> DomainResult<Vec<CostEntry>>;
    async fn invoiced_total(&self, project_id: Uuid) -> DomainResult<Decimal>;
}

/// Deterministic cost-entry reference for the work-order completion handler,
/// so at-least-once delivery stays idempotent.
pub fn work_order_cost_reference(wo_number: &str) -> String {
    format!("CE-{}-01", wo_number)
}

#[derive(Default)]
struct FinanceState {
    transactions: HashMap<(String, String), FinanceTransaction>,
    costs: Vec<CostEntry>,
    invoiced: HashMap<Uuid, Decimal>,
}

/// In-memory finance hub implementing both ports, for tests and embedding.
#[derive(Default)]
pub struct MemoryFinance {
    inner: Mutex<FinanceState>,
}

impl MemoryFinance {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_cost(&self, entry: CostEntry) {
        let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        state.costs.push(entry);
    }

    pub fn record_invoice(&self, project_id: Uuid, amount: Decimal) {
        let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        *state.invoiced.entry(project_id).or_default() += amount;
    }

    pub fn transaction_count(&self) -> usize {
        let state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        state.transactions.len()
    }
}

#[async_trait]
impl FinanceGateway for MemoryFinance {
    async fn create_from_source(
        &self,
        request: TransactionRequest,
    ) -> DomainResult<FinanceTransaction> {
        let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let key = (request.reference_type.clone(), request.reference_id.clone());
        let transaction = state.transactions.entry(key).or_insert_with(|| {
            FinanceTransaction {
                id: Uuid::new_v4(),
                kind: request.kind,
                amount: request.amount,
                date: request.date,
                category: request.category.clone(),
                description: request.description.clone(),
                project_id: request.project_id,
                reference_type: request.reference_type.clone(),
                reference_id: request.reference_id.clone(),
                created_by: request.created_by.clone(),
                created_at: Utc::now(),
            }
        });
        Ok(transaction.clone())
    }
}

#[async_trait]
impl FinanceReader for MemoryFinance {
    async fn costs_for_project(&self, project_id: Uuid) -> DomainResult<Vec<CostEntry>> {
        let state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(state
            .costs
            .iter()
            .filter(|c| c.project_id == project_id)
            .cloned()
            .collect())
    }

    async fn invoiced_total(&self, project_id: Uuid) -> DomainResult<Decimal> {
        let state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(state.invoiced.get(&project_id).copied().unwrap_or_default())
    }
}
