//! Payment applications: periodic draw requests against a contract's
//! current amount, net of retention, settled incrementally by receipts.

use crate::models::{Contract, ContractStatus};
use crate::repository::{ContractRepository, PaymentApplicationRepository};
use chrono::{DateTime, NaiveDate, Utc};
use girder_core::finance::{FinanceGateway, TransactionKind, TransactionRequest};
use girder_core::lifecycle::{prepend_note, Lock, StateMachine};
use girder_core::sequence::SequenceAllocator;
use girder_core::{DomainError, DomainResult};
use girder_shared::ids::{DocumentKind, PeriodKey};
use girder_shared::money;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Draft,
    Pending,
    Approved,
    Paid,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Draft => "DRAFT",
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Approved => "APPROVED",
            PaymentStatus::Paid => "PAID",
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "DRAFT" => Ok(PaymentStatus::Draft),
            "PENDING" => Ok(PaymentStatus::Pending),
            "APPROVED" => Ok(PaymentStatus::Approved),
            "PAID" => Ok(PaymentStatus::Paid),
            other => Err(format!("unknown payment status: {}", other)),
        }
    }
}

static FLOW: StateMachine<PaymentStatus> = StateMachine::new(&[
    (PaymentStatus::Draft, PaymentStatus::Pending),
    (PaymentStatus::Pending, PaymentStatus::Approved),
    (PaymentStatus::Pending, PaymentStatus::Draft),
    (PaymentStatus::Approved, PaymentStatus::Paid),
]);

/// Funds actually received against an application. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentReceipt {
    pub id: String,
    pub application_id: String,
    pub amount: Decimal,
    pub receipt_date: NaiveDate,
    pub method: Option<String>,
    pub received_by: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentApplication {
    pub id: String,
    pub contract_id: String,
    pub project_id: Uuid,
    /// 1-based, sequential per contract.
    pub period_no: i32,
    pub progress_percent: Decimal,
    pub cumulative_percent: Decimal,
    pub request_amount: Decimal,
    pub retention_amount: Decimal,
    pub net_amount: Decimal,
    pub received_amount: Decimal,
    pub application_date: NaiveDate,
    pub status: PaymentStatus,
    pub notes: Option<String>,
    pub lock: Option<Lock>,
    pub receipts: Vec<PaymentReceipt>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating the next application in a contract's series.
#[derive(Debug, Clone)]
pub struct CreateApplication {
    pub contract_id: String,
    pub progress_percent: Decimal,
    pub request_amount: Decimal,
    pub application_date: NaiveDate,
    pub notes: Option<String>,
}

impl PaymentApplication {
    /// Build the next application in the contract's series. Callers must
    /// hold the per-contract creation lock while reading `previous` and
    /// `existing`; repository implementations call this inside that unit.
    pub fn next_in_series(
        id: String,
        contract: &Contract,
        previous: Option<&PaymentApplication>,
        existing: usize,
        input: &CreateApplication,
    ) -> DomainResult<Self> {
        let previous_cumulative = previous
            .map(|p| p.cumulative_percent)
            .unwrap_or(Decimal::ZERO);
        let cumulative_percent = previous_cumulative + input.progress_percent;
        if cumulative_percent > Decimal::ONE_HUNDRED {
            return Err(DomainError::CumulativeExceeded {
                contract_id: contract.id.clone(),
                attempted: cumulative_percent,
            });
        }

        let request_amount = money::round2(input.request_amount);
        let retention_amount = money::retention(request_amount, contract.retention_rate);
        let now = Utc::now();
        Ok(Self {
            id,
            contract_id: contract.id.clone(),
            project_id: contract.project_id,
            period_no: existing as i32 + 1,
            progress_percent: input.progress_percent,
            cumulative_percent,
            request_amount,
            retention_amount,
            net_amount: request_amount - retention_amount,
            received_amount: Decimal::ZERO,
            application_date: input.application_date,
            status: PaymentStatus::Draft,
            notes: input.notes.clone(),
            lock: None,
            receipts: Vec::new(),
            created_at: now,
            updated_at: now,
        })
    }

    pub fn is_locked(&self) -> bool {
        self.lock.is_some()
    }

    /// Re-derive retention and net from a new request amount at the
    /// contract's current rate.
    pub fn reprice(&mut self, request_amount: Decimal, retention_rate: Decimal) {
        self.request_amount = money::round2(request_amount);
        self.retention_amount = money::retention(self.request_amount, retention_rate);
        self.net_amount = self.request_amount - self.retention_amount;
        self.updated_at = Utc::now();
    }

    /// Fold a receipt into the running total; fully covered means PAID.
    pub fn settle(&mut self, receipt: PaymentReceipt) {
        self.received_amount += receipt.amount;
        self.receipts.push(receipt);
        if self.received_amount >= self.net_amount {
            self.status = PaymentStatus::Paid;
        }
        self.updated_at = Utc::now();
    }
}

/// Partial update; `None` leaves a field untouched. Once locked only
/// `notes` is accepted.
#[derive(Debug, Clone, Default)]
pub struct ApplicationPatch {
    pub request_amount: Option<Decimal>,
    pub application_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

/// Payment-application lifecycle: create against an active contract,
/// submit, approve (locks), settle through receipts.
pub struct PaymentApplicationEngine {
    payments: Arc<dyn PaymentApplicationRepository>,
    contracts: Arc<dyn ContractRepository>,
    sequences: Arc<dyn SequenceAllocator>,
    finance: Arc<dyn FinanceGateway>,
}

impl PaymentApplicationEngine {
    pub fn new(
        payments: Arc<dyn PaymentApplicationRepository>,
        contracts: Arc<dyn ContractRepository>,
        sequences: Arc<dyn SequenceAllocator>,
        finance: Arc<dyn FinanceGateway>,
    ) -> Self {
        Self {
            payments,
            contracts,
            sequences,
            finance,
        }
    }

    async fn get_contract(&self, id: &str) -> DomainResult<Contract> {
        self.contracts
            .fetch(id)
            .await?
            .ok_or_else(|| DomainError::NotFound(id.to_string()))
    }

    pub async fn create(&self, input: CreateApplication) -> DomainResult<PaymentApplication> {
        let contract = self.get_contract(&input.contract_id).await?;
        if contract.status != ContractStatus::Active {
            return Err(DomainError::InvalidContractState {
                id: contract.id.clone(),
                status: contract.status.as_str().to_string(),
            });
        }

        let id = self
            .sequences
            .next_id(DocumentKind::PaymentApplication, PeriodKey::current())
            .await?;
        let application = self.payments.create_next(&contract, id, input).await?;
        info!(
            id = %application.id,
            contract = %application.contract_id,
            period = application.period_no,
            cumulative = %application.cumulative_percent,
            "payment application created"
        );
        Ok(application)
    }

    pub async fn get(&self, id: &str) -> DomainResult<PaymentApplication> {
        self.payments
            .fetch(id)
            .await?
            .ok_or_else(|| DomainError::NotFound(id.to_string()))
    }

    pub async fn list_by_contract(
        &self,
        contract_id: &str,
    ) -> DomainResult<Vec<PaymentApplication>> {
        self.payments.list_by_contract(contract_id).await
    }

    /// A request-amount change re-fetches the contract and reprices at its
    /// current retention rate, never a cached one.
    pub async fn update(&self, id: &str, patch: ApplicationPatch) -> DomainResult<PaymentApplication> {
        let mut application = self.get(id).await?;

        if application.is_locked() {
            if patch.request_amount.is_some() || patch.application_date.is_some() {
                return Err(DomainError::Locked {
                    id: application.id.clone(),
                });
            }
            if let Some(notes) = patch.notes {
                application.notes = Some(notes);
                application.updated_at = Utc::now();
                self.payments.update(&application).await?;
            }
            return Ok(application);
        }

        if let Some(request_amount) = patch.request_amount {
            let contract = self.get_contract(&application.contract_id).await?;
            application.reprice(request_amount, contract.retention_rate);
        }
        if let Some(date) = patch.application_date {
            application.application_date = date;
        }
        if let Some(notes) = patch.notes {
            application.notes = Some(notes);
        }
        application.updated_at = Utc::now();
        self.payments.update(&application).await?;
        Ok(application)
    }

    /// DRAFT -> PENDING. Requires a positive request amount.
    pub async fn submit(&self, id: &str) -> DomainResult<PaymentApplication> {
        let mut application = self.get(id).await?;
        FLOW.ensure(application.status, PaymentStatus::Pending)?;
        if application.request_amount <= Decimal::ZERO {
            return Err(DomainError::Validation(format!(
                "payment application {} needs a positive request amount",
                application.id
            )));
        }
        application.status = PaymentStatus::Pending;
        application.updated_at = Utc::now();
        self.payments.update(&application).await?;
        Ok(application)
    }

    /// PENDING -> APPROVED. Sets the lock.
    pub async fn approve(&self, id: &str, approved_by: &str) -> DomainResult<PaymentApplication> {
        let mut application = self.get(id).await?;
        FLOW.ensure(application.status, PaymentStatus::Approved)?;
        application.status = PaymentStatus::Approved;
        application.lock = Some(Lock::new(approved_by));
        application.updated_at = Utc::now();
        self.payments.update(&application).await?;
        info!(id = %application.id, approved_by, "payment application approved");
        Ok(application)
    }

    /// PENDING -> DRAFT with the reason prepended to the notes.
    pub async fn reject(&self, id: &str, reason: &str) -> DomainResult<PaymentApplication> {
        let mut application = self.get(id).await?;
        FLOW.ensure(application.status, PaymentStatus::Draft)?;
        application.status = PaymentStatus::Draft;
        prepend_note(&mut application.notes, &format!("[{}]", reason));
        application.updated_at = Utc::now();
        self.payments.update(&application).await?;
        Ok(application)
    }

    /// Record funds received against an APPROVED application. Covering the
    /// net amount flips it to PAID. The finance collaborator is asked to
    /// book the income idempotently, keyed by the receipt id; a gateway
    /// failure is logged and left to reconciliation, the receipt stands.
    pub async fn add_receipt(
        &self,
        id: &str,
        amount: Decimal,
        receipt_date: NaiveDate,
        method: Option<String>,
        received_by: &str,
    ) -> DomainResult<PaymentApplication> {
        let mut application = self.get(id).await?;
        if application.status != PaymentStatus::Approved {
            return Err(DomainError::InvalidApplicationState {
                id: application.id.clone(),
                status: application.status.as_str().to_string(),
            });
        }

        let receipt_id = self
            .sequences
            .next_id(DocumentKind::Receipt, PeriodKey::current())
            .await?;
        let receipt = PaymentReceipt {
            id: receipt_id,
            application_id: application.id.clone(),
            amount: money::round2(amount),
            receipt_date,
            method,
            received_by: received_by.to_string(),
            created_at: Utc::now(),
        };
        application.settle(receipt.clone());
        self.payments.add_receipt(&application, &receipt).await?;
        info!(
            id = %application.id,
            receipt = %receipt.id,
            received = %application.received_amount,
            status = application.status.as_str(),
            "receipt recorded"
        );

        let booking = self
            .finance
            .create_from_source(TransactionRequest {
                kind: TransactionKind::Income,
                amount: receipt.amount,
                date: receipt.receipt_date,
                category: "PAYMENT".to_string(),
                description: Some(format!(
                    "Receipt against payment application {}",
                    application.id
                )),
                project_id: application.project_id,
                reference_type: "PAYMENT_RECEIPT".to_string(),
                reference_id: receipt.id.clone(),
                created_by: received_by.to_string(),
            })
            .await;
        if let Err(err) = booking {
            warn!(receipt = %receipt.id, error = %err, "finance booking failed");
        }

        Ok(application)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryContractStore;
    use girder_core::finance::MemoryFinance;
    use girder_core::sequence::MemorySequences;
    use rust_decimal_macros::dec;

    struct Fixture {
        engine: PaymentApplicationEngine,
        store: Arc<MemoryContractStore>,
        finance: Arc<MemoryFinance>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryContractStore::new());
        let finance = Arc::new(MemoryFinance::new());
        let engine = PaymentApplicationEngine::new(
            store.clone(),
            store.clone(),
            Arc::new(MemorySequences::new()),
            finance.clone(),
        );
        Fixture {
            engine,
            store,
            finance,
        }
    }

    async fn active_contract(store: &MemoryContractStore) -> Contract {
        let mut contract = Contract::new(
            "CTR-202602-0001".to_string(),
            Uuid::new_v4(),
            None,
            "Main works".to_string(),
            dec!(21000),
            dec!(5),
        );
        contract.status = ContractStatus::Active;
        store.put_contract(&contract);
        contract
    }

    fn application_input(contract_id: &str, progress: Decimal, request: Decimal) -> CreateApplication {
        CreateApplication {
            contract_id: contract_id.to_string(),
            progress_percent: progress,
            request_amount: request,
            application_date: NaiveDate::from_ymd_opt(2026, 2, 20).unwrap(),
            notes: None,
        }
    }

    #[tokio::test]
    async fn test_create_computes_retention_net_and_period() {
        let f = fixture();
        let contract = active_contract(&f.store).await;

        let application = f
            .engine
            .create(application_input(&contract.id, dec!(30), dec!(6000)))
            .await
            .unwrap();

        assert_eq!(application.period_no, 1);
        assert_eq!(application.cumulative_percent, dec!(30));
        assert_eq!(application.retention_amount, dec!(300.00));
        assert_eq!(application.net_amount, dec!(5700.00));
        assert_eq!(application.status, PaymentStatus::Draft);
    }

    #[tokio::test]
    async fn test_cumulative_chain_and_overflow() {
        let f = fixture();
        let contract = active_contract(&f.store).await;

        f.engine
            .create(application_input(&contract.id, dec!(30), dec!(6000)))
            .await
            .unwrap();
        let second = f
            .engine
            .create(application_input(&contract.id, dec!(50), dec!(10000)))
            .await
            .unwrap();
        assert_eq!(second.period_no, 2);
        assert_eq!(second.cumulative_percent, dec!(80));

        let err = f
            .engine
            .create(application_input(&contract.id, dec!(80), dec!(1000)))
            .await
            .unwrap_err();
        match err {
            DomainError::CumulativeExceeded { attempted, .. } => {
                assert_eq!(attempted, dec!(160));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        // Filling exactly to 100 is fine.
        let third = f
            .engine
            .create(application_input(&contract.id, dec!(20), dec!(4000)))
            .await
            .unwrap();
        assert_eq!(third.cumulative_percent, dec!(100));
    }

    #[tokio::test]
    async fn test_create_requires_active_contract() {
        let f = fixture();
        let mut contract = active_contract(&f.store).await;
        contract.status = ContractStatus::Completed;
        f.store.put_contract(&contract);

        let err = f
            .engine
            .create(application_input(&contract.id, dec!(30), dec!(6000)))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidContractState { .. }));
    }

    #[tokio::test]
    async fn test_update_reprices_with_current_contract_rate() {
        let f = fixture();
        let contract = active_contract(&f.store).await;
        let application = f
            .engine
            .create(application_input(&contract.id, dec!(30), dec!(6000)))
            .await
            .unwrap();

        // Retention rate moves on the contract before the patch.
        let mut updated_contract = f.store.get_contract(&contract.id).unwrap();
        updated_contract.apply_retention_rate(dec!(10));
        f.store.put_contract(&updated_contract);

        let repriced = f
            .engine
            .update(
                &application.id,
                ApplicationPatch {
                    request_amount: Some(dec!(8000)),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(repriced.retention_amount, dec!(800.00));
        assert_eq!(repriced.net_amount, dec!(7200.00));
    }

    #[tokio::test]
    async fn test_receipts_settle_and_book_income_once() {
        let f = fixture();
        let contract = active_contract(&f.store).await;
        let application = f
            .engine
            .create(application_input(&contract.id, dec!(30), dec!(6000)))
            .await
            .unwrap();
        f.engine.submit(&application.id).await.unwrap();
        f.engine.approve(&application.id, "finance").await.unwrap();

        let partially_paid = f
            .engine
            .add_receipt(
                &application.id,
                dec!(3000),
                NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
                Some("bank transfer".to_string()),
                "cashier",
            )
            .await
            .unwrap();
        assert_eq!(partially_paid.received_amount, dec!(3000.00));
        assert_eq!(partially_paid.status, PaymentStatus::Approved);

        let paid = f
            .engine
            .add_receipt(
                &application.id,
                dec!(2700),
                NaiveDate::from_ymd_opt(2026, 3, 15).unwrap(),
                None,
                "cashier",
            )
            .await
            .unwrap();
        assert_eq!(paid.received_amount, dec!(5700.00));
        assert_eq!(paid.status, PaymentStatus::Paid);
        assert_eq!(paid.receipts.len(), 2);
        // One income transaction per receipt.
        assert_eq!(f.finance.transaction_count(), 2);
    }

    #[tokio::test]
    async fn test_receipts_require_approved_application() {
        let f = fixture();
        let contract = active_contract(&f.store).await;
        let application = f
            .engine
            .create(application_input(&contract.id, dec!(30), dec!(6000)))
            .await
            .unwrap();

        let err = f
            .engine
            .add_receipt(
                &application.id,
                dec!(1000),
                NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
                None,
                "cashier",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidApplicationState { .. }));
    }

    #[tokio::test]
    async fn test_approval_locks_amounts() {
        let f = fixture();
        let contract = active_contract(&f.store).await;
        let application = f
            .engine
            .create(application_input(&contract.id, dec!(30), dec!(6000)))
            .await
            .unwrap();
        f.engine.submit(&application.id).await.unwrap();
        f.engine.approve(&application.id, "finance").await.unwrap();

        let err = f
            .engine
            .update(
                &application.id,
                ApplicationPatch {
                    request_amount: Some(dec!(9000)),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Locked { .. }));
    }

    #[tokio::test]
    async fn test_reject_reopens_draft() {
        let f = fixture();
        let contract = active_contract(&f.store).await;
        let application = f
            .engine
            .create(application_input(&contract.id, dec!(30), dec!(6000)))
            .await
            .unwrap();
        f.engine.submit(&application.id).await.unwrap();

        let rejected = f
            .engine
            .reject(&application.id, "progress overstated")
            .await
            .unwrap();
        assert_eq!(rejected.status, PaymentStatus::Draft);
        assert!(rejected
            .notes
            .as_deref()
            .unwrap()
            .contains("progress overstated"));
    }
}
