use crate::changes::ChangeOrder;
use crate::models::{Contract, ContractStatus};
use crate::payment::{CreateApplication, PaymentApplication, PaymentReceipt};
use async_trait::async_trait;
use girder_core::DomainResult;
use rust_decimal::Decimal;
use uuid::Uuid;

/// Persistence port for contracts.
#[async_trait]
pub trait ContractRepository: Send + Sync {
    async fn insert(&self, contract: &Contract) -> DomainResult<()>;

    async fn fetch(&self, id: &str) -> DomainResult<Option<Contract>>;

    async fn update(&self, contract: &Contract) -> DomainResult<()>;

    /// The contract a quotation converted into, if any.
    async fn find_by_quotation(&self, quotation_id: &str) -> DomainResult<Option<Contract>>;

    /// A project's contract, if it has progressed that far.
    async fn find_by_project(&self, project_id: Uuid) -> DomainResult<Option<Contract>>;

    async fn list_by_status(&self, status: ContractStatus) -> DomainResult<Vec<Contract>>;
}

/// Persistence port for change orders.
#[async_trait]
pub trait ChangeOrderRepository: Send + Sync {
    async fn insert(&self, change_order: &ChangeOrder) -> DomainResult<()>;

    async fn fetch(&self, id: &str) -> DomainResult<Option<ChangeOrder>>;

    async fn update(&self, change_order: &ChangeOrder) -> DomainResult<()>;

    /// Commits the approved change order and the contract's moved amounts
    /// as a single atomic unit; partial application must be impossible.
    async fn persist_approval(
        &self,
        change_order: &ChangeOrder,
        contract: &Contract,
    ) -> DomainResult<()>;

    async fn list_by_contract(&self, contract_id: &str) -> DomainResult<Vec<ChangeOrder>>;

    /// Sum of APPROVED change orders filtered by project (not just
    /// contract), so cross-project rows can never leak into a roll-up.
    async fn approved_total_for_project(&self, project_id: Uuid) -> DomainResult<Decimal>;
}

/// Persistence port for payment applications and their receipts.
#[async_trait]
pub trait PaymentApplicationRepository: Send + Sync {
    /// Builds and inserts the next application in the contract's series.
    /// Implementations must serialize per contract: the read of the latest
    /// application, the period count and the insert form one atomic unit,
    /// so concurrent creators can never share a period number or double
    /// count cumulative progress.
    async fn create_next(
        &self,
        contract: &Contract,
        id: String,
        input: CreateApplication,
    ) -> DomainResult<PaymentApplication>;

    async fn fetch(&self, id: &str) -> DomainResult<Option<PaymentApplication>>;

    async fn update(&self, application: &PaymentApplication) -> DomainResult<()>;

    /// Persist a new receipt row together with the application's updated
    /// received amount and status.
    async fn add_receipt(
        &self,
        application: &PaymentApplication,
        receipt: &PaymentReceipt,
    ) -> DomainResult<()>;

    async fn list_by_contract(&self, contract_id: &str) -> DomainResult<Vec<PaymentApplication>>;

    async fn list_by_project(&self, project_id: Uuid) -> DomainResult<Vec<PaymentApplication>>;
}
