use crate::changes::{ChangeOrder, ChangeOrderStatus};
use crate::models::{Contract, ContractStatus};
use crate::payment::{CreateApplication, PaymentApplication, PaymentReceipt};
use crate::repository::{ChangeOrderRepository, ContractRepository, PaymentApplicationRepository};
use async_trait::async_trait;
use girder_core::DomainResult;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

#[derive(Default)]
struct State {
    contracts: HashMap<String, Contract>,
    change_orders: HashMap<String, ChangeOrder>,
    applications: HashMap<String, PaymentApplication>,
}

/// HashMap-backed store implementing the three contract-side ports behind
/// one lock, which also gives the payment-creation path its per-contract
/// serialization and change-order approval its atomicity.
#[derive(Default)]
pub struct MemoryContractStore {
    inner: Mutex<State>,
}

impl MemoryContractStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // Inherent put/get accessors: the three ports all expose `insert` and
    // `fetch`, which makes direct calls on the concrete store ambiguous.

    pub fn put_contract(&self, contract: &Contract) {
        self.state()
            .contracts
            .insert(contract.id.clone(), contract.clone());
    }

    pub fn get_contract(&self, id: &str) -> Option<Contract> {
        self.state().contracts.get(id).cloned()
    }

    pub fn put_change_order(&self, change_order: &ChangeOrder) {
        self.state()
            .change_orders
            .insert(change_order.id.clone(), change_order.clone());
    }
}

#[async_trait]
impl ContractRepository for MemoryContractStore {
    async fn insert(&self, contract: &Contract) -> DomainResult<()> {
        self.state()
            .contracts
            .insert(contract.id.clone(), contract.clone());
        Ok(())
    }

    async fn fetch(&self, id: &str) -> DomainResult<Option<Contract>> {
        Ok(self.state().contracts.get(id).cloned())
    }

    async fn update(&self, contract: &Contract) -> DomainResult<()> {
        self.state()
            .contracts
            .insert(contract.id.clone(), contract.clone());
        Ok(())
    }

    async fn find_by_quotation(&self, quotation_id: &str) -> DomainResult<Option<Contract>> {
        Ok(self
            .state()
            .contracts
            .values()
            .find(|c| c.quotation_id.as_deref() == Some(quotation_id))
            .cloned())
    }

    async fn find_by_project(&self, project_id: Uuid) -> DomainResult<Option<Contract>> {
        let state = self.state();
        let mut contracts: Vec<&Contract> = state
            .contracts
            .values()
            .filter(|c| c.project_id == project_id)
            .collect();
        contracts.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(contracts.first().map(|c| (*c).clone()))
    }

    async fn list_by_status(&self, status: ContractStatus) -> DomainResult<Vec<Contract>> {
        let state = self.state();
        let mut contracts: Vec<Contract> = state
            .contracts
            .values()
            .filter(|c| c.status == status)
            .cloned()
            .collect();
        contracts.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(contracts)
    }
}

#[async_trait]
impl ChangeOrderRepository for MemoryContractStore {
    async fn insert(&self, change_order: &ChangeOrder) -> DomainResult<()> {
        self.state()
            .change_orders
            .insert(change_order.id.clone(), change_order.clone());
        Ok(())
    }

    async fn fetch(&self, id: &str) -> DomainResult<Option<ChangeOrder>> {
        Ok(self.state().change_orders.get(id).cloned())
    }

    async fn update(&self, change_order: &ChangeOrder) -> DomainResult<()> {
        self.state()
            .change_orders
            .insert(change_order.id.clone(), change_order.clone());
        Ok(())
    }

    async fn persist_approval(
        &self,
        change_order: &ChangeOrder,
        contract: &Contract,
    ) -> DomainResult<()> {
        // Both writes land under one guard or neither does.
        let mut state = self.state();
        state
            .change_orders
            .insert(change_order.id.clone(), change_order.clone());
        state.contracts.insert(contract.id.clone(), contract.clone());
        Ok(())
    }

    async fn list_by_contract(&self, contract_id: &str) -> DomainResult<Vec<ChangeOrder>> {
        let state = self.state();
        let mut orders: Vec<ChangeOrder> = state
            .change_orders
            .values()
            .filter(|co| co.contract_id == contract_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(orders)
    }

    async fn approved_total_for_project(&self, project_id: Uuid) -> DomainResult<Decimal> {
        let state = self.state();
        Ok(state
            .change_orders
            .values()
            .filter(|co| co.project_id == project_id && co.status == ChangeOrderStatus::Approved)
            .map(|co| co.amount)
            .sum())
    }
}

#[async_trait]
impl PaymentApplicationRepository for MemoryContractStore {
    async fn create_next(
        &self,
        contract: &Contract,
        id: String,
        input: CreateApplication,
    ) -> DomainResult<PaymentApplication> {
        // Read-previous, build and insert under one guard: concurrent
        // creators for the same contract serialize here.
        let mut state = self.state();
        let existing: Vec<&PaymentApplication> = state
            .applications
            .values()
            .filter(|a| a.contract_id == contract.id)
            .collect();
        let previous = existing.iter().max_by_key(|a| a.period_no).copied();
        let application =
            PaymentApplication::next_in_series(id, contract, previous, existing.len(), &input)?;
        state
            .applications
            .insert(application.id.clone(), application.clone());
        Ok(application)
    }

    async fn fetch(&self, id: &str) -> DomainResult<Option<PaymentApplication>> {
        Ok(self.state().applications.get(id).cloned())
    }

    async fn update(&self, application: &PaymentApplication) -> DomainResult<()> {
        self.state()
            .applications
            .insert(application.id.clone(), application.clone());
        Ok(())
    }

    async fn add_receipt(
        &self,
        application: &PaymentApplication,
        _receipt: &PaymentReceipt,
    ) -> DomainResult<()> {
        // The application snapshot already carries the settled receipt.
        self.state()
            .applications
            .insert(application.id.clone(), application.clone());
        Ok(())
    }

    async fn list_by_contract(&self, contract_id: &str) -> DomainResult<Vec<PaymentApplication>> {
        let state = self.state();
        let mut applications: Vec<PaymentApplication> = state
            .applications
            .values()
            .filter(|a| a.contract_id == contract_id)
            .cloned()
            .collect();
        applications.sort_by_key(|a| a.period_no);
        Ok(applications)
    }

    async fn list_by_project(&self, project_id: Uuid) -> DomainResult<Vec<PaymentApplication>> {
        let state = self.state();
        let mut applications: Vec<PaymentApplication> = state
            .applications
            .values()
            .filter(|a| a.project_id == project_id)
            .cloned()
            .collect();
        applications.sort_by(|a, b| a.id.cmp(&b.id).then(a.period_no.cmp(&b.period_no)));
        Ok(applications)
    }
}
