//! Change orders: approved modifications to a contract's scope and amount.
//!
//! Approval is the one place a contract's amount moves, and the status
//! write and the amount write commit together or not at all.

use crate::models::Contract;
use crate::repository::{ChangeOrderRepository, ContractRepository};
use chrono::{DateTime, Utc};
use girder_core::lifecycle::{prepend_note, StateMachine};
use girder_core::sequence::SequenceAllocator;
use girder_core::{DomainError, DomainResult};
use girder_shared::ids::{DocumentKind, PeriodKey};
use girder_shared::money;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeOrderStatus {
    Draft,
    Pending,
    Approved,
}

impl ChangeOrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeOrderStatus::Draft => "DRAFT",
            ChangeOrderStatus::Pending => "PENDING",
            ChangeOrderStatus::Approved => "APPROVED",
        }
    }
}

impl FromStr for ChangeOrderStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "DRAFT" => Ok(ChangeOrderStatus::Draft),
            "PENDING" => Ok(ChangeOrderStatus::Pending),
            "APPROVED" => Ok(ChangeOrderStatus::Approved),
            other => Err(format!("unknown change order status: {}", other)),
        }
    }
}

static FLOW: StateMachine<ChangeOrderStatus> = StateMachine::new(&[
    (ChangeOrderStatus::Draft, ChangeOrderStatus::Pending),
    (ChangeOrderStatus::Pending, ChangeOrderStatus::Approved),
    (ChangeOrderStatus::Pending, ChangeOrderStatus::Draft),
]);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeOrder {
    pub id: String,
    pub contract_id: String,
    pub project_id: Uuid,
    pub title: String,
    /// Sum of item amounts; negative for deduction orders.
    pub amount: Decimal,
    pub days_impact: i32,
    pub status: ChangeOrderStatus,
    pub notes: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub approved_by: Option<String>,
    pub items: Vec<ChangeOrderItem>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeOrderItem {
    pub id: Uuid,
    pub name: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub amount: Decimal,
    pub sort_order: i32,
}

/// Line input accepted by create/update calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeItemInput {
    pub name: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
}

impl ChangeOrder {
    pub fn new(
        id: String,
        contract_id: String,
        project_id: Uuid,
        title: String,
        days_impact: i32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            contract_id,
            project_id,
            title,
            amount: Decimal::ZERO,
            days_impact,
            status: ChangeOrderStatus::Draft,
            notes: None,
            approved_at: None,
            approved_by: None,
            items: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Swap in a new ordered item list and re-derive the amount.
    pub fn replace_items(&mut self, inputs: Vec<ChangeItemInput>) {
        self.items = inputs
            .into_iter()
            .enumerate()
            .map(|(position, input)| {
                let amount = money::line_amount(input.quantity, input.unit_price);
                ChangeOrderItem {
                    id: Uuid::new_v4(),
                    name: input.name,
                    quantity: input.quantity,
                    unit_price: input.unit_price,
                    amount,
                    sort_order: position as i32,
                }
            })
            .collect();
        self.amount = money::items_subtotal(self.items.iter().map(|i| (i.quantity, i.unit_price)));
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone)]
pub struct CreateChangeOrder {
    pub contract_id: String,
    pub title: String,
    pub days_impact: i32,
    pub items: Vec<ChangeItemInput>,
    pub notes: Option<String>,
}

/// Partial update; `None` leaves a field untouched. Valid only while DRAFT.
#[derive(Debug, Clone, Default)]
pub struct ChangeOrderPatch {
    pub title: Option<String>,
    pub days_impact: Option<i32>,
    pub items: Option<Vec<ChangeItemInput>>,
    pub notes: Option<String>,
}

/// Change-order lifecycle against an active or warranty contract.
pub struct ChangeOrderEngine {
    changes: Arc<dyn ChangeOrderRepository>,
    contracts: Arc<dyn ContractRepository>,
    sequences: Arc<dyn SequenceAllocator>,
}

impl ChangeOrderEngine {
    pub fn new(
        changes: Arc<dyn ChangeOrderRepository>,
        contracts: Arc<dyn ContractRepository>,
        sequences: Arc<dyn SequenceAllocator>,
    ) -> Self {
        Self {
            changes,
            contracts,
            sequences,
        }
    }

    async fn get_contract(&self, id: &str) -> DomainResult<Contract> {
        self.contracts
            .fetch(id)
            .await?
            .ok_or_else(|| DomainError::NotFound(id.to_string()))
    }

    pub async fn create(&self, input: CreateChangeOrder) -> DomainResult<ChangeOrder> {
        let contract = self.get_contract(&input.contract_id).await?;
        if !contract.accepts_change_orders() {
            return Err(DomainError::InvalidContractState {
                id: contract.id.clone(),
                status: contract.status.as_str().to_string(),
            });
        }

        let id = self
            .sequences
            .next_id(DocumentKind::ChangeOrder, PeriodKey::current())
            .await?;
        let mut change_order = ChangeOrder::new(
            id,
            contract.id,
            contract.project_id,
            input.title,
            input.days_impact,
        );
        change_order.notes = input.notes;
        change_order.replace_items(input.items);
        self.changes.insert(&change_order).await?;
        info!(id = %change_order.id, amount = %change_order.amount, "change order created");
        Ok(change_order)
    }

    pub async fn get(&self, id: &str) -> DomainResult<ChangeOrder> {
        self.changes
            .fetch(id)
            .await?
            .ok_or_else(|| DomainError::NotFound(id.to_string()))
    }

    pub async fn list_by_contract(&self, contract_id: &str) -> DomainResult<Vec<ChangeOrder>> {
        self.changes.list_by_contract(contract_id).await
    }

    /// Editable only while DRAFT; replacing items recomputes the amount.
    pub async fn update(&self, id: &str, patch: ChangeOrderPatch) -> DomainResult<ChangeOrder> {
        let mut change_order = self.get(id).await?;
        if change_order.status != ChangeOrderStatus::Draft {
            return Err(DomainError::Validation(format!(
                "change order {} is no longer editable in status {}",
                change_order.id,
                change_order.status.as_str()
            )));
        }
        if let Some(title) = patch.title {
            change_order.title = title;
        }
        if let Some(days) = patch.days_impact {
            change_order.days_impact = days;
        }
        if let Some(notes) = patch.notes {
            change_order.notes = Some(notes);
        }
        if let Some(items) = patch.items {
            change_order.replace_items(items);
        }
        change_order.updated_at = Utc::now();
        self.changes.update(&change_order).await?;
        Ok(change_order)
    }

    /// DRAFT -> PENDING.
    pub async fn submit(&self, id: &str) -> DomainResult<ChangeOrder> {
        let mut change_order = self.get(id).await?;
        FLOW.ensure(change_order.status, ChangeOrderStatus::Pending)?;
        change_order.status = ChangeOrderStatus::Pending;
        change_order.updated_at = Utc::now();
        self.changes.update(&change_order).await?;
        Ok(change_order)
    }

    /// PENDING -> APPROVED. Moves the contract's change total and current
    /// amount in the same transaction as the status write; the contract
    /// must still be in execution or warranty.
    pub async fn approve(&self, id: &str, approved_by: &str) -> DomainResult<ChangeOrder> {
        let mut change_order = self.get(id).await?;
        FLOW.ensure(change_order.status, ChangeOrderStatus::Approved)?;

        let mut contract = self.get_contract(&change_order.contract_id).await?;
        if !contract.accepts_change_orders() {
            return Err(DomainError::InvalidContractState {
                id: contract.id.clone(),
                status: contract.status.as_str().to_string(),
            });
        }

        change_order.status = ChangeOrderStatus::Approved;
        change_order.approved_at = Some(Utc::now());
        change_order.approved_by = Some(approved_by.to_string());
        change_order.updated_at = Utc::now();
        contract.apply_change_total(contract.change_amount + change_order.amount);

        self.changes
            .persist_approval(&change_order, &contract)
            .await?;
        info!(
            id = %change_order.id,
            contract = %contract.id,
            current = %contract.current_amount,
            "change order approved"
        );
        Ok(change_order)
    }

    /// PENDING -> DRAFT with the rejection reason prepended to the notes.
    pub async fn reject(&self, id: &str, reason: &str) -> DomainResult<ChangeOrder> {
        let mut change_order = self.get(id).await?;
        FLOW.ensure(change_order.status, ChangeOrderStatus::Draft)?;
        change_order.status = ChangeOrderStatus::Draft;
        prepend_note(&mut change_order.notes, &format!("[駁回] {}", reason));
        change_order.updated_at = Utc::now();
        self.changes.update(&change_order).await?;
        Ok(change_order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryContractStore;
    use crate::models::ContractStatus;
    use girder_core::sequence::MemorySequences;
    use rust_decimal_macros::dec;

    struct Fixture {
        engine: ChangeOrderEngine,
        store: Arc<MemoryContractStore>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryContractStore::new());
        let engine = ChangeOrderEngine::new(
            store.clone(),
            store.clone(),
            Arc::new(MemorySequences::new()),
        );
        Fixture { engine, store }
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

    fn single_item(amount: Decimal) -> Vec<ChangeItemInput> {
        vec![ChangeItemInput {
            name: "Additional works".to_string(),
            quantity: dec!(1),
            unit_price: amount,
        }]
    }

    #[tokio::test]
    async fn test_create_requires_active_or_warranty_contract() {
        let f = fixture();
        let mut contract = active_contract(&f.store).await;
        contract.status = ContractStatus::Draft;
        f.store.put_contract(&contract);

        let err = f
            .engine
            .create(CreateChangeOrder {
                contract_id: contract.id.clone(),
                title: "Too early".to_string(),
                days_impact: 0,
                items: single_item(dec!(5000)),
                notes: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidContractState { .. }));
    }

    #[tokio::test]
    async fn test_approval_moves_contract_amount_atomically() {
        let f = fixture();
        let contract = active_contract(&f.store).await;

        let change_order = f
            .engine
            .create(CreateChangeOrder {
                contract_id: contract.id.clone(),
                title: "Extra drainage".to_string(),
                days_impact: 10,
                items: single_item(dec!(5000)),
                notes: None,
            })
            .await
            .unwrap();
        assert_eq!(change_order.amount, dec!(5000.00));

        f.engine.submit(&change_order.id).await.unwrap();
        let approved = f.engine.approve(&change_order.id, "pm").await.unwrap();
        assert_eq!(approved.status, ChangeOrderStatus::Approved);
        assert!(approved.approved_at.is_some());

        let contract = f.store.get_contract(&contract.id).unwrap();
        assert_eq!(contract.change_amount, dec!(5000.00));
        assert_eq!(contract.current_amount, dec!(26000.00));
        // Retention follows the current amount.
        assert_eq!(contract.retention_amount, dec!(1300.00));
    }

    #[tokio::test]
    async fn test_negative_change_order_reduces_contract() {
        let f = fixture();
        let contract = active_contract(&f.store).await;

        let change_order = f
            .engine
            .create(CreateChangeOrder {
                contract_id: contract.id.clone(),
                title: "Omitted landscaping".to_string(),
                days_impact: 0,
                items: vec![ChangeItemInput {
                    name: "Landscaping credit".to_string(),
                    quantity: dec!(-1),
                    unit_price: dec!(3000),
                }],
                notes: None,
            })
            .await
            .unwrap();
        assert_eq!(change_order.amount, dec!(-3000.00));

        f.engine.submit(&change_order.id).await.unwrap();
        f.engine.approve(&change_order.id, "pm").await.unwrap();

        let contract = f.store.get_contract(&contract.id).unwrap();
        assert_eq!(contract.current_amount, dec!(18000.00));
    }

    #[tokio::test]
    async fn test_approve_requires_pending_and_live_contract() {
        let f = fixture();
        let contract = active_contract(&f.store).await;
        let change_order = f
            .engine
            .create(CreateChangeOrder {
                contract_id: contract.id.clone(),
                title: "Extra".to_string(),
                days_impact: 0,
                items: single_item(dec!(1000)),
                notes: None,
            })
            .await
            .unwrap();

        // Straight from draft: invalid transition.
        assert!(matches!(
            f.engine.approve(&change_order.id, "pm").await.unwrap_err(),
            DomainError::InvalidTransition { .. }
        ));

        // Contract closed between submit and approve: state guard fires.
        f.engine.submit(&change_order.id).await.unwrap();
        let mut closed = f.store.get_contract(&contract.id).unwrap();
        closed.status = ContractStatus::Closed;
        f.store.put_contract(&closed);
        assert!(matches!(
            f.engine.approve(&change_order.id, "pm").await.unwrap_err(),
            DomainError::InvalidContractState { .. }
        ));
    }

    #[tokio::test]
    async fn test_reject_returns_to_draft_and_keeps_audit_note() {
        let f = fixture();
        let contract = active_contract(&f.store).await;
        let change_order = f
            .engine
            .create(CreateChangeOrder {
                contract_id: contract.id.clone(),
                title: "Extra".to_string(),
                days_impact: 0,
                items: single_item(dec!(1000)),
                notes: Some("original note".to_string()),
            })
            .await
            .unwrap();
        f.engine.submit(&change_order.id).await.unwrap();

        let rejected = f
            .engine
            .reject(&change_order.id, "needs cost breakdown")
            .await
            .unwrap();
        assert_eq!(rejected.status, ChangeOrderStatus::Draft);
        assert_eq!(
            rejected.notes.as_deref(),
            Some("[駁回] needs cost breakdown\noriginal note")
        );

        // Editable again, and the amount recomputes.
        let updated = f
            .engine
            .update(
                &change_order.id,
                ChangeOrderPatch {
                    items: Some(single_item(dec!(2500))),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.amount, dec!(2500.00));
    }

    #[tokio::test]
    async fn test_update_blocked_after_submit() {
        let f = fixture();
        let contract = active_contract(&f.store).await;
        let change_order = f
            .engine
            .create(CreateChangeOrder {
                contract_id: contract.id,
                title: "Extra".to_string(),
                days_impact: 0,
                items: single_item(dec!(1000)),
                notes: None,
            })
            .await
            .unwrap();
        f.engine.submit(&change_order.id).await.unwrap();

        let err = f
            .engine
            .update(
                &change_order.id,
                ChangeOrderPatch {
                    title: Some("Renamed".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }
}
