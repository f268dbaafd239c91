use crate::models::{Contract, ContractStatus};
use crate::repository::ContractRepository;
use chrono::{Months, NaiveDate, Utc};
use girder_core::lifecycle::{Lock, StateMachine};
use girder_core::project::ProjectGateway;
use girder_core::sequence::SequenceAllocator;
use girder_core::{DomainError, DomainResult};
use girder_quote::models::QuotationStatus;
use girder_quote::repository::QuotationRepository;
use girder_shared::ids::{DocumentKind, PeriodKey};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

static FLOW: StateMachine<ContractStatus> = StateMachine::new(&[
    (ContractStatus::Draft, ContractStatus::Active),
    (ContractStatus::Active, ContractStatus::Completed),
    (ContractStatus::Active, ContractStatus::Warranty),
    (ContractStatus::Completed, ContractStatus::Closed),
    (ContractStatus::Warranty, ContractStatus::Closed),
]);

#[derive(Debug, Clone)]
pub struct CreateContract {
    /// Required for a standalone contract; ignored when converting, the
    /// quotation's project wins.
    pub project_id: Option<Uuid>,
    pub quotation_id: Option<String>,
    pub title: String,
    /// Required for a standalone contract; a conversion copies the approved
    /// quotation's total.
    pub original_amount: Option<Decimal>,
    pub retention_rate: Decimal,
    pub warranty_months: i32,
    pub notes: Option<String>,
}

/// Partial update; `None` leaves a field untouched. After signing only
/// `notes` and `warranty_months` are accepted.
#[derive(Debug, Clone, Default)]
pub struct ContractPatch {
    pub title: Option<String>,
    pub retention_rate: Option<Decimal>,
    pub warranty_months: Option<i32>,
    pub notes: Option<String>,
}

impl ContractPatch {
    fn touches_locked_fields(&self) -> bool {
        self.title.is_some() || self.retention_rate.is_some()
    }
}

/// Contract lifecycle: create (optionally from a quotation), sign,
/// complete, close. Signing locks the document.
pub struct ContractEngine {
    contracts: Arc<dyn ContractRepository>,
    quotations: Arc<dyn QuotationRepository>,
    sequences: Arc<dyn SequenceAllocator>,
    projects: Arc<dyn ProjectGateway>,
}

impl ContractEngine {
    pub fn new(
        contracts: Arc<dyn ContractRepository>,
        quotations: Arc<dyn QuotationRepository>,
        sequences: Arc<dyn SequenceAllocator>,
        projects: Arc<dyn ProjectGateway>,
    ) -> Self {
        Self {
            contracts,
            quotations,
            sequences,
            projects,
        }
    }

    pub async fn create(&self, input: CreateContract) -> DomainResult<Contract> {
        let (project_id, original_amount) = match &input.quotation_id {
            Some(quotation_id) => {
                let quotation = self
                    .quotations
                    .fetch(quotation_id)
                    .await?
                    .ok_or_else(|| DomainError::NotFound(quotation_id.clone()))?;
                if quotation.status != QuotationStatus::Approved {
                    return Err(DomainError::Validation(format!(
                        "quotation {} must be approved before conversion",
                        quotation.id
                    )));
                }
                if self
                    .contracts
                    .find_by_quotation(quotation_id)
                    .await?
                    .is_some()
                {
                    return Err(DomainError::AlreadyConverted(quotation_id.clone()));
                }
                (quotation.project_id, quotation.total_amount)
            }
            None => {
                let project_id = input.project_id.ok_or_else(|| {
                    DomainError::Validation("a standalone contract needs a project".to_string())
                })?;
                let original_amount = input.original_amount.ok_or_else(|| {
                    DomainError::Validation("a standalone contract needs an amount".to_string())
                })?;
                (project_id, original_amount)
            }
        };

        let id = self
            .sequences
            .next_id(DocumentKind::Contract, PeriodKey::current())
            .await?;
        let mut contract = Contract::new(
            id,
            project_id,
            input.quotation_id,
            input.title,
            original_amount,
            input.retention_rate,
        );
        contract.warranty_months = input.warranty_months;
        contract.notes = input.notes;
        self.contracts.insert(&contract).await?;
        info!(id = %contract.id, amount = %contract.original_amount, "contract created");
        Ok(contract)
    }

    pub async fn get(&self, id: &str) -> DomainResult<Contract> {
        self.contracts
            .fetch(id)
            .await?
            .ok_or_else(|| DomainError::NotFound(id.to_string()))
    }

    pub async fn update(&self, id: &str, patch: ContractPatch) -> DomainResult<Contract> {
        let mut contract = self.get(id).await?;

        if contract.is_locked() && patch.touches_locked_fields() {
            return Err(DomainError::Locked {
                id: contract.id.clone(),
            });
        }

        if let Some(title) = patch.title {
            contract.title = title;
        }
        if let Some(rate) = patch.retention_rate {
            contract.apply_retention_rate(rate);
        }
        if let Some(months) = patch.warranty_months {
            contract.warranty_months = months;
        }
        if let Some(notes) = patch.notes {
            contract.notes = Some(notes);
        }
        contract.updated_at = Utc::now();
        self.contracts.update(&contract).await?;
        Ok(contract)
    }

    /// DRAFT -> ACTIVE. Stamps the sign date, locks the document and
    /// notifies the project module. Notification failure is logged, not
    /// rolled back: the sign has committed and delivery is at-least-once.
    pub async fn sign(
        &self,
        id: &str,
        signed_by: &str,
        sign_date: Option<NaiveDate>,
    ) -> DomainResult<Contract> {
        let mut contract = self.get(id).await?;
        FLOW.ensure(contract.status, ContractStatus::Active)?;
        contract.status = ContractStatus::Active;
        contract.sign_date = Some(sign_date.unwrap_or_else(|| Utc::now().date_naive()));
        contract.lock = Some(Lock::new(signed_by));
        contract.updated_at = Utc::now();
        self.contracts.update(&contract).await?;
        info!(id = %contract.id, "contract signed");

        if let Err(err) = self.projects.mark_in_progress(contract.project_id).await {
            warn!(id = %contract.id, error = %err, "project notification failed");
        }
        Ok(contract)
    }

    /// ACTIVE -> COMPLETED, or -> WARRANTY when a warranty period is
    /// agreed; the warranty end is computed from now.
    pub async fn complete(&self, id: &str) -> DomainResult<Contract> {
        let mut contract = self.get(id).await?;
        let target = if contract.warranty_months > 0 {
            ContractStatus::Warranty
        } else {
            ContractStatus::Completed
        };
        FLOW.ensure(contract.status, target)?;
        if contract.warranty_months > 0 {
            contract.warranty_end =
                Utc::now().checked_add_months(Months::new(contract.warranty_months as u32));
        }
        contract.status = target;
        contract.updated_at = Utc::now();
        self.contracts.update(&contract).await?;
        info!(id = %contract.id, status = contract.status.as_str(), "contract completed");
        Ok(contract)
    }

    /// COMPLETED or WARRANTY -> CLOSED.
    pub async fn close(&self, id: &str) -> DomainResult<Contract> {
        let mut contract = self.get(id).await?;
        FLOW.ensure(contract.status, ContractStatus::Closed)?;
        contract.status = ContractStatus::Closed;
        contract.updated_at = Utc::now();
        self.contracts.update(&contract).await?;
        info!(id = %contract.id, "contract closed");
        Ok(contract)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryContractStore;
    use girder_core::project::MemoryProjectGateway;
    use girder_core::sequence::MemorySequences;
    use girder_quote::memory::MemoryQuotationRepository;
    use girder_quote::models::{ItemInput, Quotation};
    use rust_decimal_macros::dec;

    struct Fixture {
        engine: ContractEngine,
        quotations: Arc<MemoryQuotationRepository>,
        projects: Arc<MemoryProjectGateway>,
    }

    fn fixture() -> Fixture {
        let quotations = Arc::new(MemoryQuotationRepository::new());
        let projects = Arc::new(MemoryProjectGateway::new());
        let engine = ContractEngine::new(
            Arc::new(MemoryContractStore::new()),
            quotations.clone(),
            Arc::new(MemorySequences::new()),
            projects.clone(),
        );
        Fixture {
            engine,
            quotations,
            projects,
        }
    }

    async fn approved_quotation(quotations: &MemoryQuotationRepository) -> Quotation {
        let mut quotation = Quotation::new(
            "QTN-202602-0001".to_string(),
            Uuid::new_v4(),
            "Foundation package".to_string(),
            dec!(5),
            false,
        );
        quotation.replace_items(vec![
            ItemInput {
                name: "Excavation".to_string(),
                quantity: dec!(10),
                unit_price: dec!(1000),
            },
            ItemInput {
                name: "Rebar".to_string(),
                quantity: dec!(5),
                unit_price: dec!(2000),
            },
        ]);
        quotation.status = QuotationStatus::Approved;
        quotation.lock = Some(Lock::new("pm"));
        quotations.insert(&quotation).await.unwrap();
        quotation
    }

    fn standalone_input(project_id: Uuid) -> CreateContract {
        CreateContract {
            project_id: Some(project_id),
            quotation_id: None,
            title: "Main works".to_string(),
            original_amount: Some(dec!(21000)),
            retention_rate: dec!(5),
            warranty_months: 0,
            notes: None,
        }
    }

    #[tokio::test]
    async fn test_create_from_approved_quotation() {
        let f = fixture();
        let quotation = approved_quotation(&f.quotations).await;

        let contract = f
            .engine
            .create(CreateContract {
                project_id: None,
                quotation_id: Some(quotation.id.clone()),
                title: "Main works".to_string(),
                original_amount: None,
                retention_rate: dec!(5),
                warranty_months: 12,
                notes: None,
            })
            .await
            .unwrap();

        assert_eq!(contract.original_amount, dec!(21000.00));
        assert_eq!(contract.current_amount, dec!(21000.00));
        assert_eq!(contract.retention_amount, dec!(1050.00));
        assert_eq!(contract.project_id, quotation.project_id);
        assert_eq!(contract.status, ContractStatus::Draft);

        // A quotation converts at most once.
        let err = f
            .engine
            .create(CreateContract {
                project_id: None,
                quotation_id: Some(quotation.id.clone()),
                title: "Duplicate".to_string(),
                original_amount: None,
                retention_rate: dec!(5),
                warranty_months: 0,
                notes: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::AlreadyConverted(_)));
    }

    #[tokio::test]
    async fn test_create_rejects_unapproved_quotation() {
        let f = fixture();
        let mut quotation = approved_quotation(&f.quotations).await;
        quotation.status = QuotationStatus::Pending;
        quotation.lock = None;
        f.quotations.update(&quotation).await.unwrap();

        let err = f
            .engine
            .create(CreateContract {
                project_id: None,
                quotation_id: Some(quotation.id),
                title: "Too early".to_string(),
                original_amount: None,
                retention_rate: dec!(5),
                warranty_months: 0,
                notes: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[tokio::test]
    async fn test_sign_locks_and_notifies_project() {
        let f = fixture();
        let project_id = Uuid::new_v4();
        let contract = f.engine.create(standalone_input(project_id)).await.unwrap();

        let signed = f.engine.sign(&contract.id, "director", None).await.unwrap();
        assert_eq!(signed.status, ContractStatus::Active);
        assert!(signed.is_locked());
        assert!(signed.sign_date.is_some());
        assert_eq!(f.projects.notified(), vec![project_id]);

        // Title is frozen; notes and warranty months are not.
        let err = f
            .engine
            .update(
                &contract.id,
                ContractPatch {
                    title: Some("Renamed".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Locked { .. }));

        let updated = f
            .engine
            .update(
                &contract.id,
                ContractPatch {
                    notes: Some("site memo".to_string()),
                    warranty_months: Some(24),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.notes.as_deref(), Some("site memo"));
        assert_eq!(updated.warranty_months, 24);
    }

    #[tokio::test]
    async fn test_retention_rate_change_before_lock_recomputes() {
        let f = fixture();
        let contract = f.engine.create(standalone_input(Uuid::new_v4())).await.unwrap();
        let updated = f
            .engine
            .update(
                &contract.id,
                ContractPatch {
                    retention_rate: Some(dec!(10)),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.retention_amount, dec!(2100.00));
    }

    #[tokio::test]
    async fn test_complete_routes_to_warranty_when_agreed() {
        let f = fixture();
        let contract = f.engine.create(standalone_input(Uuid::new_v4())).await.unwrap();
        f.engine.sign(&contract.id, "director", None).await.unwrap();
        f.engine
            .update(
                &contract.id,
                ContractPatch {
                    warranty_months: Some(12),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let completed = f.engine.complete(&contract.id).await.unwrap();
        assert_eq!(completed.status, ContractStatus::Warranty);
        assert!(completed.warranty_end.is_some());

        let closed = f.engine.close(&contract.id).await.unwrap();
        assert_eq!(closed.status, ContractStatus::Closed);
    }

    #[tokio::test]
    async fn test_complete_without_warranty_then_close() {
        let f = fixture();
        let contract = f.engine.create(standalone_input(Uuid::new_v4())).await.unwrap();
        f.engine.sign(&contract.id, "director", None).await.unwrap();

        let completed = f.engine.complete(&contract.id).await.unwrap();
        assert_eq!(completed.status, ContractStatus::Completed);
        assert!(completed.warranty_end.is_none());

        f.engine.close(&contract.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_transitions_require_proper_origin() {
        let f = fixture();
        let contract = f.engine.create(standalone_input(Uuid::new_v4())).await.unwrap();

        // Cannot complete or close a draft.
        assert!(matches!(
            f.engine.complete(&contract.id).await.unwrap_err(),
            DomainError::InvalidTransition { .. }
        ));
        assert!(matches!(
            f.engine.close(&contract.id).await.unwrap_err(),
            DomainError::InvalidTransition { .. }
        ));

        // Cannot sign twice.
        f.engine.sign(&contract.id, "director", None).await.unwrap();
        assert!(matches!(
            f.engine.sign(&contract.id, "director", None).await.unwrap_err(),
            DomainError::InvalidTransition { .. }
        ));
    }
}
