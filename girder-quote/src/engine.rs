use crate::models::{ItemInput, Quotation, QuotationStatus};
use crate::repository::QuotationRepository;
use chrono::Utc;
use girder_core::lifecycle::{prepend_note, Lock, StateMachine};
use girder_core::sequence::SequenceAllocator;
use girder_core::{DomainError, DomainResult};
use girder_shared::ids::{DocumentKind, PeriodKey};
use girder_shared::money;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

static FLOW: StateMachine<QuotationStatus> = StateMachine::new(&[
    (QuotationStatus::Draft, QuotationStatus::Pending),
    (QuotationStatus::Pending, QuotationStatus::Approved),
    // Rejection routes back to DRAFT, reason prepended to notes.
    (QuotationStatus::Pending, QuotationStatus::Draft),
]);

#[derive(Debug, Clone)]
pub struct CreateQuotation {
    pub project_id: Uuid,
    pub title: String,
    pub tax_rate: Decimal,
    pub is_tax_included: bool,
    pub items: Vec<ItemInput>,
    pub notes: Option<String>,
}

/// Partial update; `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct QuotationPatch {
    pub title: Option<String>,
    pub tax_rate: Option<Decimal>,
    pub is_tax_included: Option<bool>,
    pub items: Option<Vec<ItemInput>>,
    pub notes: Option<String>,
}

impl QuotationPatch {
    fn touches_locked_fields(&self) -> bool {
        self.title.is_some()
            || self.tax_rate.is_some()
            || self.is_tax_included.is_some()
            || self.items.is_some()
    }
}

/// Versioned quotation lifecycle: draft, submit, approve/reject, supersede.
pub struct QuotationEngine {
    quotations: Arc<dyn QuotationRepository>,
    sequences: Arc<dyn SequenceAllocator>,
}

impl QuotationEngine {
    pub fn new(
        quotations: Arc<dyn QuotationRepository>,
        sequences: Arc<dyn SequenceAllocator>,
    ) -> Self {
        Self {
            quotations,
            sequences,
        }
    }

    pub async fn create(&self, input: CreateQuotation) -> DomainResult<Quotation> {
        let id = self
            .sequences
            .next_id(DocumentKind::Quotation, PeriodKey::current())
            .await?;
        let mut quotation = Quotation::new(
            id,
            input.project_id,
            input.title,
            input.tax_rate,
            input.is_tax_included,
        );
        quotation.notes = input.notes;
        quotation.replace_items(input.items);
        self.quotations.insert(&quotation).await?;
        info!(id = %quotation.id, total = %quotation.total_amount, "quotation created");
        Ok(quotation)
    }

    pub async fn get(&self, id: &str) -> DomainResult<Quotation> {
        self.quotations
            .fetch(id)
            .await?
            .ok_or_else(|| DomainError::NotFound(id.to_string()))
    }

    pub async fn list_by_project(&self, project_id: Uuid) -> DomainResult<Vec<Quotation>> {
        self.quotations.list_by_project(project_id).await
    }

    /// Content is mutable while DRAFT. On a locked document only `notes`
    /// survives; anything else fails with `Locked`.
    pub async fn update(&self, id: &str, patch: QuotationPatch) -> DomainResult<Quotation> {
        let mut quotation = self.get(id).await?;

        if quotation.is_locked() {
            if patch.touches_locked_fields() {
                return Err(DomainError::Locked {
                    id: quotation.id.clone(),
                });
            }
            if let Some(notes) = patch.notes {
                quotation.notes = Some(notes);
                quotation.updated_at = Utc::now();
                self.quotations.update(&quotation).await?;
            }
            return Ok(quotation);
        }

        if quotation.status != QuotationStatus::Draft && patch.touches_locked_fields() {
            return Err(DomainError::Validation(format!(
                "quotation {} is awaiting approval and cannot be edited",
                quotation.id
            )));
        }

        if let Some(title) = patch.title {
            quotation.title = title;
        }
        if let Some(rate) = patch.tax_rate {
            quotation.tax_rate = money::round_rate(rate);
        }
        if let Some(included) = patch.is_tax_included {
            quotation.is_tax_included = included;
        }
        if let Some(notes) = patch.notes {
            quotation.notes = Some(notes);
        }
        match patch.items {
            Some(items) => quotation.replace_items(items),
            None => quotation.recalculate(),
        }
        self.quotations.update(&quotation).await?;
        Ok(quotation)
    }

    /// DRAFT -> PENDING. Requires at least one item and a positive total.
    pub async fn submit(&self, id: &str) -> DomainResult<Quotation> {
        let mut quotation = self.get(id).await?;
        FLOW.ensure(quotation.status, QuotationStatus::Pending)?;
        if quotation.items.is_empty() || quotation.total_amount <= Decimal::ZERO {
            return Err(DomainError::Validation(format!(
                "quotation {} needs at least one item and a positive total to submit",
                quotation.id
            )));
        }
        quotation.status = QuotationStatus::Pending;
        quotation.updated_at = Utc::now();
        self.quotations.update(&quotation).await?;
        info!(id = %quotation.id, "quotation submitted");
        Ok(quotation)
    }

    /// PENDING -> APPROVED. Sets the lock; content is frozen from here on.
    pub async fn approve(&self, id: &str, approved_by: &str) -> DomainResult<Quotation> {
        let mut quotation = self.get(id).await?;
        FLOW.ensure(quotation.status, QuotationStatus::Approved)?;
        quotation.status = QuotationStatus::Approved;
        quotation.lock = Some(Lock::new(approved_by));
        quotation.updated_at = Utc::now();
        self.quotations.update(&quotation).await?;
        info!(id = %quotation.id, approved_by, "quotation approved");
        Ok(quotation)
    }

    /// PENDING -> DRAFT with the reason prepended to the notes.
    pub async fn reject(&self, id: &str, reason: &str) -> DomainResult<Quotation> {
        let mut quotation = self.get(id).await?;
        FLOW.ensure(quotation.status, QuotationStatus::Draft)?;
        quotation.status = QuotationStatus::Draft;
        prepend_note(&mut quotation.notes, &format!("[{}]", reason));
        quotation.updated_at = Utc::now();
        self.quotations.update(&quotation).await?;
        Ok(quotation)
    }

    /// Clone the current version into a fresh DRAFT (version_no + 1) and
    /// mark this one superseded. The prior row's content stays frozen.
    pub async fn create_new_version(&self, id: &str) -> DomainResult<Quotation> {
        let mut prior = self.get(id).await?;
        if !prior.is_current {
            return Err(DomainError::Validation(format!(
                "quotation {} is not the current version",
                prior.id
            )));
        }
        let new_id = self
            .sequences
            .next_id(DocumentKind::Quotation, PeriodKey::current())
            .await?;
        let next = prior.next_version(new_id);
        prior.is_current = false;
        prior.updated_at = Utc::now();
        self.quotations.insert_version(&next, &prior).await?;
        info!(id = %next.id, supersedes = %prior.id, version = next.version_no, "quotation version created");
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryQuotationRepository;
    use girder_core::sequence::MemorySequences;
    use rust_decimal_macros::dec;

    fn engine() -> QuotationEngine {
        QuotationEngine::new(
            Arc::new(MemoryQuotationRepository::new()),
            Arc::new(MemorySequences::new()),
        )
    }

    fn standard_input(project_id: Uuid) -> CreateQuotation {
        CreateQuotation {
            project_id,
            title: "Foundation package".to_string(),
            tax_rate: dec!(5),
            is_tax_included: false,
            items: vec![
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
            ],
            notes: None,
        }
    }

    #[tokio::test]
    async fn test_create_computes_totals() {
        let engine = engine();
        let quotation = engine.create(standard_input(Uuid::new_v4())).await.unwrap();

        assert_eq!(quotation.subtotal, dec!(20000.00));
        assert_eq!(quotation.tax_amount, dec!(1000.00));
        assert_eq!(quotation.total_amount, dec!(21000.00));
        assert_eq!(quotation.status, QuotationStatus::Draft);
        assert!(quotation.id.starts_with("QTN-"));
    }

    #[tokio::test]
    async fn test_submit_requires_items_and_positive_total() {
        let engine = engine();
        let mut input = standard_input(Uuid::new_v4());
        input.items.clear();
        let empty = engine.create(input).await.unwrap();

        let err = engine.submit(&empty.id).await.unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[tokio::test]
    async fn test_approve_locks_the_document() {
        let engine = engine();
        let quotation = engine.create(standard_input(Uuid::new_v4())).await.unwrap();
        engine.submit(&quotation.id).await.unwrap();
        let approved = engine.approve(&quotation.id, "pm").await.unwrap();

        assert_eq!(approved.status, QuotationStatus::Approved);
        assert!(approved.is_locked());

        // Content mutation fails; notes stay editable.
        let err = engine
            .update(
                &quotation.id,
                QuotationPatch {
                    title: Some("New title".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Locked { .. }));

        let updated = engine
            .update(
                &quotation.id,
                QuotationPatch {
                    notes: Some("handover note".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.notes.as_deref(), Some("handover note"));
    }

    #[tokio::test]
    async fn test_approve_requires_pending() {
        let engine = engine();
        let quotation = engine.create(standard_input(Uuid::new_v4())).await.unwrap();
        let err = engine.approve(&quotation.id, "pm").await.unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_reject_returns_to_draft_with_note() {
        let engine = engine();
        let quotation = engine.create(standard_input(Uuid::new_v4())).await.unwrap();
        engine.submit(&quotation.id).await.unwrap();
        let rejected = engine.reject(&quotation.id, "unit prices outdated").await.unwrap();

        assert_eq!(rejected.status, QuotationStatus::Draft);
        assert!(rejected
            .notes
            .as_deref()
            .unwrap()
            .starts_with("[unit prices outdated]"));
        // Editable again after rejection.
        assert!(engine
            .update(
                &quotation.id,
                QuotationPatch {
                    title: Some("Revised".to_string()),
                    ..Default::default()
                },
            )
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_new_version_round_trip() {
        let engine = engine();
        let project_id = Uuid::new_v4();
        let quotation = engine.create(standard_input(project_id)).await.unwrap();
        engine.submit(&quotation.id).await.unwrap();
        engine.approve(&quotation.id, "pm").await.unwrap();

        let next = engine.create_new_version(&quotation.id).await.unwrap();

        assert_eq!(next.version_no, 2);
        assert_eq!(next.status, QuotationStatus::Draft);
        assert!(!next.is_locked());
        assert_eq!(next.items.len(), 2);
        assert_eq!(next.parent_id.as_deref(), Some(quotation.id.as_str()));

        // The prior version is superseded but its content is unchanged.
        let prior = engine.get(&quotation.id).await.unwrap();
        assert!(!prior.is_current);
        assert_eq!(prior.status, QuotationStatus::Approved);
        assert!(prior.is_locked());
        assert_eq!(prior.total_amount, dec!(21000.00));

        // Only the new version can be superseded further.
        let err = engine.create_new_version(&quotation.id).await.unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));

        let versions = engine.list_by_project(project_id).await.unwrap();
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0].version_no, 1);
        assert_eq!(versions[1].version_no, 2);
    }
}
