use crate::models::Quotation;
use async_trait::async_trait;
use girder_core::DomainResult;
use uuid::Uuid;

/// Persistence port for quotations and their items.
#[async_trait]
pub trait QuotationRepository: Send + Sync {
    async fn insert(&self, quotation: &Quotation) -> DomainResult<()>;

    async fn fetch(&self, id: &str) -> DomainResult<Option<Quotation>>;

    async fn update(&self, quotation: &Quotation) -> DomainResult<()>;

    /// All versions for a project, oldest first.
    async fn list_by_project(&self, project_id: Uuid) -> DomainResult<Vec<Quotation>>;

    /// Persist a superseding version and the superseded row as one unit.
    async fn insert_version(&self, next: &Quotation, superseded: &Quotation) -> DomainResult<()>;
}
