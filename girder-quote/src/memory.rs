use crate::models::Quotation;
use crate::repository::QuotationRepository;
use async_trait::async_trait;
use girder_core::DomainResult;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use uuid::Uuid;

/// HashMap-backed repository for tests and single-process embedding.
#[derive(Default)]
pub struct MemoryQuotationRepository {
    rows: Mutex<HashMap<String, Quotation>>,
}

impl MemoryQuotationRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QuotationRepository for MemoryQuotationRepository {
    async fn insert(&self, quotation: &Quotation) -> DomainResult<()> {
        let mut rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        rows.insert(quotation.id.clone(), quotation.clone());
        Ok(())
    }

    async fn fetch(&self, id: &str) -> DomainResult<Option<Quotation>> {
        let rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(rows.get(id).cloned())
    }

    async fn update(&self, quotation: &Quotation) -> DomainResult<()> {
        let mut rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        rows.insert(quotation.id.clone(), quotation.clone());
        Ok(())
    }

    async fn list_by_project(&self, project_id: Uuid) -> DomainResult<Vec<Quotation>> {
        let rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        let mut quotations: Vec<Quotation> = rows
            .values()
            .filter(|q| q.project_id == project_id)
            .cloned()
            .collect();
        quotations.sort_by(|a, b| a.version_no.cmp(&b.version_no).then(a.id.cmp(&b.id)));
        Ok(quotations)
    }

    async fn insert_version(&self, next: &Quotation, superseded: &Quotation) -> DomainResult<()> {
        let mut rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        rows.insert(superseded.id.clone(), superseded.clone());
        rows.insert(next.id.clone(), next.clone());
        Ok(())
    }
}
