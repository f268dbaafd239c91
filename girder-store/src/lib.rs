pub mod app_config;
pub mod contract_repo;
pub mod database;
pub mod finance_repo;
pub mod quote_repo;
pub mod sequence_repo;

pub use contract_repo::PgContractStore;
pub use database::DbClient;
pub use finance_repo::PgFinanceHub;
pub use quote_repo::PgQuotationRepository;
pub use sequence_repo::PgSequences;

use girder_core::DomainError;

/// Transient storage failures surface as `DomainError::Storage`; retries
/// belong to the persistence layer, not the domain.
pub(crate) fn storage(err: sqlx::Error) -> DomainError {
    DomainError::Storage(err.to_string())
}

pub(crate) fn corrupt(detail: String) -> DomainError {
    DomainError::Storage(format!("corrupt row: {}", detail))
}
