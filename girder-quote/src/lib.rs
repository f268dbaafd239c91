pub mod engine;
pub mod memory;
pub mod models;
pub mod repository;

pub use engine::{CreateQuotation, QuotationEngine, QuotationPatch};
pub use memory::MemoryQuotationRepository;
pub use models::{ItemInput, Quotation, QuotationItem, QuotationStatus};
pub use repository::QuotationRepository;
