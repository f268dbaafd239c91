pub mod analysis;
pub mod changes;
pub mod engine;
pub mod memory;
pub mod models;
pub mod payment;
pub mod repository;

pub use analysis::{DashboardSummary, ProfitAnalysisAggregator, ProjectProfit};
pub use changes::{
    ChangeItemInput, ChangeOrder, ChangeOrderEngine, ChangeOrderItem, ChangeOrderPatch,
    ChangeOrderStatus, CreateChangeOrder,
};
pub use engine::{ContractEngine, ContractPatch, CreateContract};
pub use memory::MemoryContractStore;
pub use models::{Contract, ContractStatus};
pub use payment::{
    ApplicationPatch, CreateApplication, PaymentApplication, PaymentApplicationEngine,
    PaymentReceipt, PaymentStatus,
};
pub use repository::{ChangeOrderRepository, ContractRepository, PaymentApplicationRepository};
