use rust_decimal::Decimal;

/// Business-rule violations surfaced verbatim to the caller. None of these
/// warrant a retry; transient storage failures arrive as `Storage`.
#[derive(Debug, thiserror::Error)]
pub enum DomainError {
    #[error("document not found: {0}")]
    NotFound(String),

    #[error("invalid status transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("document {id} is locked")]
    Locked { id: String },

    #[error("contract {id} does not accept this operation in status {status}")]
    InvalidContractState { id: String, status: String },

    #[error("payment application {id} does not accept receipts in status {status}")]
    InvalidApplicationState { id: String, status: String },

    #[error("cumulative progress on contract {contract_id} would reach {attempted}%, above 100%")]
    CumulativeExceeded {
        contract_id: String,
        attempted: Decimal,
    },

    #[error("quotation {0} already has a contract")]
    AlreadyConverted(String),

    #[error("sequence space exhausted for {prefix}-{period}")]
    SequenceExhausted { prefix: String, period: String },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("storage error: {0}")]
    Storage(String),
}

pub type DomainResult<T> = Result<T, DomainError>;
