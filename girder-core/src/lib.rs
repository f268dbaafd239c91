pub mod error;
pub mod finance;
pub mod lifecycle;
pub mod project;
pub mod sequence;

pub use error::{DomainError, DomainResult};
pub use lifecycle::{Lock, StateMachine};
pub use sequence::SequenceAllocator;
