//! Sequence allocation for human-readable document identifiers.

use crate::error::DomainError;
use async_trait::async_trait;
use girder_shared::ids::{format_id, DocumentKind, PeriodKey, MAX_SEQ};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

/// Allocates the next identifier for a document type within a period.
///
/// Implementations must be atomic per `(prefix, period)`: two concurrent
/// callers never receive the same identifier. Sequence numbers stop at
/// [`MAX_SEQ`] with `SequenceExhausted`, never wrap.
#[async_trait]
pub trait SequenceAllocator: Send + Sync {
    async fn next_id(&self, kind: DocumentKind, period: PeriodKey) -> Result<String, DomainError>;
}

/// Mutex-guarded counters for tests and single-process embedding.
#[derive(Default)]
pub struct MemorySequences {
    counters: Mutex<HashMap<(DocumentKind, PeriodKey), u32>>,
}

impl MemorySequences {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SequenceAllocator for MemorySequences {
    async fn next_id(&self, kind: DocumentKind, period: PeriodKey) -> Result<String, DomainError> {
        let mut counters = self
            .counters
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let seq = counters.entry((kind, period)).or_insert(0);
        if *seq >= MAX_SEQ {
            return Err(DomainError::SequenceExhausted {
                prefix: kind.prefix().to_string(),
                period: period.to_string(),
            });
        }
        *seq += 1;
        Ok(format_id(kind, period, *seq))
    }
}
