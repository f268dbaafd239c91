use crate::storage;
use async_trait::async_trait;
use girder_core::sequence::SequenceAllocator;
use girder_core::DomainError;
use girder_shared::ids::{format_id, DocumentKind, PeriodKey, MAX_SEQ};
use sqlx::PgPool;

/// Row-locked counter table: one row per (prefix, period), bumped in a
/// single upsert so concurrent allocators can never share a number.
pub struct PgSequences {
    pool: PgPool,
}

impl PgSequences {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SequenceAllocator for PgSequences {
    async fn next_id(&self, kind: DocumentKind, period: PeriodKey) -> Result<String, DomainError> {
        let seq: i32 = sqlx::query_scalar(
            r#"
            INSERT INTO document_sequences (prefix, period, seq)
            VALUES ($1, $2, 1)
            ON CONFLICT (prefix, period)
            DO UPDATE SET seq = document_sequences.seq + 1
            RETURNING seq
            "#,
        )
        .bind(kind.prefix())
        .bind(period.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(storage)?;

        if seq < 1 || seq as u32 > MAX_SEQ {
            return Err(DomainError::SequenceExhausted {
                prefix: kind.prefix().to_string(),
                period: period.to_string(),
            });
        }
        Ok(format_id(kind, period, seq as u32))
    }
}
