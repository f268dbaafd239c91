use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Highest sequence number an identifier can carry within one period.
pub const MAX_SEQ: u32 = 9999;

/// Document types that receive human-readable sequential identifiers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentKind {
    Quotation,
    Contract,
    ChangeOrder,
    PaymentApplication,
    Receipt,
}

impl DocumentKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            DocumentKind::Quotation => "QTN",
            DocumentKind::Contract => "CTR",
            DocumentKind::ChangeOrder => "CO",
            DocumentKind::PaymentApplication => "PAY",
            DocumentKind::Receipt => "RCP",
        }
    }
}

/// Year-month scope for a sequence, rendered as `YYYYMM`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeriodKey {
    year: i32,
    month: u32,
}

impl PeriodKey {
    pub fn new(year: i32, month: u32) -> Self {
        Self { year, month }
    }

    pub fn from_date(at: DateTime<Utc>) -> Self {
        Self {
            year: at.year(),
            month: at.month(),
        }
    }

    /// Period of the current UTC month.
    pub fn current() -> Self {
        Self::from_date(Utc::now())
    }
}

impl fmt::Display for PeriodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}{:02}", self.year, self.month)
    }
}

/// Render an identifier as `{PREFIX}-{PERIOD}-{SEQ:04}`.
pub fn format_id(kind: DocumentKind, period: PeriodKey, seq: u32) -> String {
    format!("{}-{}-{:04}", kind.prefix(), period, seq)
}

/// Recover the sequence number from an identifier belonging to the given
/// prefix and period. Returns `None` for ids from other scopes.
pub fn parse_seq(id: &str, kind: DocumentKind, period: PeriodKey) -> Option<u32> {
    let head = format!("{}-{}-", kind.prefix(), period);
    id.strip_prefix(&head)?.parse().ok()
}
