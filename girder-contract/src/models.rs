use chrono::{DateTime, NaiveDate, Utc};
use girder_core::lifecycle::Lock;
use girder_shared::money;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContractStatus {
    Draft,
    Active,
    Completed,
    Warranty,
    Closed,
}

impl ContractStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContractStatus::Draft => "DRAFT",
            ContractStatus::Active => "ACTIVE",
            ContractStatus::Completed => "COMPLETED",
            ContractStatus::Warranty => "WARRANTY",
            ContractStatus::Closed => "CLOSED",
        }
    }
}

impl FromStr for ContractStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "DRAFT" => Ok(ContractStatus::Draft),
            "ACTIVE" => Ok(ContractStatus::Active),
            "COMPLETED" => Ok(ContractStatus::Completed),
            "WARRANTY" => Ok(ContractStatus::Warranty),
            "CLOSED" => Ok(ContractStatus::Closed),
            other => Err(format!("unknown contract status: {}", other)),
        }
    }
}

/// The binding agreement. `current_amount` is authoritative: it always
/// equals `original_amount + change_amount` and moves only through
/// change-order approval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contract {
    pub id: String,
    pub project_id: Uuid,
    /// Set when the contract was converted from an approved quotation.
    pub quotation_id: Option<String>,
    pub title: String,
    pub original_amount: Decimal,
    pub change_amount: Decimal,
    pub current_amount: Decimal,
    pub retention_rate: Decimal,
    pub retention_amount: Decimal,
    pub warranty_months: i32,
    pub warranty_end: Option<DateTime<Utc>>,
    pub sign_date: Option<NaiveDate>,
    pub status: ContractStatus,
    pub notes: Option<String>,
    pub lock: Option<Lock>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Contract {
    pub fn new(
        id: String,
        project_id: Uuid,
        quotation_id: Option<String>,
        title: String,
        original_amount: Decimal,
        retention_rate: Decimal,
    ) -> Self {
        let now = Utc::now();
        let original_amount = money::round2(original_amount);
        let retention_rate = money::round_rate(retention_rate);
        Self {
            id,
            project_id,
            quotation_id,
            title,
            original_amount,
            change_amount: Decimal::ZERO,
            current_amount: original_amount,
            retention_rate,
            retention_amount: money::retention(original_amount, retention_rate),
            warranty_months: 0,
            warranty_end: None,
            sign_date: None,
            status: ContractStatus::Draft,
            notes: None,
            lock: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_locked(&self) -> bool {
        self.lock.is_some()
    }

    /// Change orders apply only to contracts in execution or warranty.
    pub fn accepts_change_orders(&self) -> bool {
        matches!(self.status, ContractStatus::Active | ContractStatus::Warranty)
    }

    /// Re-derive current and retention amounts after the approved change
    /// total moved.
    pub fn apply_change_total(&mut self, change_amount: Decimal) {
        self.change_amount = change_amount;
        self.current_amount = self.original_amount + change_amount;
        self.retention_amount = money::retention(self.current_amount, self.retention_rate);
        self.updated_at = Utc::now();
    }

    /// Re-derive the retention amount after the rate changed (pre-lock only).
    pub fn apply_retention_rate(&mut self, rate: Decimal) {
        self.retention_rate = money::round_rate(rate);
        self.retention_amount = money::retention(self.current_amount, self.retention_rate);
        self.updated_at = Utc::now();
    }
}
