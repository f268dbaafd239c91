use chrono::{DateTime, Utc};
use girder_core::lifecycle::Lock;
use girder_shared::money;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Quotation status. Rejection routes back to DRAFT with the reason kept in
/// the notes; `Rejected` is retained so upstream data still deserializes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuotationStatus {
    Draft,
    Pending,
    Approved,
    Rejected,
}

impl QuotationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuotationStatus::Draft => "DRAFT",
            QuotationStatus::Pending => "PENDING",
            QuotationStatus::Approved => "APPROVED",
            QuotationStatus::Rejected => "REJECTED",
        }
    }
}

impl FromStr for QuotationStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "DRAFT" => Ok(QuotationStatus::Draft),
            "PENDING" => Ok(QuotationStatus::Pending),
            "APPROVED" => Ok(QuotationStatus::Approved),
            "REJECTED" => Ok(QuotationStatus::Rejected),
            other => Err(format!("unknown quotation status: {}", other)),
        }
    }
}

/// A versioned priced proposal. Prior versions are frozen, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quotation {
    pub id: String,
    pub project_id: Uuid,
    pub version_no: i32,
    /// Id of the version this one superseded.
    pub parent_id: Option<String>,
    pub is_current: bool,
    pub title: String,
    pub tax_rate: Decimal,
    pub is_tax_included: bool,
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub total_amount: Decimal,
    pub status: QuotationStatus,
    pub notes: Option<String>,
    pub lock: Option<Lock>,
    pub items: Vec<QuotationItem>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A priced line within a quotation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotationItem {
    pub id: Uuid,
    pub name: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub amount: Decimal,
    pub sort_order: i32,
}

/// Line input accepted by create/update calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemInput {
    pub name: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
}

impl QuotationItem {
    pub fn from_input(input: ItemInput, sort_order: i32) -> Self {
        let amount = money::line_amount(input.quantity, input.unit_price);
        Self {
            id: Uuid::new_v4(),
            name: input.name,
            quantity: input.quantity,
            unit_price: input.unit_price,
            amount,
            sort_order,
        }
    }
}

impl Quotation {
    pub fn new(
        id: String,
        project_id: Uuid,
        title: String,
        tax_rate: Decimal,
        is_tax_included: bool,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            project_id,
            version_no: 1,
            parent_id: None,
            is_current: true,
            title,
            tax_rate: money::round_rate(tax_rate),
            is_tax_included,
            subtotal: Decimal::ZERO,
            tax_amount: Decimal::ZERO,
            total_amount: Decimal::ZERO,
            status: QuotationStatus::Draft,
            notes: None,
            lock: None,
            items: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_locked(&self) -> bool {
        self.lock.is_some()
    }

    /// Swap in a new ordered item list and re-derive the money fields.
    pub fn replace_items(&mut self, inputs: Vec<ItemInput>) {
        self.items = inputs
            .into_iter()
            .enumerate()
            .map(|(position, input)| QuotationItem::from_input(input, position as i32))
            .collect();
        self.recalculate();
    }

    /// Re-derive subtotal, tax and total from the item list.
    pub fn recalculate(&mut self) {
        self.subtotal = money::items_subtotal(self.items.iter().map(|i| (i.quantity, i.unit_price)));
        self.tax_amount = money::tax_amount(self.subtotal, self.tax_rate, self.is_tax_included);
        self.total_amount = self.subtotal + self.tax_amount;
        self.updated_at = Utc::now();
    }

    /// Clone into the superseding version: fresh DRAFT, same content, new id.
    /// The caller flips this row's `is_current` and persists both.
    pub fn next_version(&self, new_id: String) -> Self {
        let now = Utc::now();
        Self {
            id: new_id,
            parent_id: Some(self.id.clone()),
            version_no: self.version_no + 1,
            is_current: true,
            status: QuotationStatus::Draft,
            lock: None,
            items: self
                .items
                .iter()
                .map(|item| QuotationItem {
                    id: Uuid::new_v4(),
                    ..item.clone()
                })
                .collect(),
            created_at: now,
            updated_at: now,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn quotation_with_items() -> Quotation {
        let mut quotation = Quotation::new(
            "QTN-202602-0001".to_string(),
            Uuid::new_v4(),
            "Site works".to_string(),
            dec!(5),
            false,
        );
        quotation.replace_items(vec![
            ItemInput {
                name: "Excavation".to_string(),
                quantity: dec!(10),
                unit_price: dec!(1000),
            },
            ItemInput {
                name: "Backfill".to_string(),
                quantity: dec!(5),
                unit_price: dec!(2000),
            },
        ]);
        quotation
    }

    #[test]
    fn test_recalculate_totals() {
        let quotation = quotation_with_items();
        assert_eq!(quotation.subtotal, dec!(20000.00));
        assert_eq!(quotation.tax_amount, dec!(1000.00));
        assert_eq!(quotation.total_amount, dec!(21000.00));
    }

    #[test]
    fn test_tax_included_quotation_has_zero_tax() {
        let mut quotation = quotation_with_items();
        quotation.is_tax_included = true;
        quotation.recalculate();
        assert_eq!(quotation.tax_amount, Decimal::ZERO);
        assert_eq!(quotation.total_amount, dec!(20000.00));
    }

    #[test]
    fn test_next_version_carries_items_and_resets_state() {
        let mut prior = quotation_with_items();
        prior.status = QuotationStatus::Approved;
        prior.lock = Some(girder_core::lifecycle::Lock::new("pm"));

        let next = prior.next_version("QTN-202602-0002".to_string());

        assert_eq!(next.version_no, 2);
        assert_eq!(next.parent_id.as_deref(), Some("QTN-202602-0001"));
        assert_eq!(next.status, QuotationStatus::Draft);
        assert!(next.lock.is_none());
        assert!(next.is_current);
        assert_eq!(next.items.len(), prior.items.len());
        assert_eq!(next.total_amount, prior.total_amount);
        // Fresh item rows, same content.
        assert_ne!(next.items[0].id, prior.items[0].id);
        assert_eq!(next.items[0].amount, prior.items[0].amount);
    }
}
