//! Money arithmetic shared by every financial document type.
//!
//! Currency amounts round half-up to 2 decimal places; rates carry 4 so
//! percent-of-percent computations don't drift. Negative quantities and
//! prices are allowed: deduction items on change orders rely on them.

use rust_decimal::{Decimal, RoundingStrategy};

/// Half-up rounding to 2 decimal places (currency amounts).
pub fn round2(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Half-up rounding to 4 decimal places (rates).
pub fn round_rate(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(4, RoundingStrategy::MidpointAwayFromZero)
}

/// Line extension: `quantity x unit_price`, rounded per line.
pub fn line_amount(quantity: Decimal, unit_price: Decimal) -> Decimal {
    round2(quantity * unit_price)
}

/// Sum of line extensions over `(quantity, unit_price)` pairs.
pub fn items_subtotal<I>(items: I) -> Decimal
where
    I: IntoIterator<Item = (Decimal, Decimal)>,
{
    items
        .into_iter()
        .map(|(quantity, unit_price)| line_amount(quantity, unit_price))
        .sum()
}

/// Tax on a subtotal. Zero when the amounts already include tax.
pub fn tax_amount(subtotal: Decimal, rate: Decimal, tax_included: bool) -> Decimal {
    if tax_included {
        Decimal::ZERO
    } else {
        round2(subtotal * rate / Decimal::ONE_HUNDRED)
    }
}

/// Retention withheld from an amount at a percentage rate.
pub fn retention(amount: Decimal, rate: Decimal) -> Decimal {
    round2(amount * rate / Decimal::ONE_HUNDRED)
}
