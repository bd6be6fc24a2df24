//! Money helpers.
//!
//! All amounts handled by the engine are [`Decimal`] values in a single
//! implicit currency (SAR).  Derived amounts are rounded to two
//! fraction digits, half away from zero.

use rust_decimal::{Decimal, RoundingStrategy};

/// A monetary amount in the engine's single currency.
pub type Money = Decimal;

/// ISO code of the only currency the engine deals in.
pub const CURRENCY: &str = "SAR";

/// Round an amount to two fraction digits.
pub fn round2(amount: Money) -> Money {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// `part` percent of `amount`, rounded to two fraction digits.
pub fn percent_of(amount: Money, part: Decimal) -> Money {
    round2(amount * part / Decimal::ONE_HUNDRED)
}
