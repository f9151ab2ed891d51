//! Pricing and date rules for a reservation range.
//!
//! A range is inclusive on both ends. The price is linear in the number of days,
//! `3.625 * days + 1.375` rounded half away from zero to cents, except that a five day range
//! is a flat 20.00.
use chrono::NaiveDate;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::{Result, SwapError};

/// the flat rate charged for exactly [`ANCHOR_DAYS`] days, in cents
const ANCHOR_PRICE_CENTS: i64 = 2000;
/// the range length that gets the flat rate
const ANCHOR_DAYS: i64 = 5;
/// 3.625 per day
const DAILY_RATE_THOUSANDTHS: i64 = 3625;
/// 1.375 fixed fee
const BASE_FEE_THOUSANDTHS: i64 = 1375;

/// Number of calendar days covered by `from..=to`. Zero or negative for a reversed range.
pub fn inclusive_days(from: NaiveDate, to: NaiveDate) -> i64 {
    (to - from).num_days() + 1
}

/// Price of the reservation `from..=to`, or zero for a degenerate range.
pub fn price_for(from: NaiveDate, to: NaiveDate) -> Decimal {
    price_for_days(inclusive_days(from, to))
}

/// Price of a reservation lasting `days` days, or zero when `days <= 0`.
pub fn price_for_days(days: i64) -> Decimal {
    if days <= 0 {
        return Decimal::ZERO;
    }
    if days == ANCHOR_DAYS {
        return Decimal::new(ANCHOR_PRICE_CENTS, 2);
    }
    let raw = Decimal::new(DAILY_RATE_THOUSANDTHS, 3) * Decimal::from(days)
        + Decimal::new(BASE_FEE_THOUSANDTHS, 3);
    round_cents(raw)
}

/// Rounds a monetary amount to two decimals, half away from zero.
pub fn round_cents(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// The derived fields of a valid reservation range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    /// inclusive day count
    pub days: i64,
    /// price for the whole range
    pub price: Decimal,
}

/// Validates `from..=to` and computes its day count and price.
///
/// # Errors
/// `SwapError::InvalidRange` when `to` is before `from`.
pub fn quote(from: NaiveDate, to: NaiveDate) -> Result<Quote> {
    let days = inclusive_days(from, to);
    if days <= 0 {
        return Err(SwapError::InvalidRange { from, to });
    }
    Ok(Quote {
        days,
        price: price_for_days(days),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::from_str(s).unwrap()
    }

    fn money(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn five_days_is_the_flat_rate() {
        let q = quote(date("2024-11-04"), date("2024-11-08")).unwrap();
        assert_eq!(q.days, 5);
        assert_eq!(q.price, money("20.00"));
    }

    #[test]
    fn three_days_follows_the_linear_rate() {
        let q = quote(date("2024-11-10"), date("2024-11-12")).unwrap();
        assert_eq!(q.days, 3);
        assert_eq!(q.price, money("12.25"));
    }

    #[test]
    fn linear_rate_rounds_half_away_from_zero() {
        assert_eq!(price_for_days(1), money("5.00"));
        assert_eq!(price_for_days(2), money("8.63"));
        assert_eq!(price_for_days(4), money("15.88"));
        assert_eq!(price_for_days(6), money("23.13"));
        assert_eq!(price_for_days(8), money("30.38"));
    }

    #[test]
    fn single_day_range_counts_as_one_day() {
        assert_eq!(inclusive_days(date("2024-02-29"), date("2024-02-29")), 1);
        assert_eq!(inclusive_days(date("2024-12-31"), date("2025-01-01")), 2);
    }

    #[test]
    fn reversed_range_is_rejected_and_priced_at_zero() {
        let (from, to) = (date("2024-11-08"), date("2024-11-04"));
        assert_eq!(price_for(from, to), Decimal::ZERO);
        assert!(matches!(quote(from, to), Err(SwapError::InvalidRange { .. })));
    }
}
