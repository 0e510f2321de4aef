//! Price history entries and the statistics derived from them.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use super::Availability;

/// One timestamped price observation. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceHistoryEntry {
    pub id: i64,
    pub product_id: String,
    pub price: Decimal,
    pub currency: String,
    pub recorded_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub availability: Option<Availability>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retailer: Option<String>,
}

/// Summary of a product's price history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PriceStats {
    pub currency: String,
    pub current_price: Decimal,
    pub first_price: Decimal,
    pub lowest_price: Decimal,
    pub highest_price: Decimal,
    /// Mean of all entries; `None` when the sum exceeds `Decimal`'s range.
    pub average_price: Option<Decimal>,
    /// Current minus first recorded price; negative is a drop.
    pub change: Decimal,
    /// `change` relative to the first price, in percent with one decimal.
    /// `None` when the ratio is out of range.
    pub change_percent: Option<Decimal>,
    pub total_entries: usize,
}

impl PriceStats {
    /// Compute stats over entries in recorded order. Returns `None` for an empty history.
    pub fn from_history(history: &[PriceHistoryEntry]) -> Option<Self> {
        let first = history.first()?;
        let last = history.last()?;

        let mut lowest = first.price;
        let mut highest = first.price;
        let mut total = Some(Decimal::ZERO);
        for entry in history {
            lowest = lowest.min(entry.price);
            highest = highest.max(entry.price);
            total = total.and_then(|t| t.checked_add(entry.price));
        }

        let count = history.len();
        let average = total
            .and_then(|t| t.checked_div(Decimal::from(count)))
            .map(|avg| avg.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero));
        // Stored prices are positive, so the difference stays in range.
        let change = last.price - first.price;
        let change_percent = if first.price.is_zero() {
            Some(Decimal::ZERO)
        } else {
            change
                .checked_div(first.price)
                .and_then(|ratio| ratio.checked_mul(Decimal::ONE_HUNDRED))
                .map(|pct| pct.round_dp_with_strategy(1, RoundingStrategy::MidpointAwayFromZero))
        };

        Some(Self {
            currency: last.currency.clone(),
            current_price: last.price,
            first_price: first.price,
            lowest_price: lowest,
            highest_price: highest,
            average_price: average,
            change,
            change_percent,
            total_entries: count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn decimal(value: &str) -> Decimal {
        Decimal::from_str(value)
            .or_else(|_| Decimal::from_scientific(value))
            .unwrap()
    }

    fn entry(id: i64, price: &str) -> PriceHistoryEntry {
        PriceHistoryEntry {
            id,
            product_id: "p".to_string(),
            price: decimal(price),
            currency: "USD".to_string(),
            recorded_at: format!("2025-01-0{}T00:00:00Z", id),
            availability: None,
            retailer: None,
        }
    }

    #[test]
    fn test_stats_for_price_drop() {
        let stats = PriceStats::from_history(&[entry(1, "19.99"), entry(2, "17.50")]).unwrap();

        assert_eq!(stats.current_price, Decimal::from_str("17.50").unwrap());
        assert_eq!(stats.lowest_price, Decimal::from_str("17.50").unwrap());
        assert_eq!(stats.highest_price, Decimal::from_str("19.99").unwrap());
        assert_eq!(stats.average_price, Some(Decimal::from_str("18.75").unwrap()));
        assert_eq!(stats.change, Decimal::from_str("-2.49").unwrap());
        assert_eq!(stats.change_percent, Some(Decimal::from_str("-12.5").unwrap()));
        assert_eq!(stats.total_entries, 2);
    }

    #[test]
    fn test_stats_with_prices_near_decimal_range() {
        let stats = PriceStats::from_history(&[entry(1, "5e28"), entry(2, "6e28")]).unwrap();
        assert_eq!(stats.average_price, None);
        assert_eq!(stats.highest_price, decimal("6e28"));
        assert_eq!(stats.change, decimal("1e28"));
        assert_eq!(stats.change_percent, Some(decimal("20.0")));

        let stats = PriceStats::from_history(&[entry(1, "0.01"), entry(2, "1e27")]).unwrap();
        assert_eq!(stats.change_percent, None);
        assert_eq!(stats.lowest_price, decimal("0.01"));
        assert!(stats.average_price.is_some());
    }

    #[test]
    fn test_stats_empty_history() {
        assert!(PriceStats::from_history(&[]).is_none());
    }
}
