//! Price string parsing.
//!
//! Handles currency symbols and codes, thousands separators and the
//! comma-vs-dot decimal ambiguity. Resolution of formats such as `1.234,56`
//! is heuristic and best-effort.

use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::{Decimal, RoundingStrategy};

/// A parsed amount and the currency detected alongside it, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPrice {
    pub amount: Decimal,
    pub currency: Option<String>,
}

/// Currencies without minor units.
const ZERO_DECIMAL: &[&str] = &["JPY", "KRW", "VND", "CLP", "ISK"];

/// Multi-character symbols, checked before single characters so `R$` is not read as `$`.
const PREFIX_SYMBOLS: &[(&str, &str)] = &[
    ("US$", "USD"),
    ("CA$", "CAD"),
    ("C$", "CAD"),
    ("A$", "AUD"),
    ("AU$", "AUD"),
    ("NZ$", "NZD"),
    ("HK$", "HKD"),
    ("S$", "SGD"),
    ("R$", "BRL"),
    ("Rs.", "INR"),
    ("Rs", "INR"),
    ("zł", "PLN"),
];

const SYMBOLS: &[(char, &str)] = &[
    ('€', "EUR"),
    ('£', "GBP"),
    ('₹', "INR"),
    ('¥', "JPY"),
    ('￥', "JPY"),
    ('₩', "KRW"),
    ('₽', "RUB"),
    ('₺', "TRY"),
    ('₫', "VND"),
    ('₱', "PHP"),
    ('₪', "ILS"),
    ('$', "USD"),
];

static CODE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b(USD|EUR|GBP|INR|JPY|KRW|CNY|RUB|BRL|CAD|AUD|NZD|HKD|SGD|CHF|SEK|NOK|DKK|PLN|CZK|HUF|TRY|MXN|ZAR|AED|SAR|VND|PHP|ILS|CLP|ISK)\b",
    )
    .expect("valid currency code pattern")
});

// Digits with `.`/`,`/`'` separators, or space-like separators followed by a group of three.
static AMOUNT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\d+(?:[.,']\d+|[ \u{00A0}\u{202F}]\d{3})*").expect("valid amount pattern")
});

// An amount with a currency marker on either side, for scanning free page text.
static MARKED_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?:(?:US\$|R\$|[$€£₹¥₩₽])\s?\d+(?:[.,']\d+)*)|(?:\d+(?:[.,']\d+)*\s?(?:USD|EUR|GBP|INR|€|zł))",
    )
    .expect("valid marked price pattern")
});

/// Parse the first amount in `text`, detecting its currency.
///
/// Returns `None` when no digits are present or the amount does not parse.
pub fn parse_price(text: &str) -> Option<ParsedPrice> {
    let currency = detect_currency(text);
    let numeric = AMOUNT_RE.find(text)?.as_str();
    let amount = normalize_amount(numeric, currency)?;
    Some(ParsedPrice {
        amount,
        currency: currency.map(str::to_string),
    })
}

/// Find the first currency-marked amount in free text such as a page body.
pub fn find_marked_price(text: &str) -> Option<ParsedPrice> {
    MARKED_RE
        .find_iter(text)
        .filter_map(|m| parse_price(m.as_str()))
        .find(|p| p.amount > Decimal::ZERO)
}

/// Detect a currency from an ISO code or symbol in `text`.
pub fn detect_currency(text: &str) -> Option<&'static str> {
    if let Some(code) = CODE_RE.find(text).and_then(|m| known_code(m.as_str())) {
        return Some(code);
    }
    for (symbol, code) in PREFIX_SYMBOLS {
        if text.contains(symbol) {
            return Some(*code);
        }
    }
    SYMBOLS
        .iter()
        .find(|(symbol, _)| text.contains(*symbol))
        .map(|(_, code)| *code)
}

/// Normalize a currency string from markup (`usd`, ` EUR `, `€`) to an ISO code.
pub fn normalize_currency(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.len() == 3 && trimmed.chars().all(|c| c.is_ascii_alphabetic()) {
        return Some(trimmed.to_ascii_uppercase());
    }
    detect_currency(trimmed).map(str::to_string)
}

fn known_code(code: &str) -> Option<&'static str> {
    const CODES: &[&str] = &[
        "USD", "EUR", "GBP", "INR", "JPY", "KRW", "CNY", "RUB", "BRL", "CAD", "AUD", "NZD", "HKD",
        "SGD", "CHF", "SEK", "NOK", "DKK", "PLN", "CZK", "HUF", "TRY", "MXN", "ZAR", "AED", "SAR",
        "VND", "PHP", "ILS", "CLP", "ISK",
    ];
    CODES.iter().find(|c| **c == code).copied()
}

fn is_zero_decimal(currency: Option<&str>) -> bool {
    currency.is_some_and(|c| ZERO_DECIMAL.contains(&c))
}

/// Turn a separator-laden numeric string into a decimal.
fn normalize_amount(numeric: &str, currency: Option<&str>) -> Option<Decimal> {
    let zero_decimal = is_zero_decimal(currency);

    let mut digits: String = numeric
        .chars()
        .filter(|c| !matches!(c, ' ' | '\u{00A0}' | '\u{202F}' | '\''))
        .collect();

    if zero_decimal {
        digits.retain(|c| c.is_ascii_digit());
    } else {
        let last_comma = digits.rfind(',');
        let last_dot = digits.rfind('.');
        digits = match (last_comma, last_dot) {
            (Some(c), Some(d)) => {
                let (decimal, grouping) = if c > d { (',', '.') } else { ('.', ',') };
                digits
                    .chars()
                    .filter(|ch| *ch != grouping)
                    .map(|ch| if ch == decimal { '.' } else { ch })
                    .collect()
            }
            (Some(_), None) => resolve_single_separator(&digits, ','),
            (None, Some(_)) => resolve_single_separator(&digits, '.'),
            (None, None) => digits,
        };
    }

    let value = Decimal::from_str(&digits).ok()?;
    let scale = if zero_decimal { 0 } else { 2 };
    Some(value.round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero))
}

/// Decide whether a lone separator kind is grouping or decimal.
fn resolve_single_separator(digits: &str, sep: char) -> String {
    let count = digits.matches(sep).count();
    if count > 1 {
        return digits.chars().filter(|c| *c != sep).collect();
    }

    let (int_part, frac_part) = match digits.split_once(sep) {
        Some(parts) => parts,
        None => return digits.to_string(),
    };

    if frac_part.len() == 3 && int_part != "0" {
        format!("{}{}", int_part, frac_part)
    } else {
        format!("{}.{}", int_part, frac_part)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn parsed(text: &str) -> (Decimal, Option<String>) {
        let p = parse_price(text).unwrap_or_else(|| panic!("no price in {:?}", text));
        (p.amount, p.currency)
    }

    #[test]
    fn test_us_format() {
        assert_eq!(parsed("$19.99"), (dec("19.99"), Some("USD".into())));
        assert_eq!(parsed("$1,234.56"), (dec("1234.56"), Some("USD".into())));
        assert_eq!(parsed("US$ 2,499"), (dec("2499"), Some("USD".into())));
        assert_eq!(parsed("1,234,567.89 USD"), (dec("1234567.89"), Some("USD".into())));
    }

    #[test]
    fn test_european_format() {
        assert_eq!(parsed("1.234,56 €"), (dec("1234.56"), Some("EUR".into())));
        assert_eq!(parsed("19,99 €"), (dec("19.99"), Some("EUR".into())));
        assert_eq!(parsed("€ 1 299,00"), (dec("1299.00"), Some("EUR".into())));
        assert_eq!(parsed("CHF 1'299.50"), (dec("1299.50"), Some("CHF".into())));
        assert_eq!(parsed("R$ 1.299,90"), (dec("1299.90"), Some("BRL".into())));
    }

    #[test]
    fn test_indian_and_zero_decimal_currencies() {
        assert_eq!(parsed("₹54,900"), (dec("54900"), Some("INR".into())));
        assert_eq!(parsed("₹1,23,456.50"), (dec("123456.50"), Some("INR".into())));
        assert_eq!(parsed("Rs. 999"), (dec("999"), Some("INR".into())));
        assert_eq!(parsed("¥1,200"), (dec("1200"), Some("JPY".into())));
        assert_eq!(parsed("₩12.500"), (dec("12500"), Some("KRW".into())));
    }

    #[test]
    fn test_single_separator_heuristics() {
        assert_eq!(parsed("1,234").0, dec("1234"));
        assert_eq!(parsed("1.234").0, dec("1234"));
        assert_eq!(parsed("12,5").0, dec("12.5"));
        assert_eq!(parsed("0,750").0, dec("0.75"));
        assert_eq!(parsed("17.5").0, dec("17.5"));
        assert_eq!(parsed("  42 ").0, dec("42"));
    }

    #[test]
    fn test_no_digits() {
        assert!(parse_price("Call for price").is_none());
        assert!(parse_price("").is_none());
    }

    #[test]
    fn test_find_marked_price_skips_unmarked_numbers() {
        let text = "Model 3000 rated 4.5 stars. Now only $249.00, was $299.00";
        let p = find_marked_price(text).unwrap();
        assert_eq!(p.amount, dec("249.00"));
        assert_eq!(p.currency.as_deref(), Some("USD"));

        assert!(find_marked_price("Free shipping on 2 items").is_none());
    }

    #[test]
    fn test_normalize_currency() {
        assert_eq!(normalize_currency(" usd ").as_deref(), Some("USD"));
        assert_eq!(normalize_currency("€").as_deref(), Some("EUR"));
        assert_eq!(normalize_currency("dollars and cents"), None);
    }
}
