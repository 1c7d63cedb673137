use chrono::NaiveDate;

/// Date formats accepted from statements and chat commands, tried in order.
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d.%m.%Y", "%m/%d/%Y"];

pub fn parse_flexible_date(s: &str) -> Option<NaiveDate> {
    let trimmed = s.trim();
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
            return Some(date);
        }
    }
    None
}

/// Currency symbols and codes recognised in amount strings.
const CURRENCY_SYMBOLS: &[(&str, &str)] = &[
    ("$", "USD"),
    ("€", "EUR"),
    ("£", "GBP"),
    ("¥", "JPY"),
    ("Fr.", "CHF"),
    ("Fr", "CHF"),
];

pub fn currency_for_symbol(symbol: &str) -> Option<&'static str> {
    CURRENCY_SYMBOLS
        .iter()
        .find(|(sym, _)| *sym == symbol)
        .map(|(_, code)| *code)
}

fn is_iso_code(token: &str) -> bool {
    token.len() == 3 && token.chars().all(|c| c.is_ascii_alphabetic())
}

/// Parse a monetary string into a value and the currency it names, if any.
/// Accepts a leading/trailing symbol ("$50", "50€") or ISO code ("50 CHF",
/// "CHF 50"); the numeric part goes through `parse_amount`.
pub fn parse_money(s: &str) -> Option<(f64, Option<String>)> {
    let mut rest = s.trim().to_string();
    let mut currency: Option<String> = None;

    for (symbol, code) in CURRENCY_SYMBOLS {
        if let Some(stripped) = rest.strip_prefix(symbol) {
            currency = Some((*code).to_string());
            rest = stripped.to_string();
            break;
        }
        if let Some(stripped) = rest.strip_suffix(symbol) {
            currency = Some((*code).to_string());
            rest = stripped.to_string();
            break;
        }
    }

    if currency.is_none() {
        let tokens: Vec<String> = rest.split_whitespace().map(str::to_string).collect();
        if tokens.len() == 2 {
            if is_iso_code(&tokens[0]) {
                currency = Some(tokens[0].to_uppercase());
                rest = tokens[1].clone();
            } else if is_iso_code(&tokens[1]) {
                currency = Some(tokens[1].to_uppercase());
                rest = tokens[0].clone();
            }
        }
    }

    parse_amount(&rest).map(|value| (value, currency))
}

/// Parse a plain numeric amount, tolerating both thousands conventions:
/// "1,234.56" and "1.234,56" are the same value.
pub fn parse_amount(s: &str) -> Option<f64> {
    let mut cleaned: String = s
        .trim()
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '\'')
        .collect();
    if cleaned.is_empty() {
        return None;
    }

    let last_comma = cleaned.rfind(',');
    let last_dot = cleaned.rfind('.');
    match (last_comma, last_dot) {
        (Some(comma), Some(dot)) => {
            if comma > dot {
                // European: dot groups thousands, comma is the decimal mark
                cleaned = cleaned.replace('.', "").replace(',', ".");
            } else {
                cleaned = cleaned.replace(',', "");
            }
        }
        (Some(_), None) => {
            // A single comma is a decimal mark; several are group separators
            if cleaned.matches(',').count() == 1 {
                cleaned = cleaned.replace(',', ".");
            } else {
                cleaned = cleaned.replace(',', "");
            }
        }
        _ => {}
    }

    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Round to currency minor units (two decimal places).
pub fn round_minor(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

pub fn minor_units(amount: f64) -> i64 {
    (amount * 100.0).round() as i64
}

/// Normalise a free-text description into a stable key: uppercase,
/// whitespace collapsed, purely numeric tokens (references, card
/// fragments) dropped so re-exports of the same statement line up.
pub fn description_key(description: &str) -> String {
    let upper = description.to_uppercase();
    let tokens: Vec<&str> = upper
        .split_whitespace()
        .filter(|token| !token.chars().all(|c| c.is_ascii_digit()))
        .collect();
    tokens.join(" ")
}

/// Duplicate-detection fingerprint over (date, minor-unit amount,
/// description key, category). FNV-1a 64-bit, stable across Rust versions.
pub fn fingerprint(date: NaiveDate, amount: f64, description: &str, category: &str) -> String {
    const FNV_OFFSET: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;

    let composed = format!(
        "{}|{}|{}|{}",
        date,
        minor_units(amount),
        description_key(description),
        category
    );

    let mut hash = FNV_OFFSET;
    for b in composed.as_bytes() {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }

    format!("fp-{:016x}", hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iso_date() {
        let date = parse_flexible_date("2024-01-15").unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2024, 1, 15).unwrap());
    }

    #[test]
    fn test_dotted_and_slashed_dates() {
        assert_eq!(
            parse_flexible_date("15.01.2024"),
            NaiveDate::from_ymd_opt(2024, 1, 15)
        );
        assert_eq!(
            parse_flexible_date("01/15/2024"),
            NaiveDate::from_ymd_opt(2024, 1, 15)
        );
        assert_eq!(parse_flexible_date("January 15"), None);
    }

    #[test]
    fn test_amount_separator_conventions() {
        assert_eq!(parse_amount("1,234.56"), Some(1234.56));
        assert_eq!(parse_amount("1.234,56"), Some(1234.56));
        assert_eq!(parse_amount("50"), Some(50.0));
        assert_eq!(parse_amount("12,50"), Some(12.5));
        assert_eq!(parse_amount(""), None);
        assert_eq!(parse_amount("abc"), None);
    }

    #[test]
    fn test_money_with_symbol() {
        assert_eq!(parse_money("$50"), Some((50.0, Some("USD".to_string()))));
        assert_eq!(parse_money("€9.99"), Some((9.99, Some("EUR".to_string()))));
        assert_eq!(parse_money("50 CHF"), Some((50.0, Some("CHF".to_string()))));
        assert_eq!(parse_money("42.00"), Some((42.0, None)));
    }

    #[test]
    fn test_description_key_strips_references() {
        let a = description_key("Supermarket 01234 9876");
        let b = description_key("Supermarket 56789 1111");
        assert_eq!(a, b);
        assert_eq!(a, "SUPERMARKET");
    }

    #[test]
    fn test_fingerprint_stable_for_same_row() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let a = fingerprint(date, 50.0, "Supermarket", "Groceries");
        let b = fingerprint(date, 50.004, "supermarket", "Groceries");
        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_differs_on_amount() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let a = fingerprint(date, 50.0, "Supermarket", "Groceries");
        let b = fingerprint(date, 50.01, "Supermarket", "Groceries");
        assert_ne!(a, b);
    }
}
