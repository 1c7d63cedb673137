use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

use crate::ingest::{ImportError, RawRow, RejectedRow};

fn date_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(?:\d{4}-\d{2}-\d{2}|\d{2}\.\d{2}\.\d{4}|\d{2}/\d{2}/\d{4})\b")
            .expect("date token regex")
    })
}

fn amount_cell_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:[$€£¥]\s?)?[+-]?\d[\d,.']*[.,]\d{2}$").expect("amount cell regex")
    })
}

fn cell_split_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r" {2,}|\t").expect("cell split regex"))
}

/// Currency codes recognised as standalone statement columns.
const KNOWN_CODES: &[&str] = &["USD", "EUR", "GBP", "JPY", "CHF", "CAD", "MXN"];

pub fn extract_file(path: &Path) -> Result<Vec<Result<RawRow, RejectedRow>>, ImportError> {
    let text = pdf_extract::extract_text(path).map_err(|e| ImportError::Pdf(e.to_string()))?;
    Ok(reconstruct_rows(&text))
}

/// Heuristic row reconstruction over extracted statement text. A line
/// qualifies as a transaction row only if it carries a date token and at
/// least one amount-shaped cell; everything else (headers, footers, page
/// numbers, address blocks) is formatting noise and is dropped. Cells are
/// clustered by runs of two or more spaces; amount-shaped cells beyond
/// the first are running balances and are discarded.
pub fn reconstruct_rows(text: &str) -> Vec<Result<RawRow, RejectedRow>> {
    let mut rows = Vec::new();

    for (i, line) in text.lines().enumerate() {
        let line = line.trim_end();
        if line.trim().is_empty() {
            continue;
        }

        let Some(date_match) = date_token_re().find(line) else {
            continue;
        };

        // Blank the date span so its digits cannot be mistaken for an
        // amount, keeping column positions intact.
        let mut remainder = String::with_capacity(line.len());
        remainder.push_str(&line[..date_match.start()]);
        remainder.push_str(&" ".repeat(date_match.end() - date_match.start()));
        remainder.push_str(&line[date_match.end()..]);

        let mut amount: Option<String> = None;
        let mut currency: Option<String> = None;
        let mut description_cells: Vec<&str> = Vec::new();

        for cell in cell_split_re().split(&remainder) {
            let cell = cell.trim();
            if cell.is_empty() {
                continue;
            }
            if amount_cell_re().is_match(cell) {
                if amount.is_none() {
                    amount = Some(cell.to_string());
                }
                continue;
            }
            if KNOWN_CODES.contains(&cell) {
                currency = Some(cell.to_string());
                continue;
            }
            description_cells.push(cell);
        }

        let Some(amount) = amount else {
            // Date but no amount: period headers, carried-forward lines
            continue;
        };

        rows.push(Ok(RawRow {
            source: format!("line {}", i + 1),
            date: date_match.as_str().to_string(),
            category: None,
            description: description_cells.join(" "),
            amount,
            currency,
        }));
    }

    rows
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATEMENT: &str = "\
ACME BANK                      Statement Period 2024-01-01 to 2024-01-31
Account 00012345

Date        Description                Amount      Balance
2024-01-15  SUPERMARKET AURORA         50.00       1,200.00
2024-01-16  CINEMA DOWNTOWN            $12.50      1,187.50
2024-01-17  TRANSFER RECEIVED          CHF  80.00  1,267.50

Page 1 of 2
Thank you for banking with ACME
";

    #[test]
    fn test_noise_lines_are_discarded() {
        let rows = reconstruct_rows(STATEMENT);
        // Period header has dates but no amount cell; footer has neither
        assert_eq!(rows.len(), 3);
    }

    #[test]
    fn test_row_fields_reconstructed() {
        let rows = reconstruct_rows(STATEMENT);
        let first = rows[0].as_ref().unwrap();
        assert_eq!(first.date, "2024-01-15");
        assert_eq!(first.description, "SUPERMARKET AURORA");
        assert_eq!(first.amount, "50.00");
        assert_eq!(first.currency, None);
    }

    #[test]
    fn test_balance_column_is_not_the_amount() {
        let rows = reconstruct_rows(STATEMENT);
        let first = rows[0].as_ref().unwrap();
        assert_eq!(first.amount, "50.00");
        assert!(!first.description.contains("1,200.00"));
    }

    #[test]
    fn test_symbol_and_currency_cells() {
        let rows = reconstruct_rows(STATEMENT);
        assert_eq!(rows[1].as_ref().unwrap().amount, "$12.50");

        let third = rows[2].as_ref().unwrap();
        assert_eq!(third.currency.as_deref(), Some("CHF"));
        assert_eq!(third.amount, "80.00");
    }

    #[test]
    fn test_dotted_dates_qualify() {
        let rows = reconstruct_rows("15.01.2024   COFFEE HOUSE   4.50\n");
        let row = rows[0].as_ref().unwrap();
        assert_eq!(row.date, "15.01.2024");
        assert_eq!(row.amount, "4.50");
        assert_eq!(row.description, "COFFEE HOUSE");
    }

    #[test]
    fn test_empty_text_yields_no_rows() {
        assert!(reconstruct_rows("").is_empty());
    }
}
