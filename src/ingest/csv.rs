use csv::StringRecord;

use crate::ingest::{ImportError, RawRow, RejectedRow};

/// Recognised header names per logical column, compared case-insensitively
/// after trimming. Order inside the file does not matter.
const DATE_ALIASES: &[&str] = &["date", "transaction date", "fecha"];
const CATEGORY_ALIASES: &[&str] = &["category", "type", "categoria"];
const DESCRIPTION_ALIASES: &[&str] = &["description", "detail", "details", "descripcion"];
const AMOUNT_ALIASES: &[&str] = &["amount", "value", "monto", "valor"];
const CURRENCY_ALIASES: &[&str] = &["currency"];

struct ColumnIndex {
    date: usize,
    category: usize,
    description: usize,
    amount: usize,
    currency: Option<usize>,
}

fn find_column(headers: &StringRecord, aliases: &[&str]) -> Option<usize> {
    headers.iter().position(|header| {
        let header = header.trim().to_lowercase();
        aliases.iter().any(|alias| *alias == header)
    })
}

fn map_columns(headers: &StringRecord) -> Result<ColumnIndex, ImportError> {
    let date = find_column(headers, DATE_ALIASES);
    let category = find_column(headers, CATEGORY_ALIASES);
    let description = find_column(headers, DESCRIPTION_ALIASES);
    let amount = find_column(headers, AMOUNT_ALIASES);

    let mut missing = Vec::new();
    if date.is_none() {
        missing.push("date");
    }
    if category.is_none() {
        missing.push("category");
    }
    if description.is_none() {
        missing.push("description");
    }
    if amount.is_none() {
        missing.push("amount");
    }
    if !missing.is_empty() {
        return Err(ImportError::Schema(format!(
            "missing required columns: {}",
            missing.join(", ")
        )));
    }

    Ok(ColumnIndex {
        date: date.unwrap(),
        category: category.unwrap(),
        description: description.unwrap(),
        amount: amount.unwrap(),
        currency: find_column(headers, CURRENCY_ALIASES),
    })
}

/// Extract raw rows from CSV content. A missing required column fails the
/// whole batch; an unreadable record only rejects that record.
pub fn extract(content: &str) -> Result<Vec<Result<RawRow, RejectedRow>>, ImportError> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let headers = reader
        .headers()
        .map_err(|e| ImportError::Schema(format!("unreadable header row: {}", e)))?
        .clone();
    let columns = map_columns(&headers)?;

    let mut rows = Vec::new();
    for (i, result) in reader.records().enumerate() {
        // Header is line 1; data starts on line 2
        let source = format!("row {}", i + 2);
        match result {
            Ok(record) => {
                let field = |idx: usize| record.get(idx).unwrap_or("").to_string();
                let optional = |idx: usize| {
                    let value = field(idx);
                    if value.is_empty() { None } else { Some(value) }
                };
                rows.push(Ok(RawRow {
                    source,
                    date: field(columns.date),
                    category: optional(columns.category),
                    description: field(columns.description),
                    amount: field(columns.amount),
                    currency: columns.currency.and_then(optional),
                }));
            }
            Err(err) => rows.push(Err(RejectedRow {
                source,
                row: String::new(),
                reason: format!("unreadable record: {}", err),
            })),
        }
    }

    Ok(rows)
}
