pub mod csv;
pub mod pdf;

use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::categories::{CategoryVocabulary, FALLBACK_CATEGORY};
use crate::currency::RateCache;
use crate::db::{Database, NewExpense};
use crate::normalize;

/// Raw text fields extracted from one statement line, before
/// normalisation. Both extractors emit this shape so the normalise/dedup
/// stage is format-agnostic.
#[derive(Debug, Clone, Serialize)]
pub struct RawRow {
    /// Where the row came from, e.g. "row 3" or "line 12".
    pub source: String,
    pub date: String,
    pub category: Option<String>,
    pub description: String,
    pub amount: String,
    pub currency: Option<String>,
}

impl RawRow {
    pub fn render(&self) -> String {
        let mut parts = vec![self.date.clone()];
        if let Some(category) = &self.category {
            parts.push(category.clone());
        }
        parts.push(self.description.clone());
        parts.push(self.amount.clone());
        parts.join(" | ")
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RejectedRow {
    pub source: String,
    pub row: String,
    pub reason: String,
}

/// Outcome of one ingestion run, reported back to the caller as plain
/// data; the batch itself is not persisted.
#[derive(Debug, Serialize)]
pub struct ImportSummary {
    pub batch_id: String,
    pub accepted: usize,
    pub duplicates: usize,
    pub rejected: Vec<RejectedRow>,
}

#[derive(Debug)]
pub enum ImportError {
    /// Required CSV columns are absent; the whole batch is aborted.
    Schema(String),
    Io(std::io::Error),
    Pdf(String),
    UnknownFormat(String),
    Storage(sqlx::Error),
}

impl fmt::Display for ImportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImportError::Schema(msg) => write!(f, "statement schema error: {}", msg),
            ImportError::Io(err) => write!(f, "failed to read statement: {}", err),
            ImportError::Pdf(msg) => write!(f, "failed to extract PDF text: {}", msg),
            ImportError::UnknownFormat(ext) => {
                write!(f, "unsupported statement format: {}", ext)
            }
            ImportError::Storage(err) => write!(f, "storage error: {}", err),
        }
    }
}

impl std::error::Error for ImportError {}

impl From<std::io::Error> for ImportError {
    fn from(err: std::io::Error) -> Self {
        ImportError::Io(err)
    }
}

impl From<sqlx::Error> for ImportError {
    fn from(err: sqlx::Error) -> Self {
        ImportError::Storage(err)
    }
}

#[derive(Debug, Clone)]
pub struct ImportOptions {
    /// Currency assumed for rows that do not name one.
    pub default_currency: String,
    /// Canonical currency every expense is also stored in.
    pub base_currency: String,
}

/// A raw row normalised into a candidate expense, ready for dedup.
struct Candidate {
    date: NaiveDate,
    category: String,
    description: String,
    amount: f64,
    currency: String,
}

/// Import one statement file, dispatching on extension.
pub async fn import_file(
    db: &Database,
    vocabulary: &CategoryVocabulary,
    rates: &RateCache,
    path: &Path,
    options: &ImportOptions,
) -> Result<ImportSummary, ImportError> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    let rows = match extension.as_str() {
        "csv" => {
            // Statements exported as latin-1 still read; odd bytes only
            // mangle the affected field, not the batch
            let bytes = std::fs::read(path)?;
            let content = String::from_utf8_lossy(&bytes);
            csv::extract(&content)?
        }
        "pdf" => pdf::extract_file(path)?,
        other => return Err(ImportError::UnknownFormat(other.to_string())),
    };

    let filename = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("unknown");

    import_rows(db, vocabulary, rates, rows, options, filename).await
}

/// Shared normalise/dedup stage. Each accepted row is committed
/// independently, so a crash mid-batch leaves only whole rows behind and
/// a retry skips them as duplicates.
pub async fn import_rows(
    db: &Database,
    vocabulary: &CategoryVocabulary,
    rates: &RateCache,
    rows: Vec<Result<RawRow, RejectedRow>>,
    options: &ImportOptions,
    source_name: &str,
) -> Result<ImportSummary, ImportError> {
    let mut summary = ImportSummary {
        batch_id: Uuid::new_v4().to_string(),
        accepted: 0,
        duplicates: 0,
        rejected: Vec::new(),
    };
    let mut seen: HashSet<String> = HashSet::new();

    for row in rows {
        let raw = match row {
            Ok(raw) => raw,
            Err(rejected) => {
                summary.rejected.push(rejected);
                continue;
            }
        };

        let candidate = match normalize_row(&raw, vocabulary, options) {
            Ok(candidate) => candidate,
            Err(reason) => {
                warn!(source = %raw.source, %reason, "row rejected");
                summary.rejected.push(RejectedRow {
                    source: raw.source.clone(),
                    row: raw.render(),
                    reason,
                });
                continue;
            }
        };

        // Duplicate detection is heuristic: two genuinely distinct
        // same-day, same-amount, same-description, same-category
        // transactions collide and only the first is kept. Accepted
        // trade-off, do not tighten without product input.
        let fingerprint = normalize::fingerprint(
            candidate.date,
            candidate.amount,
            &candidate.description,
            &candidate.category,
        );
        if seen.contains(&fingerprint) || db.fingerprint_exists(&fingerprint).await? {
            summary.duplicates += 1;
            continue;
        }

        // Base-currency value is frozen now, at ingestion time
        let conversion = match rates
            .convert(candidate.amount, &candidate.currency, &options.base_currency)
            .await
        {
            Ok(conversion) => conversion,
            Err(err) => {
                summary.rejected.push(RejectedRow {
                    source: raw.source.clone(),
                    row: raw.render(),
                    reason: err.to_string(),
                });
                continue;
            }
        };

        db.create_expense(&NewExpense {
            date: candidate.date,
            category: candidate.category,
            description: candidate.description,
            amount: candidate.amount,
            currency: candidate.currency,
            base_amount: normalize::round_minor(conversion.amount),
            base_currency: options.base_currency.clone(),
        })
        .await?;

        seen.insert(fingerprint);
        summary.accepted += 1;
    }

    db.log_import(source_name, summary.accepted).await?;
    info!(
        source = source_name,
        accepted = summary.accepted,
        duplicates = summary.duplicates,
        rejected = summary.rejected.len(),
        "import complete"
    );

    Ok(summary)
}

fn normalize_row(
    raw: &RawRow,
    vocabulary: &CategoryVocabulary,
    options: &ImportOptions,
) -> Result<Candidate, String> {
    let date = normalize::parse_flexible_date(&raw.date)
        .ok_or_else(|| format!("unparseable date '{}'", raw.date))?;

    let (amount, inline_currency) = normalize::parse_money(&raw.amount)
        .ok_or_else(|| format!("non-numeric amount '{}'", raw.amount))?;
    let amount = normalize::round_minor(amount);
    if amount == 0.0 {
        return Err("zero amount".to_string());
    }

    let currency = raw
        .currency
        .as_deref()
        .map(|c| c.trim().to_uppercase())
        .filter(|c| !c.is_empty())
        .or(inline_currency)
        .unwrap_or_else(|| options.default_currency.clone());

    let description = raw.description.split_whitespace().collect::<Vec<_>>().join(" ");

    let category = match raw.category.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
        Some(text) => vocabulary.resolve(text).name,
        None => vocabulary
            .keyword_match(&description)
            .unwrap_or_else(|| FALLBACK_CATEGORY.to_string()),
    };

    Ok(Candidate {
        date,
        category,
        description,
        amount,
        currency,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::currency::{ProviderError, RateProvider};
    use async_trait::async_trait;
    use std::time::Duration;

    struct FixedRates;

    #[async_trait]
    impl RateProvider for FixedRates {
        async fn fetch_rate(&self, base: &str, quote: &str) -> Result<f64, ProviderError> {
            match (base, quote) {
                ("EUR", "USD") => Ok(1.08),
                _ => Err(ProviderError::MissingRate {
                    quote: quote.to_string(),
                }),
            }
        }
    }

    fn test_rates() -> RateCache {
        RateCache::new(Box::new(FixedRates), Duration::from_secs(3600))
    }

    fn test_options() -> ImportOptions {
        ImportOptions {
            default_currency: "USD".to_string(),
            base_currency: "USD".to_string(),
        }
    }

    fn raw(date: &str, category: Option<&str>, description: &str, amount: &str) -> Result<RawRow, RejectedRow> {
        Ok(RawRow {
            source: "row 2".to_string(),
            date: date.to_string(),
            category: category.map(|s| s.to_string()),
            description: description.to_string(),
            amount: amount.to_string(),
            currency: None,
        })
    }

    #[tokio::test]
    async fn test_accepted_row_becomes_expense() {
        let db = Database::open("sqlite::memory:").await.unwrap();
        let vocab = CategoryVocabulary::new(Vec::new());
        let rates = test_rates();

        let summary = import_rows(
            &db,
            &vocab,
            &rates,
            vec![raw("2024-01-15", Some("Groceries"), "Supermarket", "50.00")],
            &test_options(),
            "statement.csv",
        )
        .await
        .unwrap();

        assert_eq!(summary.accepted, 1);
        assert_eq!(summary.duplicates, 0);
        assert!(summary.rejected.is_empty());

        let expenses = db.list_expenses(&Default::default()).await.unwrap();
        assert_eq!(expenses.len(), 1);
        assert_eq!(expenses[0].amount, 50.0);
        assert_eq!(expenses[0].currency, "USD");
        assert_eq!(expenses[0].category, "Groceries");
    }

    #[tokio::test]
    async fn test_second_import_is_all_duplicates() {
        let db = Database::open("sqlite::memory:").await.unwrap();
        let vocab = CategoryVocabulary::new(Vec::new());
        let rates = test_rates();

        let rows = || {
            vec![
                raw("2024-01-15", Some("Groceries"), "Supermarket", "50.00"),
                raw("2024-01-16", Some("Dining"), "Pizzeria", "23.50"),
            ]
        };

        let first = import_rows(&db, &vocab, &rates, rows(), &test_options(), "a.csv")
            .await
            .unwrap();
        assert_eq!(first.accepted, 2);

        let second = import_rows(&db, &vocab, &rates, rows(), &test_options(), "a.csv")
            .await
            .unwrap();
        assert_eq!(second.accepted, 0);
        assert_eq!(second.duplicates, first.accepted);
    }

    #[tokio::test]
    async fn test_in_batch_collision_keeps_first() {
        let db = Database::open("sqlite::memory:").await.unwrap();
        let vocab = CategoryVocabulary::new(Vec::new());
        let rates = test_rates();

        let summary = import_rows(
            &db,
            &vocab,
            &rates,
            vec![
                raw("2024-01-15", Some("Groceries"), "Supermarket", "50.00"),
                raw("2024-01-15", Some("Groceries"), "Supermarket", "50.00"),
            ],
            &test_options(),
            "a.csv",
        )
        .await
        .unwrap();

        assert_eq!(summary.accepted, 1);
        assert_eq!(summary.duplicates, 1);
    }

    #[tokio::test]
    async fn test_bad_rows_are_rejected_not_fatal() {
        let db = Database::open("sqlite::memory:").await.unwrap();
        let vocab = CategoryVocabulary::new(Vec::new());
        let rates = test_rates();

        let summary = import_rows(
            &db,
            &vocab,
            &rates,
            vec![
                raw("not-a-date", Some("Groceries"), "Supermarket", "50.00"),
                raw("2024-01-15", Some("Groceries"), "Supermarket", "fifty"),
                raw("2024-01-16", Some("Dining"), "Pizzeria", "23.50"),
            ],
            &test_options(),
            "a.csv",
        )
        .await
        .unwrap();

        assert_eq!(summary.accepted, 1);
        assert_eq!(summary.rejected.len(), 2);
        assert!(summary.rejected[0].reason.contains("unparseable date"));
        assert!(summary.rejected[1].reason.contains("non-numeric amount"));
    }

    #[tokio::test]
    async fn test_missing_rate_rejects_row_without_partial_state() {
        let db = Database::open("sqlite::memory:").await.unwrap();
        let vocab = CategoryVocabulary::new(Vec::new());
        let rates = test_rates();

        let mut row = raw("2024-01-15", Some("Groceries"), "Tokyo market", "5000").unwrap();
        row.currency = Some("JPY".to_string());

        let summary = import_rows(
            &db,
            &vocab,
            &rates,
            vec![Ok(row)],
            &test_options(),
            "a.csv",
        )
        .await
        .unwrap();

        assert_eq!(summary.accepted, 0);
        assert_eq!(summary.rejected.len(), 1);
        assert!(db.list_expenses(&Default::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cross_currency_base_amount_frozen() {
        let db = Database::open("sqlite::memory:").await.unwrap();
        let vocab = CategoryVocabulary::new(Vec::new());
        let rates = test_rates();

        let mut row = raw("2024-01-15", Some("Dining"), "Bistro", "100.00").unwrap();
        row.currency = Some("EUR".to_string());

        let summary = import_rows(&db, &vocab, &rates, vec![Ok(row)], &test_options(), "a.csv")
            .await
            .unwrap();
        assert_eq!(summary.accepted, 1);

        let expenses = db.list_expenses(&Default::default()).await.unwrap();
        assert_eq!(expenses[0].currency, "EUR");
        assert_eq!(expenses[0].amount, 100.0);
        assert_eq!(expenses[0].base_currency, "USD");
        assert!((expenses[0].base_amount - 108.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_import_file_twice_from_disk() {
        use std::io::Write;

        let db = Database::open("sqlite::memory:").await.unwrap();
        let vocab = CategoryVocabulary::new(Vec::new());
        let rates = test_rates();

        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(file, "Date,Category,Description,Amount").unwrap();
        writeln!(file, "2024-01-15,Groceries,Supermarket,50.00").unwrap();
        writeln!(file, "2024-01-16,Dining,Pizzeria,23.50").unwrap();
        file.flush().unwrap();

        let first = import_file(&db, &vocab, &rates, file.path(), &test_options())
            .await
            .unwrap();
        assert_eq!(first.accepted, 2);
        assert_eq!(first.duplicates, 0);

        let second = import_file(&db, &vocab, &rates, file.path(), &test_options())
            .await
            .unwrap();
        assert_eq!(second.accepted, 0);
        assert_eq!(second.duplicates, 2);
    }

    #[tokio::test]
    async fn test_unknown_extension_fails() {
        let db = Database::open("sqlite::memory:").await.unwrap();
        let vocab = CategoryVocabulary::new(Vec::new());
        let rates = test_rates();

        let err = import_file(
            &db,
            &vocab,
            &rates,
            Path::new("statement.xlsx"),
            &test_options(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ImportError::UnknownFormat(_)));
    }

    #[tokio::test]
    async fn test_category_keyword_fallback() {
        let db = Database::open("sqlite::memory:").await.unwrap();
        let vocab = CategoryVocabulary::new(Vec::new());
        let rates = test_rates();

        let summary = import_rows(
            &db,
            &vocab,
            &rates,
            vec![
                raw("2024-01-15", None, "Corner groceries store", "12.00"),
                raw("2024-01-16", None, "Mystery merchant", "9.00"),
            ],
            &test_options(),
            "a.csv",
        )
        .await
        .unwrap();
        assert_eq!(summary.accepted, 2);

        let expenses = db.list_expenses(&Default::default()).await.unwrap();
        assert_eq!(expenses[0].category, "Groceries");
        assert_eq!(expenses[1].category, FALLBACK_CATEGORY);
    }
}
