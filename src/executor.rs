use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use crate::ai::interpreter::{ExpenseUpdate, Operation};
use crate::currency::{RateCache, RateUnavailable};
use crate::db::{Budget, Database, Expense, ExpenseFilter, NewExpense};
use crate::normalize;

/// Result of applying an operation, handed to the presentation layer as
/// plain data.
#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperationOutcome {
    ExpenseCreated {
        expense: Expense,
    },
    Expenses {
        expenses: Vec<Expense>,
        total: f64,
        currency: String,
    },
    ExpenseDeleted {
        id: i64,
    },
    ExpenseUpdated {
        expense: Expense,
    },
    BudgetSet {
        budget: Budget,
    },
}

#[derive(Debug)]
pub enum ExecuteError {
    InvalidAmount(String),
    InvalidPeriod(String),
    NotFound { id: i64 },
    Rate(RateUnavailable),
    Storage(sqlx::Error),
}

impl fmt::Display for ExecuteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecuteError::InvalidAmount(msg) => write!(f, "invalid amount: {}", msg),
            ExecuteError::InvalidPeriod(period) => {
                write!(f, "budget period must be YYYY-MM, got '{}'", period)
            }
            ExecuteError::NotFound { id } => write!(f, "no expense with id {}", id),
            ExecuteError::Rate(err) => write!(f, "{}", err),
            ExecuteError::Storage(err) => write!(f, "storage error: {}", err),
        }
    }
}

impl From<sqlx::Error> for ExecuteError {
    fn from(err: sqlx::Error) -> Self {
        ExecuteError::Storage(err)
    }
}

impl From<RateUnavailable> for ExecuteError {
    fn from(err: RateUnavailable) -> Self {
        ExecuteError::Rate(err)
    }
}

/// Applies validated operations through the repository. Every write path
/// (chat command, manual form, HTTP) funnels through here, so the
/// business rules live in exactly one place.
pub struct OperationExecutor {
    db: Arc<Database>,
    rates: Arc<RateCache>,
    base_currency: String,
}

impl OperationExecutor {
    pub fn new(db: Arc<Database>, rates: Arc<RateCache>, base_currency: &str) -> Self {
        Self {
            db,
            rates,
            base_currency: base_currency.to_uppercase(),
        }
    }

    pub async fn execute(&self, operation: Operation) -> Result<OperationOutcome, ExecuteError> {
        match operation {
            Operation::CreateExpense {
                amount,
                currency,
                category,
                description,
                date,
            } => {
                let amount = validated_amount(amount)?;
                let date = date.unwrap_or_else(|| Utc::now().date_naive());

                // Conversion is frozen now; if no rate can be had, no row
                // is written at all
                let conversion = self
                    .rates
                    .convert(amount, &currency, &self.base_currency)
                    .await?;

                let expense = self
                    .db
                    .create_expense(&NewExpense {
                        date,
                        category,
                        description,
                        amount,
                        currency,
                        base_amount: normalize::round_minor(conversion.amount),
                        base_currency: self.base_currency.clone(),
                    })
                    .await?;

                Ok(OperationOutcome::ExpenseCreated { expense })
            }
            Operation::QueryExpenses {
                category,
                date_range,
            } => {
                // Open-ended ranges use the calendar extremes as
                // sentinels; those never appear in stored ISO dates, so
                // they translate to an unbounded side of the filter.
                let (from, to) = match date_range {
                    Some((from, to)) => (
                        (from != chrono::NaiveDate::MIN).then_some(from),
                        (to != chrono::NaiveDate::MAX).then_some(to),
                    ),
                    None => (None, None),
                };
                let expenses = self
                    .db
                    .list_expenses(&ExpenseFilter {
                        category,
                        from,
                        to,
                    })
                    .await?;
                let total =
                    normalize::round_minor(expenses.iter().map(|e| e.base_amount).sum::<f64>());
                Ok(OperationOutcome::Expenses {
                    expenses,
                    total,
                    currency: self.base_currency.clone(),
                })
            }
            Operation::DeleteExpense { id } => {
                if self.db.delete_expense(id).await? {
                    Ok(OperationOutcome::ExpenseDeleted { id })
                } else {
                    Err(ExecuteError::NotFound { id })
                }
            }
            Operation::UpdateExpense { id, fields } => {
                let expense = self
                    .db
                    .get_expense(id)
                    .await?
                    .ok_or(ExecuteError::NotFound { id })?;
                let expense = self.apply_update(expense, fields).await?;
                self.db.update_expense(&expense).await?;
                Ok(OperationOutcome::ExpenseUpdated { expense })
            }
            Operation::CreateOrUpdateBudget {
                category,
                limit,
                period,
            } => {
                let limit = validated_amount(limit)?;
                if limit < 0.0 {
                    return Err(ExecuteError::InvalidAmount(
                        "budget limit must not be negative".to_string(),
                    ));
                }
                if !valid_period(&period) {
                    return Err(ExecuteError::InvalidPeriod(period));
                }
                let budget = self
                    .db
                    .upsert_budget(&category, &period, normalize::round_minor(limit), &self.base_currency)
                    .await?;
                Ok(OperationOutcome::BudgetSet { budget })
            }
        }
    }

    async fn apply_update(
        &self,
        mut expense: Expense,
        fields: ExpenseUpdate,
    ) -> Result<Expense, ExecuteError> {
        let money_changed = fields.amount.is_some() || fields.currency.is_some();

        if let Some(amount) = fields.amount {
            expense.amount = validated_amount(amount)?;
        }
        if let Some(currency) = fields.currency {
            expense.currency = currency;
        }
        if let Some(category) = fields.category {
            expense.category = category;
        }
        if let Some(description) = fields.description {
            expense.description = description;
        }
        if let Some(date) = fields.date {
            expense.date = date.to_string();
        }

        // Changing the money re-freezes the base-currency value
        if money_changed {
            let conversion = self
                .rates
                .convert(expense.amount, &expense.currency, &self.base_currency)
                .await?;
            expense.base_amount = normalize::round_minor(conversion.amount);
            expense.base_currency = self.base_currency.clone();
        }

        Ok(expense)
    }
}

fn valid_period(period: &str) -> bool {
    match period.split_once('-') {
        Some((year, month)) => {
            year.len() == 4
                && year.chars().all(|c| c.is_ascii_digit())
                && month.len() == 2
                && matches!(month.parse::<u32>(), Ok(1..=12))
        }
        None => false,
    }
}

fn validated_amount(amount: f64) -> Result<f64, ExecuteError> {
    if !amount.is_finite() {
        return Err(ExecuteError::InvalidAmount(
            "amount must be finite".to_string(),
        ));
    }
    let rounded = normalize::round_minor(amount);
    if rounded == 0.0 {
        return Err(ExecuteError::InvalidAmount(
            "amount must not be zero".to_string(),
        ));
    }
    Ok(rounded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::currency::{ProviderError, RateProvider};
    use async_trait::async_trait;
    use chrono::NaiveDate;
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

    async fn test_executor() -> (Arc<Database>, OperationExecutor) {
        let db = Arc::new(Database::open("sqlite::memory:").await.unwrap());
        let rates = Arc::new(RateCache::new(
            Box::new(FixedRates),
            Duration::from_secs(3600),
        ));
        let executor = OperationExecutor::new(db.clone(), rates, "USD");
        (db, executor)
    }

    fn create_op(amount: f64, currency: &str, category: &str, date: &str) -> Operation {
        Operation::CreateExpense {
            amount,
            currency: currency.to_string(),
            category: category.to_string(),
            description: "test".to_string(),
            date: Some(date.parse().unwrap()),
        }
    }

    #[tokio::test]
    async fn test_create_matches_intent() {
        let (_db, executor) = test_executor().await;
        let outcome = executor
            .execute(create_op(50.0, "USD", "Groceries", "2024-01-15"))
            .await
            .unwrap();

        match outcome {
            OperationOutcome::ExpenseCreated { expense } => {
                assert_eq!(expense.amount, 50.0);
                assert_eq!(expense.currency, "USD");
                assert_eq!(expense.category, "Groceries");
                assert_eq!(expense.date, "2024-01-15");
                assert_eq!(expense.base_amount, 50.0);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_create_without_date_uses_today() {
        let (_db, executor) = test_executor().await;
        let outcome = executor
            .execute(Operation::CreateExpense {
                amount: 10.0,
                currency: "USD".to_string(),
                category: "Other".to_string(),
                description: String::new(),
                date: None,
            })
            .await
            .unwrap();

        match outcome {
            OperationOutcome::ExpenseCreated { expense } => {
                assert_eq!(expense.date, Utc::now().date_naive().to_string());
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_zero_amount_rejected() {
        let (db, executor) = test_executor().await;
        let err = executor
            .execute(create_op(0.0, "USD", "Groceries", "2024-01-15"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecuteError::InvalidAmount(_)));
        assert!(db.list_expenses(&Default::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_rate_writes_nothing() {
        let (db, executor) = test_executor().await;
        let err = executor
            .execute(create_op(5000.0, "JPY", "Groceries", "2024-01-15"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecuteError::Rate(_)));
        assert!(db.list_expenses(&Default::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cross_currency_base_frozen_at_creation() {
        let (db, executor) = test_executor().await;
        executor
            .execute(create_op(100.0, "EUR", "Dining", "2024-01-15"))
            .await
            .unwrap();

        let expenses = db.list_expenses(&Default::default()).await.unwrap();
        assert_eq!(expenses[0].currency, "EUR");
        assert!((expenses[0].base_amount - 108.0).abs() < 1e-9);
        assert_eq!(expenses[0].base_currency, "USD");
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let (_db, executor) = test_executor().await;
        let err = executor
            .execute(Operation::DeleteExpense { id: 41 })
            .await
            .unwrap_err();
        assert!(matches!(err, ExecuteError::NotFound { id: 41 }));
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let (_db, executor) = test_executor().await;
        let err = executor
            .execute(Operation::UpdateExpense {
                id: 7,
                fields: ExpenseUpdate {
                    amount: Some(10.0),
                    ..Default::default()
                },
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ExecuteError::NotFound { id: 7 }));
    }

    #[tokio::test]
    async fn test_update_amount_refreezes_base() {
        let (db, executor) = test_executor().await;
        let outcome = executor
            .execute(create_op(100.0, "EUR", "Dining", "2024-01-15"))
            .await
            .unwrap();
        let id = match outcome {
            OperationOutcome::ExpenseCreated { expense } => expense.id,
            other => panic!("unexpected outcome {:?}", other),
        };

        executor
            .execute(Operation::UpdateExpense {
                id,
                fields: ExpenseUpdate {
                    amount: Some(200.0),
                    ..Default::default()
                },
            })
            .await
            .unwrap();

        let updated = db.get_expense(id).await.unwrap().unwrap();
        assert_eq!(updated.amount, 200.0);
        assert!((updated.base_amount - 216.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_query_totals_in_base_currency() {
        let (_db, executor) = test_executor().await;
        executor
            .execute(create_op(50.0, "USD", "Groceries", "2024-01-15"))
            .await
            .unwrap();
        executor
            .execute(create_op(100.0, "EUR", "Groceries", "2024-01-16"))
            .await
            .unwrap();
        executor
            .execute(create_op(30.0, "USD", "Dining", "2024-01-17"))
            .await
            .unwrap();

        let outcome = executor
            .execute(Operation::QueryExpenses {
                category: Some("Groceries".to_string()),
                date_range: None,
            })
            .await
            .unwrap();

        match outcome {
            OperationOutcome::Expenses {
                expenses,
                total,
                currency,
            } => {
                assert_eq!(expenses.len(), 2);
                assert!((total - 158.0).abs() < 1e-9);
                assert_eq!(currency, "USD");
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_budget_upserts_on_category_period() {
        let (db, executor) = test_executor().await;
        executor
            .execute(Operation::CreateOrUpdateBudget {
                category: "Groceries".to_string(),
                limit: 400.0,
                period: "2024-01".to_string(),
            })
            .await
            .unwrap();
        let outcome = executor
            .execute(Operation::CreateOrUpdateBudget {
                category: "Groceries".to_string(),
                limit: 450.0,
                period: "2024-01".to_string(),
            })
            .await
            .unwrap();

        match outcome {
            OperationOutcome::BudgetSet { budget } => {
                assert_eq!(budget.limit, 450.0);
                assert_eq!(budget.period, "2024-01");
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(db.list_budgets().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_query_date_range() {
        let (_db, executor) = test_executor().await;
        executor
            .execute(create_op(10.0, "USD", "Groceries", "2024-01-10"))
            .await
            .unwrap();
        executor
            .execute(create_op(20.0, "USD", "Groceries", "2024-02-10"))
            .await
            .unwrap();

        let outcome = executor
            .execute(Operation::QueryExpenses {
                category: None,
                date_range: Some((
                    NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
                    NaiveDate::from_ymd_opt(2024, 2, 28).unwrap(),
                )),
            })
            .await
            .unwrap();

        match outcome {
            OperationOutcome::Expenses { expenses, .. } => {
                assert_eq!(expenses.len(), 1);
                assert_eq!(expenses[0].amount, 20.0);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }
}
