use std::str::FromStr;

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Arguments, Row, SqlitePool};

use crate::normalize;

#[derive(Debug, Clone, Serialize)]
pub struct Expense {
    pub id: i64,
    pub date: String,
    pub category: String,
    pub description: String,
    pub amount: f64,
    pub currency: String,
    pub base_amount: f64,
    pub base_currency: String,
}

#[derive(Debug, Clone)]
pub struct NewExpense {
    pub date: NaiveDate,
    pub category: String,
    pub description: String,
    pub amount: f64,
    pub currency: String,
    pub base_amount: f64,
    pub base_currency: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Budget {
    pub id: i64,
    pub category: String,
    pub period: String,
    pub limit: f64,
    pub currency: String,
}

#[derive(Debug, Clone, Default)]
pub struct ExpenseFilter {
    pub category: Option<String>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if missing) and bootstrap the schema. SQLite
    /// serialises writers anyway; a single pooled connection also keeps
    /// `sqlite::memory:` databases alive across calls.
    pub async fn open(database_url: &str) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS expenses (
                id INTEGER PRIMARY KEY,
                date TEXT NOT NULL,
                category TEXT NOT NULL,
                description TEXT NOT NULL,
                amount REAL NOT NULL,
                currency TEXT NOT NULL,
                base_amount REAL NOT NULL,
                base_currency TEXT NOT NULL,
                fingerprint TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_expense_fingerprint ON expenses(fingerprint)")
            .execute(&pool)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_expense_category_date ON expenses(category, date)",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS budgets (
                id INTEGER PRIMARY KEY,
                category TEXT NOT NULL,
                period TEXT NOT NULL,
                limit_amount REAL NOT NULL,
                currency TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(category, period)
            )",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS import_log (
                id INTEGER PRIMARY KEY,
                filename TEXT NOT NULL,
                accepted INTEGER NOT NULL,
                imported_at TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    pub async fn create_expense(&self, new: &NewExpense) -> Result<Expense, sqlx::Error> {
        let date = new.date.to_string();
        let fingerprint = normalize::fingerprint(new.date, new.amount, &new.description, &new.category);
        let created_at = Utc::now().to_rfc3339();

        let result = sqlx::query(
            "INSERT INTO expenses (
                date, category, description, amount, currency,
                base_amount, base_currency, fingerprint, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&date)
        .bind(&new.category)
        .bind(&new.description)
        .bind(new.amount)
        .bind(&new.currency)
        .bind(new.base_amount)
        .bind(&new.base_currency)
        .bind(&fingerprint)
        .bind(&created_at)
        .execute(&self.pool)
        .await?;

        Ok(Expense {
            id: result.last_insert_rowid(),
            date,
            category: new.category.clone(),
            description: new.description.clone(),
            amount: new.amount,
            currency: new.currency.clone(),
            base_amount: new.base_amount,
            base_currency: new.base_currency.clone(),
        })
    }

    pub async fn get_expense(&self, id: i64) -> Result<Option<Expense>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT id, date, category, description, amount, currency, base_amount, base_currency
             FROM expenses WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| expense_from_row(&r)))
    }

    /// Write back a fully resolved expense, recomputing its fingerprint.
    pub async fn update_expense(&self, expense: &Expense) -> Result<(), sqlx::Error> {
        let fingerprint = normalize::parse_flexible_date(&expense.date)
            .map(|d| normalize::fingerprint(d, expense.amount, &expense.description, &expense.category))
            .unwrap_or_default();

        sqlx::query(
            "UPDATE expenses
             SET date = ?, category = ?, description = ?, amount = ?, currency = ?,
                 base_amount = ?, base_currency = ?, fingerprint = ?
             WHERE id = ?",
        )
        .bind(&expense.date)
        .bind(&expense.category)
        .bind(&expense.description)
        .bind(expense.amount)
        .bind(&expense.currency)
        .bind(expense.base_amount)
        .bind(&expense.base_currency)
        .bind(&fingerprint)
        .bind(expense.id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn delete_expense(&self, id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM expenses WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn list_expenses(&self, filter: &ExpenseFilter) -> Result<Vec<Expense>, sqlx::Error> {
        let mut conditions: Vec<String> = Vec::new();
        let mut params: Vec<String> = Vec::new();

        if let Some(category) = &filter.category {
            conditions.push("category = ?".to_string());
            params.push(category.clone());
        }
        if let Some(from) = &filter.from {
            conditions.push("date >= ?".to_string());
            params.push(from.to_string());
        }
        if let Some(to) = &filter.to {
            conditions.push("date <= ?".to_string());
            params.push(to.to_string());
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let query = format!(
            "SELECT id, date, category, description, amount, currency, base_amount, base_currency
             FROM expenses {} ORDER BY date ASC, id ASC",
            where_clause
        );

        let mut args = SqliteArguments::default();
        for param in params {
            let _ = args.add(param);
        }
        let rows = sqlx::query_with(&query, args).fetch_all(&self.pool).await?;

        Ok(rows.iter().map(expense_from_row).collect())
    }

    pub async fn fingerprint_exists(&self, fingerprint: &str) -> Result<bool, sqlx::Error> {
        let row = sqlx::query("SELECT 1 FROM expenses WHERE fingerprint = ? LIMIT 1")
            .bind(fingerprint)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// One active budget per (category, period): insert or replace the
    /// limit in place.
    pub async fn upsert_budget(
        &self,
        category: &str,
        period: &str,
        limit: f64,
        currency: &str,
    ) -> Result<Budget, sqlx::Error> {
        let updated_at = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO budgets (category, period, limit_amount, currency, updated_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(category, period) DO UPDATE SET
                 limit_amount = excluded.limit_amount,
                 currency = excluded.currency,
                 updated_at = excluded.updated_at",
        )
        .bind(category)
        .bind(period)
        .bind(limit)
        .bind(currency)
        .bind(&updated_at)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query(
            "SELECT id, category, period, limit_amount, currency
             FROM budgets WHERE category = ? AND period = ?",
        )
        .bind(category)
        .bind(period)
        .fetch_one(&self.pool)
        .await?;

        Ok(budget_from_row(&row))
    }

    pub async fn get_budget(
        &self,
        category: &str,
        period: &str,
    ) -> Result<Option<Budget>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT id, category, period, limit_amount, currency
             FROM budgets WHERE category = ? AND period = ?",
        )
        .bind(category)
        .bind(period)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| budget_from_row(&r)))
    }

    pub async fn list_budgets(&self) -> Result<Vec<Budget>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT id, category, period, limit_amount, currency
             FROM budgets ORDER BY period DESC, category ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(budget_from_row).collect())
    }

    pub async fn distinct_categories(&self) -> Result<Vec<String>, sqlx::Error> {
        let rows = sqlx::query("SELECT DISTINCT category FROM expenses ORDER BY category ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|r| r.get::<String, _>("category")).collect())
    }

    pub async fn log_import(&self, filename: &str, accepted: usize) -> Result<(), sqlx::Error> {
        let imported_at = Utc::now().to_rfc3339();
        sqlx::query("INSERT INTO import_log (filename, accepted, imported_at) VALUES (?, ?, ?)")
            .bind(filename)
            .bind(accepted as i64)
            .bind(&imported_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn expense_from_row(row: &sqlx::sqlite::SqliteRow) -> Expense {
    Expense {
        id: row.get("id"),
        date: row.get("date"),
        category: row.get("category"),
        description: row.get("description"),
        amount: row.get("amount"),
        currency: row.get("currency"),
        base_amount: row.get("base_amount"),
        base_currency: row.get("base_currency"),
    }
}

fn budget_from_row(row: &sqlx::sqlite::SqliteRow) -> Budget {
    Budget {
        id: row.get("id"),
        category: row.get("category"),
        period: row.get("period"),
        limit: row.get("limit_amount"),
        currency: row.get("currency"),
    }
}
