use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::ai::interpreter::{Interpreter, Operation, ParseFailure};
use crate::categories::CategoryVocabulary;
use crate::currency::{Conversion, RateCache};
use crate::db::Database;
use crate::executor::{ExecuteError, OperationExecutor, OperationOutcome};
use crate::ingest::{self, ImportError, ImportOptions, ImportSummary};
use crate::normalize;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub vocabulary: Arc<CategoryVocabulary>,
    pub rates: Arc<RateCache>,
    pub interpreter: Arc<Interpreter>,
    pub executor: Arc<OperationExecutor>,
    pub import_options: ImportOptions,
}

/// Machine-readable failure payload for the presentation layer.
#[derive(Serialize)]
pub struct ErrorBody {
    pub kind: &'static str,
    pub message: String,
}

type ApiError = (StatusCode, Json<ErrorBody>);

fn api_error(status: StatusCode, kind: &'static str, message: String) -> ApiError {
    (status, Json(ErrorBody { kind, message }))
}

fn parse_failure_response(failure: ParseFailure) -> ApiError {
    api_error(
        StatusCode::UNPROCESSABLE_ENTITY,
        "parse_failure",
        failure.to_string(),
    )
}

fn execute_error_response(err: ExecuteError) -> ApiError {
    match err {
        ExecuteError::NotFound { .. } => {
            api_error(StatusCode::NOT_FOUND, "not_found", err.to_string())
        }
        ExecuteError::InvalidAmount(_) => {
            api_error(StatusCode::UNPROCESSABLE_ENTITY, "invalid_amount", err.to_string())
        }
        ExecuteError::InvalidPeriod(_) => {
            api_error(StatusCode::UNPROCESSABLE_ENTITY, "invalid_period", err.to_string())
        }
        ExecuteError::Rate(_) => {
            api_error(StatusCode::SERVICE_UNAVAILABLE, "rate_unavailable", err.to_string())
        }
        ExecuteError::Storage(inner) => {
            error!(error = %inner, "storage failure");
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "storage_error",
                "storage failure".to_string(),
            )
        }
    }
}

fn import_error_response(err: ImportError) -> ApiError {
    match err {
        ImportError::Schema(_) => {
            api_error(StatusCode::UNPROCESSABLE_ENTITY, "schema_error", err.to_string())
        }
        ImportError::UnknownFormat(_) | ImportError::Pdf(_) => {
            api_error(StatusCode::UNPROCESSABLE_ENTITY, "import_error", err.to_string())
        }
        ImportError::Io(_) => api_error(StatusCode::BAD_REQUEST, "import_error", err.to_string()),
        ImportError::Storage(inner) => {
            error!(error = %inner, "storage failure during import");
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "storage_error",
                "storage failure".to_string(),
            )
        }
    }
}

#[derive(Deserialize)]
pub struct CommandRequest {
    pub text: String,
}

async fn command(
    State(state): State<AppState>,
    Json(req): Json<CommandRequest>,
) -> Result<Json<OperationOutcome>, ApiError> {
    info!(text = %req.text, "command received");
    let operation = state
        .interpreter
        .interpret(&req.text)
        .await
        .map_err(parse_failure_response)?;
    let outcome = state
        .executor
        .execute(operation)
        .await
        .map_err(execute_error_response)?;
    Ok(Json(outcome))
}

#[derive(Deserialize)]
pub struct ImportRequest {
    pub path: PathBuf,
}

async fn import(
    State(state): State<AppState>,
    Json(req): Json<ImportRequest>,
) -> Result<Json<ImportSummary>, ApiError> {
    info!(path = %req.path.display(), "import requested");
    let summary = ingest::import_file(
        &state.db,
        &state.vocabulary,
        &state.rates,
        &req.path,
        &state.import_options,
    )
    .await
    .map_err(import_error_response)?;
    Ok(Json(summary))
}

#[derive(Deserialize)]
pub struct ConvertRequest {
    pub amount: f64,
    pub from: String,
    pub to: String,
}

async fn convert(
    State(state): State<AppState>,
    Json(req): Json<ConvertRequest>,
) -> Result<Json<Conversion>, ApiError> {
    let conversion = state
        .rates
        .convert(req.amount, &req.from, &req.to)
        .await
        .map_err(|err| {
            api_error(StatusCode::SERVICE_UNAVAILABLE, "rate_unavailable", err.to_string())
        })?;
    Ok(Json(conversion))
}

/// Manual form entry; funnels through the same executor as chat commands.
#[derive(Deserialize)]
pub struct CreateExpenseRequest {
    pub amount: f64,
    pub currency: Option<String>,
    pub category: String,
    pub description: Option<String>,
    pub date: Option<String>,
}

async fn create_expense(
    State(state): State<AppState>,
    Json(req): Json<CreateExpenseRequest>,
) -> Result<Json<OperationOutcome>, ApiError> {
    let date = req
        .date
        .as_deref()
        .map(|s| {
            normalize::parse_flexible_date(s).ok_or_else(|| {
                api_error(
                    StatusCode::UNPROCESSABLE_ENTITY,
                    "invalid_date",
                    format!("unparseable date '{}'", s),
                )
            })
        })
        .transpose()?;

    let operation = Operation::CreateExpense {
        amount: req.amount,
        currency: req
            .currency
            .map(|c| c.to_uppercase())
            .unwrap_or_else(|| state.import_options.default_currency.clone()),
        category: state.vocabulary.resolve(&req.category).name,
        description: req.description.unwrap_or_default(),
        date,
    };

    let outcome = state
        .executor
        .execute(operation)
        .await
        .map_err(execute_error_response)?;
    Ok(Json(outcome))
}

#[derive(Deserialize)]
pub struct ListExpensesQuery {
    pub category: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
}

async fn list_expenses(
    State(state): State<AppState>,
    Query(query): Query<ListExpensesQuery>,
) -> Result<Json<OperationOutcome>, ApiError> {
    let parse = |s: &str| {
        normalize::parse_flexible_date(s).ok_or_else(|| {
            api_error(
                StatusCode::UNPROCESSABLE_ENTITY,
                "invalid_date",
                format!("unparseable date '{}'", s),
            )
        })
    };
    let date_range = match (query.from.as_deref(), query.to.as_deref()) {
        (None, None) => None,
        (from, to) => {
            let from = from.map(parse).transpose()?.unwrap_or(chrono::NaiveDate::MIN);
            let to = to.map(parse).transpose()?.unwrap_or(chrono::NaiveDate::MAX);
            Some((from, to))
        }
    };

    let outcome = state
        .executor
        .execute(Operation::QueryExpenses {
            category: query.category,
            date_range,
        })
        .await
        .map_err(execute_error_response)?;
    Ok(Json(outcome))
}

#[derive(Deserialize)]
pub struct BudgetRequest {
    pub category: String,
    pub period: String,
    pub limit: f64,
}

async fn put_budget(
    State(state): State<AppState>,
    Json(req): Json<BudgetRequest>,
) -> Result<Json<OperationOutcome>, ApiError> {
    let outcome = state
        .executor
        .execute(Operation::CreateOrUpdateBudget {
            category: state.vocabulary.resolve(&req.category).name,
            limit: req.limit,
            period: req.period,
        })
        .await
        .map_err(execute_error_response)?;
    Ok(Json(outcome))
}

async fn health() -> StatusCode {
    StatusCode::OK
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/command", post(command))
        .route("/api/import", post(import))
        .route("/api/convert", post(convert))
        .route("/api/expenses", post(create_expense).get(list_expenses))
        .route("/api/budgets", put(put_budget))
        .with_state(state)
}
