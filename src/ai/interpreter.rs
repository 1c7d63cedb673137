use std::fmt;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::ai::llm::{ContentBlock, LlmError, LlmProvider, Message, ToolCall, ToolDefinition};
use crate::categories::CategoryVocabulary;
use crate::normalize;

/// A structured intent derived from a user command. Closed set: anything
/// the model returns outside these shapes is a parse failure, never a
/// partially populated operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    CreateExpense {
        amount: f64,
        currency: String,
        category: String,
        description: String,
        date: Option<NaiveDate>,
    },
    QueryExpenses {
        category: Option<String>,
        date_range: Option<(NaiveDate, NaiveDate)>,
    },
    DeleteExpense {
        id: i64,
    },
    UpdateExpense {
        id: i64,
        fields: ExpenseUpdate,
    },
    CreateOrUpdateBudget {
        category: String,
        limit: f64,
        period: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExpenseUpdate {
    pub amount: Option<f64>,
    pub currency: Option<String>,
    pub category: Option<String>,
    pub description: Option<String>,
    pub date: Option<NaiveDate>,
}

impl ExpenseUpdate {
    pub fn is_empty(&self) -> bool {
        self.amount.is_none()
            && self.currency.is_none()
            && self.category.is_none()
            && self.description.is_none()
            && self.date.is_none()
    }
}

/// The command could not be translated into an operation. Recoverable:
/// the reason is surfaced to the user with a suggestion to rephrase.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseFailure {
    pub reason: String,
}

impl ParseFailure {
    fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ParseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "could not interpret command: {}", self.reason)
    }
}

// Tool inputs the model is allowed to produce. deny_unknown_fields keeps
// the trust boundary strict: an extra field is a parse failure, not
// something to quietly ignore.

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RecordExpenseInput {
    amount: serde_json::Value,
    currency: Option<String>,
    category: String,
    description: Option<String>,
    date: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct QueryExpensesInput {
    category: Option<String>,
    from: Option<String>,
    to: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DeleteExpenseInput {
    id: i64,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct UpdateExpenseInput {
    id: i64,
    amount: Option<serde_json::Value>,
    currency: Option<String>,
    category: Option<String>,
    description: Option<String>,
    date: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SetBudgetInput {
    category: String,
    limit: serde_json::Value,
    period: String,
}

pub fn operation_tools() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: "record_expense".to_string(),
            description: "Record a new expense.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "amount": { "type": ["number", "string"], "description": "Amount, optionally with a currency symbol or code" },
                    "currency": { "type": "string", "description": "ISO currency code if stated" },
                    "category": { "type": "string" },
                    "description": { "type": "string" },
                    "date": { "type": "string", "description": "YYYY-MM-DD; omit when the user names no date" }
                },
                "required": ["amount", "category"],
                "additionalProperties": false
            }),
        },
        ToolDefinition {
            name: "query_expenses".to_string(),
            description: "Query recorded expenses, optionally by category and date range.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "category": { "type": "string" },
                    "from": { "type": "string", "description": "YYYY-MM-DD" },
                    "to": { "type": "string", "description": "YYYY-MM-DD" }
                },
                "additionalProperties": false
            }),
        },
        ToolDefinition {
            name: "delete_expense".to_string(),
            description: "Delete an expense by its id.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "id": { "type": "integer" }
                },
                "required": ["id"],
                "additionalProperties": false
            }),
        },
        ToolDefinition {
            name: "update_expense".to_string(),
            description: "Update fields of an existing expense by its id.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "id": { "type": "integer" },
                    "amount": { "type": ["number", "string"] },
                    "currency": { "type": "string" },
                    "category": { "type": "string" },
                    "description": { "type": "string" },
                    "date": { "type": "string" }
                },
                "required": ["id"],
                "additionalProperties": false
            }),
        },
        ToolDefinition {
            name: "set_budget".to_string(),
            description: "Create or replace the spending limit for a category and month.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "category": { "type": "string" },
                    "limit": { "type": ["number", "string"] },
                    "period": { "type": "string", "description": "Month as YYYY-MM" }
                },
                "required": ["category", "limit", "period"],
                "additionalProperties": false
            }),
        },
    ]
}

/// Translates free-text commands into validated operations. Pure
/// translation: talks to the language model, never to the repository.
pub struct Interpreter {
    llm: LlmProvider,
    vocabulary: Arc<CategoryVocabulary>,
    home_currency: String,
}

impl Interpreter {
    pub fn new(llm: LlmProvider, vocabulary: Arc<CategoryVocabulary>, home_currency: &str) -> Self {
        Self {
            llm,
            vocabulary,
            home_currency: home_currency.to_uppercase(),
        }
    }

    pub async fn interpret(&self, command_text: &str) -> Result<Operation, ParseFailure> {
        let system = self.system_prompt();
        let messages = vec![Message::user(command_text)];

        let completion = self
            .llm
            .complete(&system, &messages, &operation_tools())
            .await
            .map_err(|err| match err {
                LlmError::Timeout => ParseFailure::new("timeout"),
                other => ParseFailure::new(format!("language model unavailable: {}", other)),
            })?;

        let tool_call = completion.content.iter().find_map(|block| match block {
            ContentBlock::ToolUse(call) => Some(call),
            _ => None,
        });

        match tool_call {
            Some(call) => {
                debug!(tool = %call.name, input = %call.input, "model tool call");
                self.operation_from_call(call)
            }
            None => Err(ParseFailure::new(
                "no expense operation recognised; try rephrasing the command",
            )),
        }
    }

    fn system_prompt(&self) -> String {
        format!(
            "You are the command parser of an expense tracker. Translate the \
             user's message into exactly one tool call; never answer in prose. \
             Known categories:\n{}\nReuse a known category when one fits, \
             otherwise pass the user's wording through. Dates are YYYY-MM-DD; \
             omit the date field when the user names none. Amounts may carry a \
             currency symbol or ISO code; pass them through unchanged.",
            self.vocabulary.schema_for_prompt()
        )
    }

    /// Validate a model tool call against the closed operation set.
    pub fn operation_from_call(&self, call: &ToolCall) -> Result<Operation, ParseFailure> {
        match call.name.as_str() {
            "record_expense" => {
                let input: RecordExpenseInput = typed_input(&call.input)?;
                let (amount, inline_currency) = self.amount_field(&input.amount)?;
                let currency = self.currency_field(input.currency.as_deref(), inline_currency)?;
                let category = self.vocabulary.resolve(&input.category).name;
                let date = input.date.as_deref().map(date_field).transpose()?;
                Ok(Operation::CreateExpense {
                    amount,
                    currency,
                    category,
                    description: input.description.unwrap_or_default(),
                    date,
                })
            }
            "query_expenses" => {
                let input: QueryExpensesInput = typed_input(&call.input)?;
                let category = input
                    .category
                    .as_deref()
                    .map(|c| self.vocabulary.resolve(c).name);
                let date_range = match (input.from.as_deref(), input.to.as_deref()) {
                    (Some(from), Some(to)) => Some((date_field(from)?, date_field(to)?)),
                    (Some(from), None) => {
                        let from = date_field(from)?;
                        Some((from, NaiveDate::MAX))
                    }
                    (None, Some(to)) => Some((NaiveDate::MIN, date_field(to)?)),
                    (None, None) => None,
                };
                Ok(Operation::QueryExpenses {
                    category,
                    date_range,
                })
            }
            "delete_expense" => {
                let input: DeleteExpenseInput = typed_input(&call.input)?;
                Ok(Operation::DeleteExpense { id: input.id })
            }
            "update_expense" => {
                let input: UpdateExpenseInput = typed_input(&call.input)?;
                let (amount, inline_currency) = match &input.amount {
                    Some(value) => {
                        let (amount, inline) = self.amount_field(value)?;
                        (Some(amount), inline)
                    }
                    None => (None, None),
                };
                let currency = match (input.currency.as_deref(), inline_currency) {
                    (None, None) => None,
                    (explicit, inline) => Some(self.currency_field(explicit, inline)?),
                };
                let fields = ExpenseUpdate {
                    amount,
                    currency,
                    category: input
                        .category
                        .as_deref()
                        .map(|c| self.vocabulary.resolve(c).name),
                    description: input.description,
                    date: input.date.as_deref().map(date_field).transpose()?,
                };
                if fields.is_empty() {
                    return Err(ParseFailure::new("update names no fields to change"));
                }
                Ok(Operation::UpdateExpense {
                    id: input.id,
                    fields,
                })
            }
            "set_budget" => {
                let input: SetBudgetInput = typed_input(&call.input)?;
                let (limit, _) = self.amount_field(&input.limit)?;
                let period = period_field(&input.period)?;
                Ok(Operation::CreateOrUpdateBudget {
                    category: self.vocabulary.resolve(&input.category).name,
                    limit,
                    period,
                })
            }
            unknown => Err(ParseFailure::new(format!(
                "unknown operation tag '{}'",
                unknown
            ))),
        }
    }

    /// Amounts arrive as a JSON number or as a string that may carry a
    /// currency symbol or code.
    fn amount_field(
        &self,
        value: &serde_json::Value,
    ) -> Result<(f64, Option<String>), ParseFailure> {
        match value {
            serde_json::Value::Number(n) => {
                let amount = n
                    .as_f64()
                    .filter(|v| v.is_finite())
                    .ok_or_else(|| ParseFailure::new("amount is not a finite number"))?;
                Ok((amount, None))
            }
            serde_json::Value::String(s) => normalize::parse_money(s)
                .ok_or_else(|| ParseFailure::new(format!("unparseable amount '{}'", s))),
            other => Err(ParseFailure::new(format!(
                "amount has the wrong type: {}",
                other
            ))),
        }
    }

    fn currency_field(
        &self,
        explicit: Option<&str>,
        inline: Option<String>,
    ) -> Result<String, ParseFailure> {
        let named = explicit
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());
        match named {
            Some(code) => {
                if let Some(mapped) = normalize::currency_for_symbol(&code) {
                    return Ok(mapped.to_string());
                }
                let upper = code.to_uppercase();
                if upper.len() == 3 && upper.chars().all(|c| c.is_ascii_alphabetic()) {
                    Ok(upper)
                } else {
                    Err(ParseFailure::new(format!("unrecognised currency '{}'", code)))
                }
            }
            None => Ok(inline.unwrap_or_else(|| self.home_currency.clone())),
        }
    }
}

fn typed_input<'a, T: Deserialize<'a>>(input: &'a serde_json::Value) -> Result<T, ParseFailure> {
    T::deserialize(input).map_err(|err| ParseFailure::new(format!("malformed operation: {}", err)))
}

fn date_field(s: &str) -> Result<NaiveDate, ParseFailure> {
    normalize::parse_flexible_date(s)
        .ok_or_else(|| ParseFailure::new(format!("unparseable date '{}'", s)))
}

fn period_field(s: &str) -> Result<String, ParseFailure> {
    let trimmed = s.trim();
    let valid = match trimmed.split_once('-') {
        Some((year, month)) => {
            year.len() == 4
                && year.chars().all(|c| c.is_ascii_digit())
                && month.len() == 2
                && matches!(month.parse::<u32>(), Ok(1..=12))
        }
        None => false,
    };
    if valid {
        Ok(trimmed.to_string())
    } else {
        Err(ParseFailure::new(format!(
            "period must be YYYY-MM, got '{}'",
            s
        )))
    }
}
