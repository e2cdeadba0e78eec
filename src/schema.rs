use crate::error::PnlError;
use crate::utils::last_day_of_month;
use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use schemars::gen::SchemaGenerator;
use schemars::schema::Schema;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier of a row in the statement template. Also the join key used by
/// mapping rules and overrides.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(transparent)]
pub struct LineNumber(pub u32);

impl fmt::Display for LineNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for LineNumber {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// A calendar month bucket, rendered as `YYYY-MM` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Period {
    year: i32,
    month: u32,
}

impl Period {
    pub fn new(year: i32, month: u32) -> Result<Self, PnlError> {
        if !(1..=12).contains(&month) {
            return Err(PnlError::DateError(format!(
                "Invalid month {} in period. Expected 1-12",
                month
            )));
        }
        Ok(Self { year, month })
    }

    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn first_day(&self) -> NaiveDate {
        // month is validated on construction, so day 1 always exists
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or(NaiveDate::MIN)
    }

    pub fn last_day(&self) -> NaiveDate {
        last_day_of_month(self.year, self.month)
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for Period {
    type Err = PnlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (year, month) = trimmed.split_once('-').ok_or_else(|| {
            PnlError::DateError(format!("Invalid period '{}'. Expected YYYY-MM", s))
        })?;

        if year.len() != 4 || month.len() != 2 {
            return Err(PnlError::DateError(format!(
                "Invalid period '{}'. Expected YYYY-MM",
                s
            )));
        }

        let year: i32 = year
            .parse()
            .map_err(|_| PnlError::DateError(format!("Invalid year in period '{}'", s)))?;
        let month: u32 = month
            .parse()
            .map_err(|_| PnlError::DateError(format!("Invalid month in period '{}'", s)))?;

        Period::new(year, month)
    }
}

impl TryFrom<String> for Period {
    type Error = PnlError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Period> for String {
    fn from(period: Period) -> Self {
        period.to_string()
    }
}

impl JsonSchema for Period {
    fn schema_name() -> String {
        "Period".to_string()
    }

    fn json_schema(gen: &mut SchemaGenerator) -> Schema {
        let mut schema = String::json_schema(gen).into_object();
        schema.string().pattern = Some(r"^\d{4}-\d{2}$".to_string());
        schema.metadata().description =
            Some("Calendar month in canonical YYYY-MM form".to_string());
        schema.into()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub enum Kind {
    #[schemars(description = "Inflows from sales and other income (positive amounts)")]
    Revenue,

    #[schemars(description = "Direct costs of delivering the product (cost of revenue)")]
    Cost,

    #[schemars(description = "Operating and non-operating expenses")]
    Expense,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Kind::Revenue => "Revenue",
            Kind::Cost => "Cost",
            Kind::Expense => "Expense",
        };
        f.write_str(label)
    }
}

impl FromStr for Kind {
    type Err = PnlError;

    /// Accepts the English labels and the Portuguese labels used by the
    /// accounting exports (`Receita`, `Custo`, `Despesa`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "revenue" | "receita" => Ok(Kind::Revenue),
            "cost" | "custo" => Ok(Kind::Cost),
            "expense" | "despesa" => Ok(Kind::Expense),
            other => Err(PnlError::ValidationError {
                rule: String::new(),
                details: format!(
                    "kind '{}' is not one of Revenue, Cost or Expense",
                    other
                ),
            }),
        }
    }
}

/// One raw financial movement. Never mutated once ingested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Transaction {
    #[schemars(description = "Opaque unique identifier")]
    pub id: String,

    #[schemars(description = "Accrual date in YYYY-MM-DD format")]
    pub date: NaiveDate,

    #[schemars(
        description = "Signed decimal amount in the base currency. Positive = inflow, negative = outflow."
    )]
    pub amount: Decimal,

    #[serde(default)]
    #[schemars(description = "Supplier or client name")]
    pub counterparty: String,

    #[serde(default)]
    #[schemars(description = "Cost center label, may be empty")]
    pub cost_center: String,

    #[serde(default)]
    #[schemars(description = "Financial grouping label, may be empty")]
    pub financial_group: String,
}

impl Transaction {
    pub fn new(id: impl Into<String>, date: NaiveDate, amount: Decimal) -> Self {
        Self {
            id: id.into(),
            date,
            amount,
            counterparty: String::new(),
            cost_center: String::new(),
            financial_group: String::new(),
        }
    }

    pub fn with_counterparty(mut self, counterparty: impl Into<String>) -> Self {
        self.counterparty = counterparty.into();
        self
    }

    pub fn with_cost_center(mut self, cost_center: impl Into<String>) -> Self {
        self.cost_center = cost_center.into();
        self
    }

    pub fn with_financial_group(mut self, financial_group: impl Into<String>) -> Self {
        self.financial_group = financial_group.into();
        self
    }

    pub fn period(&self) -> Period {
        Period::from_date(self.date)
    }
}

fn default_active() -> bool {
    true
}

/// A user-defined classification instruction. Empty predicates are wildcards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MappingRule {
    #[schemars(description = "Stable identifier used by remove/reorder")]
    pub id: String,

    #[serde(default)]
    #[schemars(description = "Financial group to match. Empty matches anything.")]
    pub financial_group: String,

    #[serde(default)]
    #[schemars(description = "Cost center to match. Empty matches anything.")]
    pub cost_center: String,

    #[serde(default)]
    #[schemars(description = "Counterparty to match. Empty matches anything.")]
    pub counterparty: String,

    #[schemars(description = "Target leaf line of the statement template")]
    pub pl_line: LineNumber,

    pub kind: Kind,

    #[serde(default = "default_active")]
    #[schemars(description = "Inactive rules are skipped during classification")]
    pub active: bool,

    #[serde(default)]
    #[schemars(description = "Free text, not used in matching")]
    pub notes: Option<String>,
}

impl MappingRule {
    pub fn new(id: impl Into<String>, pl_line: impl Into<LineNumber>, kind: Kind) -> Self {
        Self {
            id: id.into(),
            financial_group: String::new(),
            cost_center: String::new(),
            counterparty: String::new(),
            pl_line: pl_line.into(),
            kind,
            active: true,
            notes: None,
        }
    }

    pub fn with_financial_group(mut self, financial_group: impl Into<String>) -> Self {
        self.financial_group = financial_group.into();
        self
    }

    pub fn with_cost_center(mut self, cost_center: impl Into<String>) -> Self {
        self.cost_center = cost_center.into();
        self
    }

    pub fn with_counterparty(mut self, counterparty: impl Into<String>) -> Self {
        self.counterparty = counterparty.into();
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    pub fn is_catch_all(&self) -> bool {
        self.financial_group.trim().is_empty()
            && self.cost_center.trim().is_empty()
            && self.counterparty.trim().is_empty()
    }
}

/// A manual value that replaces the computed aggregate of one cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Override {
    pub pl_line: LineNumber,
    pub period: Period,
    #[schemars(description = "Absolute value replacing the computed cell")]
    pub value: Decimal,
}

impl Override {
    pub fn new(pl_line: impl Into<LineNumber>, period: Period, value: Decimal) -> Self {
        Self {
            pl_line: pl_line.into(),
            period,
            value,
        }
    }
}

/// Pretty-printed JSON Schema for any boundary type, for the persistence
/// collaborators.
pub fn schema_as_json<T: JsonSchema>() -> Result<String, serde_json::Error> {
    let schema = schemars::schema_for!(T);
    serde_json::to_string_pretty(&schema)
}
