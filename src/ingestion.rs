use crate::error::{PnlError, Result};
use crate::schema::{Kind, LineNumber, MappingRule, Transaction};
use chrono::NaiveDate;
use log::{debug, info};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Accrual date formats seen in accounting exports, tried in order. Day-first
/// wins over month-first for ambiguous dates like `03/04/2024`.
const DATE_FORMATS: [&str; 4] = ["%d/%m/%Y", "%Y-%m-%d", "%m/%d/%Y", "%d-%m-%Y"];

/// Counterparty label the exports use for "any supplier".
const ANY_COUNTERPARTY: &str = "Diversos";

/// One loosely-typed row of a transaction export.
///
/// Field names accept the export's own column headers, so a CSV reader can
/// deserialize straight into this type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawTransactionRow {
    #[serde(default)]
    pub id: Option<String>,

    #[serde(alias = "Data de competência")]
    pub date: String,

    #[serde(alias = "Valor (R$)")]
    pub amount: String,

    #[serde(default, alias = "Nome do fornecedor/cliente")]
    pub counterparty: String,

    #[serde(default, alias = "Centro de Custo 1")]
    pub cost_center: String,

    #[serde(default, alias = "Categoria 1", alias = "Grupo financeiro")]
    pub financial_group: String,
}

impl RawTransactionRow {
    /// Converts the row. `fallback_id` is used when the row carries no id.
    pub fn to_transaction(&self, fallback_id: &str) -> Result<Transaction> {
        let id = match self.id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => fallback_id.to_string(),
        };

        if self.date.trim().is_empty() {
            return Err(PnlError::MissingField(format!("date (row {})", id)));
        }
        if self.amount.trim().is_empty() {
            return Err(PnlError::MissingField(format!("amount (row {})", id)));
        }

        Ok(Transaction::new(id, parse_date(&self.date)?, parse_amount(&self.amount)?)
            .with_counterparty(self.counterparty.trim())
            .with_cost_center(self.cost_center.trim())
            .with_financial_group(self.financial_group.trim()))
    }
}

/// Converts a whole export. Rows without an id get `row-<n>`, 1-based.
/// The first malformed row aborts the import.
pub fn ingest_rows(rows: &[RawTransactionRow]) -> Result<Vec<Transaction>> {
    let transactions = rows
        .iter()
        .enumerate()
        .map(|(index, row)| row.to_transaction(&format!("row-{}", index + 1)))
        .collect::<Result<Vec<_>>>()?;

    info!("Ingested {} transactions", transactions.len());
    Ok(transactions)
}

/// Parses an export amount into an exact decimal.
///
/// Accepts Brazilian (`1.234,56`) and US (`1,234.56`) separators, an optional
/// `R$` prefix, a leading minus sign, and accounting parentheses for
/// negatives. Anything else is rejected rather than read as zero.
pub fn parse_amount(raw: &str) -> Result<Decimal> {
    let invalid = || PnlError::InvalidAmount(raw.to_string());

    let mut s = raw.trim().replace("R$", "");
    s = s.trim().to_string();

    let mut negative = false;
    if let Some(inner) = s.strip_prefix('(').and_then(|r| r.strip_suffix(')')) {
        negative = true;
        s = inner.trim().to_string();
    }
    if let Some(rest) = s.strip_prefix('-') {
        negative = !negative;
        s = rest.trim().replace("R$", "").trim().to_string();
    }

    if s.is_empty() {
        return Err(invalid());
    }

    let normalized = match (s.rfind(','), s.rfind('.')) {
        (Some(comma), Some(dot)) if comma > dot => s.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => s.replace(',', ""),
        (Some(_), None) => s.replace(',', "."),
        _ => s,
    };

    if !normalized.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return Err(invalid());
    }

    let value = Decimal::from_str(&normalized).map_err(|_| invalid())?;
    Ok(if negative { -value } else { value })
}

pub fn parse_date(raw: &str) -> Result<NaiveDate> {
    let trimmed = raw.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(trimmed, fmt).ok())
        .ok_or_else(|| {
            PnlError::DateError(format!(
                "Unrecognized date '{}'. Expected DD/MM/YYYY, YYYY-MM-DD, MM/DD/YYYY or DD-MM-YYYY",
                raw
            ))
        })
}

/// One loosely-typed mapping row as persisted by the mapping editor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawMappingRow {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, alias = "grupo_financeiro")]
    pub financial_group: String,
    #[serde(default, alias = "centro_custo")]
    pub cost_center: String,
    #[serde(default, alias = "fornecedor_cliente")]
    pub counterparty: String,
    #[serde(default, alias = "linha_pl")]
    pub pl_line: String,
    #[serde(default, alias = "tipo")]
    pub kind: String,
    #[serde(default, alias = "ativo")]
    pub active: String,
    #[serde(default, alias = "observacoes")]
    pub notes: Option<String>,
}

impl RawMappingRow {
    pub fn to_rule(&self) -> Result<MappingRule> {
        let id = self
            .id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| PnlError::MissingField("id".to_string()))?
            .to_string();

        let pl_line = self.pl_line.trim();
        if pl_line.is_empty() {
            return Err(PnlError::MissingField(format!("pl_line (rule {})", id)));
        }
        let pl_line: u32 = pl_line.parse().map_err(|_| PnlError::ValidationError {
            rule: id.clone(),
            details: format!("pl_line '{}' is not a line number", self.pl_line),
        })?;

        let kind = Kind::from_str(&self.kind).map_err(|e| match e {
            PnlError::ValidationError { details, .. } => PnlError::ValidationError {
                rule: id.clone(),
                details,
            },
            other => other,
        })?;

        let counterparty = self.counterparty.trim();
        let counterparty = if counterparty.eq_ignore_ascii_case(ANY_COUNTERPARTY) {
            ""
        } else {
            counterparty
        };

        let mut rule = MappingRule::new(id.clone(), LineNumber(pl_line), kind)
            .with_financial_group(self.financial_group.trim())
            .with_cost_center(self.cost_center.trim())
            .with_counterparty(counterparty);

        if let Some(notes) = self.notes.as_deref().filter(|n| !n.trim().is_empty()) {
            rule = rule.with_notes(notes.trim());
        }
        if !parse_active_flag(&self.active).map_err(|details| PnlError::ValidationError {
            rule: id.clone(),
            details,
        })? {
            rule = rule.inactive();
        }

        debug!("Parsed mapping row {} -> line {}", rule.id, rule.pl_line);
        Ok(rule)
    }
}

/// Empty means active, matching the rule default.
fn parse_active_flag(raw: &str) -> std::result::Result<bool, String> {
    match raw.trim().to_lowercase().as_str() {
        "" | "sim" | "s" | "true" | "yes" | "y" | "1" => Ok(true),
        "não" | "nao" | "n" | "false" | "no" | "0" => Ok(false),
        other => Err(format!("active flag '{}' is not a yes/no value", other)),
    }
}
