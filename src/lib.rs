//! # P&L Statement Builder
//!
//! A library for turning raw transaction exports into an auditable,
//! month-bucketed Profit & Loss statement with derived KPIs.
//!
//! ## Core Concepts
//!
//! - **Mapping Rules**: Ordered classification instructions. The first active rule whose
//!   predicates all match a transaction decides its P&L line
//! - **Unclassified Bucket**: Transactions no rule matched. They stay in the statement as an
//!   expense line so totals always reconcile to the raw input
//! - **Period Matrix**: Exact decimal sums per line and calendar month, zero-filled
//! - **Overrides**: Manual values replacing single `(line, period)` cells, last write wins
//! - **Statement Template**: The ordered line layout. Totals, scaled lines and margins are
//!   recomputed on every build and never read from the matrix
//!
//! ## Example
//!
//! ```rust,ignore
//! use pnl_statement_builder::*;
//! use chrono::NaiveDate;
//! use rust_decimal_macros::dec;
//!
//! let transactions = vec![
//!     Transaction::new("t1", NaiveDate::from_ymd_opt(2024, 3, 15).unwrap(), dec!(1000))
//!         .with_counterparty("App Store (Apple)"),
//! ];
//! let rules = default_rules();
//! let overrides = vec![Override::new(11, "2024-03".parse().unwrap(), dec!(1500))];
//!
//! let engine = PnlEngine::standard();
//! let statement = engine.build_statement(&transactions, &rules, &overrides, None).unwrap();
//! let kpis = engine.compute_kpis(&statement, None);
//!
//! println!("{}", statement.to_markdown());
//! println!("EBITDA margin: {}", kpis.ebitda_margin);
//! ```

pub mod aggregator;
pub mod classifier;
pub mod dashboard;
pub mod engine;
pub mod error;
pub mod ingestion;
pub mod kpi;
pub mod overrides;
pub mod reconciliation;
pub mod rules;
pub mod schema;
pub mod statement;
pub mod template;
pub mod utils;
pub mod window;

pub use aggregator::{aggregate, within_window, PeriodMatrix, PeriodValues};
pub use classifier::{classify, ClassifiedLineItem, LineKey};
pub use dashboard::{DashboardData, MonthlySummary};
pub use engine::{EngineOptions, PnlEngine, PnlReport};
pub use error::{InvariantViolation, PnlError, Result};
pub use ingestion::{ingest_rows, parse_amount, parse_date, RawMappingRow, RawTransactionRow};
pub use kpi::{kpis_for_period, KpiSet};
pub use overrides::{apply_overrides, OverrideStore};
pub use reconciliation::{verify_conservation, ClassificationReport, ReconciliationWarning};
pub use rules::{default_rules, validate_active_rules, MappingRuleStore};
pub use schema::*;
pub use statement::{Statement, StatementBuilder, StatementLine, UNCLASSIFIED_LINE};
pub use template::{LineRole, StatementTemplate, TemplateLine};
pub use window::{resolve_window, resolve_window_at, DatePreset, DateSelection, DateWindow};

/// Builds the statement with the standard template and default options.
pub fn build_statement(
    transactions: &[Transaction],
    rules: &[MappingRule],
    overrides: &[Override],
    window: Option<&DateWindow>,
) -> Result<Statement> {
    PnlEngine::standard().build_statement(transactions, rules, overrides, window)
}

pub fn compute_kpis(statement: &Statement, window: Option<&DateWindow>) -> KpiSet {
    kpi::compute_kpis(statement, window)
}

/// Counts and sums what `rules` leave unclassified, over all transactions.
pub fn classification_report(
    transactions: &[Transaction],
    rules: &[MappingRule],
) -> ClassificationReport {
    reconciliation::classification_report(transactions, rules)
}
