use crate::aggregator::{aggregate, within_window};
use crate::classifier::{classify, LineKey};
use crate::dashboard::DashboardData;
use crate::error::Result;
use crate::kpi::{compute_kpis, KpiSet};
use crate::overrides::apply_overrides;
use crate::reconciliation::{verify_conservation, ClassificationReport};
use crate::rules::validate_active_rules;
use crate::schema::{MappingRule, Override, Transaction};
use crate::statement::{Statement, StatementBuilder, DEFAULT_EPSILON, UNCLASSIFIED_LINE};
use crate::template::StatementTemplate;
use crate::window::{resolve_window, DateSelection, DateWindow};
use log::{debug, info, warn};
use rust_decimal::Decimal;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

fn default_epsilon() -> Decimal {
    DEFAULT_EPSILON
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EngineOptions {
    /// Largest difference tolerated between an override on a derived line
    /// and its recomputed value before a warning is raised.
    #[serde(default = "default_epsilon")]
    pub reconciliation_epsilon: Decimal,

    #[serde(default = "default_true")]
    pub emit_unclassified_warning: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            reconciliation_epsilon: default_epsilon(),
            emit_unclassified_warning: true,
        }
    }
}

/// Statement plus the KPIs and window it was built for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PnlReport {
    pub window: Option<DateWindow>,
    pub statement: Statement,
    pub kpis: KpiSet,
}

/// The full pipeline from raw inputs to statement.
///
/// Holds no state besides its configuration. Every call recomputes from
/// the snapshot it is handed.
#[derive(Debug, Clone)]
pub struct PnlEngine {
    template: StatementTemplate,
    options: EngineOptions,
}

impl PnlEngine {
    pub fn new(template: StatementTemplate) -> Result<Self> {
        template.validate()?;
        Ok(Self {
            template,
            options: EngineOptions::default(),
        })
    }

    pub fn standard() -> Self {
        Self {
            template: StatementTemplate::standard(),
            options: EngineOptions::default(),
        }
    }

    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn template(&self) -> &StatementTemplate {
        &self.template
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn build_statement(
        &self,
        transactions: &[Transaction],
        rules: &[MappingRule],
        overrides: &[Override],
        window: Option<&DateWindow>,
    ) -> Result<Statement> {
        info!(
            "Building statement from {} transactions, {} rules and {} overrides",
            transactions.len(),
            rules.len(),
            overrides.len()
        );

        validate_active_rules(&self.template, rules)?;
        let items = classify(transactions, rules);
        let in_window = within_window(&items, window);
        let mut matrix = aggregate(&in_window, None);
        verify_conservation(&in_window, &matrix)?;

        let report = ClassificationReport::from_items(&in_window);
        let bucket = self.template.unclassified_line().unwrap_or(UNCLASSIFIED_LINE);
        matrix.merge_row(LineKey::Unclassified, LineKey::Line(bucket));

        let effective: Vec<Override> = overrides
            .iter()
            .filter(|o| window.map_or(true, |w| w.overlaps(o.period)))
            .cloned()
            .collect();
        if effective.len() < overrides.len() {
            debug!(
                "Ignoring {} overrides outside the window",
                overrides.len() - effective.len()
            );
        }
        let matrix = apply_overrides(&matrix, &effective)?;

        let mut statement = StatementBuilder::new(&self.template)
            .with_epsilon(self.options.reconciliation_epsilon)
            .with_window(window.copied())
            .build(&matrix)?;

        if self.options.emit_unclassified_warning {
            if let Some(warning) = report.warning() {
                warn!(
                    "{} transactions totalling {} matched no rule",
                    report.unclassified_count, report.unclassified_amount
                );
                statement.warnings.insert(0, warning);
            }
        }

        Ok(statement)
    }

    /// KPIs over the window `statement` was built for. See
    /// [`compute_kpis`] for how a different `window` is handled.
    pub fn compute_kpis(&self, statement: &Statement, window: Option<&DateWindow>) -> KpiSet {
        compute_kpis(statement, window)
    }

    /// Classification coverage of the transactions inside `window`.
    pub fn classification_report(
        &self,
        transactions: &[Transaction],
        rules: &[MappingRule],
        window: Option<&DateWindow>,
    ) -> ClassificationReport {
        let items = classify(transactions, rules);
        ClassificationReport::from_items(&within_window(&items, window))
    }

    /// Resolves `selection` against today and builds the statement and KPIs
    /// for it. The window is resolved again on every call.
    pub fn report(
        &self,
        transactions: &[Transaction],
        rules: &[MappingRule],
        overrides: &[Override],
        selection: &DateSelection,
    ) -> Result<PnlReport> {
        let window = resolve_window(selection)?;
        self.report_for_window(transactions, rules, overrides, window)
    }

    pub fn report_for_window(
        &self,
        transactions: &[Transaction],
        rules: &[MappingRule],
        overrides: &[Override],
        window: Option<DateWindow>,
    ) -> Result<PnlReport> {
        let statement = self.build_statement(transactions, rules, overrides, window.as_ref())?;
        let kpis = compute_kpis(&statement, None);
        Ok(PnlReport {
            window,
            statement,
            kpis,
        })
    }

    pub fn dashboard(
        &self,
        transactions: &[Transaction],
        rules: &[MappingRule],
        overrides: &[Override],
        window: Option<&DateWindow>,
    ) -> Result<DashboardData> {
        let statement = self.build_statement(transactions, rules, overrides, window)?;
        Ok(DashboardData::from_statement(&statement))
    }
}

impl Default for PnlEngine {
    fn default() -> Self {
        Self::standard()
    }
}
