use crate::aggregator::{PeriodMatrix, PeriodValues};
use crate::classifier::LineKey;
use crate::error::{InvariantViolation, Result};
use crate::reconciliation::ReconciliationWarning;
use crate::schema::{Kind, LineNumber, Period};
use crate::template::{LineRole, StatementTemplate, TemplateLine};
use crate::window::DateWindow;
use log::{debug, warn};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Line number of the synthetic unclassified row, used when the template
/// declares no unclassified line of its own.
pub const UNCLASSIFIED_LINE: LineNumber = LineNumber(u32::MAX);

pub const DEFAULT_EPSILON: Decimal = dec!(0.005);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StatementLine {
    pub line_number: LineNumber,
    pub description: String,
    pub is_header: bool,
    pub is_total: bool,
    /// Raw ratio (0.25 = 25%); formatted as a percentage only when rendered.
    pub is_percent: bool,
    pub indent_level: u8,
    pub kind: Option<Kind>,
    pub non_operating: bool,
    /// Empty for headers.
    pub values_by_period: BTreeMap<Period, Decimal>,
}

impl StatementLine {
    pub fn value(&self, period: Period) -> Decimal {
        self.values_by_period
            .get(&period)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    pub fn total(&self) -> Decimal {
        self.values_by_period.values().copied().sum()
    }

    /// Rows that feed the KPI formulas directly: tagged with a kind and
    /// neither a total nor a ratio.
    pub fn is_base_line(&self) -> bool {
        self.kind.is_some() && !self.is_total && !self.is_percent && !self.is_header
    }

    pub fn format_value(&self, value: Decimal) -> String {
        if self.is_percent {
            format!("{:.1}%", value * Decimal::ONE_HUNDRED)
        } else {
            format!("{:.2}", value)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Statement {
    pub headers: Vec<Period>,
    pub rows: Vec<StatementLine>,
    #[serde(default)]
    pub warnings: Vec<ReconciliationWarning>,
    /// Window the transactions were filtered to before aggregation. `None`
    /// means the full history.
    #[serde(default)]
    pub window: Option<DateWindow>,
}

impl Statement {
    pub fn row(&self, line: LineNumber) -> Option<&StatementLine> {
        self.rows.iter().find(|r| r.line_number == line)
    }

    pub fn value(&self, line: LineNumber, period: Period) -> Option<Decimal> {
        self.row(line)
            .and_then(|r| r.values_by_period.get(&period))
            .copied()
    }

    pub fn to_markdown(&self) -> String {
        let mut output = String::new();

        output.push_str("| Line | Description |");
        for period in &self.headers {
            output.push_str(&format!(" {} |", period));
        }
        output.push('\n');
        output.push_str("|---|---|");
        for _ in &self.headers {
            output.push_str("---:|");
        }
        output.push('\n');

        for row in &self.rows {
            let indent = "&nbsp;&nbsp;".repeat(row.indent_level as usize);
            let description = if row.is_header || row.is_total {
                format!("**{}**", row.description)
            } else {
                row.description.clone()
            };
            output.push_str(&format!("| {} | {}{} |", row.line_number, indent, description));

            for period in &self.headers {
                if row.is_header {
                    output.push_str(" |");
                } else {
                    output.push_str(&format!(" {} |", row.format_value(row.value(*period))));
                }
            }
            output.push('\n');
        }

        output
    }

    pub fn to_csv(&self) -> String {
        let mut output = String::from("Line,Description");
        for period in &self.headers {
            output.push_str(&format!(",{}", period));
        }
        output.push('\n');

        for row in &self.rows {
            output.push_str(&format!(
                "{},\"{}\"",
                row.line_number,
                row.description.replace('"', "\"\"")
            ));
            for period in &self.headers {
                if row.is_header {
                    output.push(',');
                } else {
                    output.push_str(&format!(",{}", row.format_value(row.value(*period))));
                }
            }
            output.push('\n');
        }

        output
    }
}

/// Assembles the ordered statement from a (possibly overridden) matrix.
///
/// Derived lines are recomputed on every build and never read from the
/// matrix. An override on a derived line only produces a warning when it
/// disagrees with the recomputed value by more than `epsilon`.
pub struct StatementBuilder<'a> {
    template: &'a StatementTemplate,
    epsilon: Decimal,
    window: Option<DateWindow>,
}

struct Resolver<'a> {
    template: &'a StatementTemplate,
    matrix: &'a PeriodMatrix,
    unclassified_line: Option<LineNumber>,
    resolved: BTreeMap<LineNumber, PeriodValues>,
}

impl<'a> StatementBuilder<'a> {
    pub fn new(template: &'a StatementTemplate) -> Self {
        Self {
            template,
            epsilon: DEFAULT_EPSILON,
            window: None,
        }
    }

    pub fn with_epsilon(mut self, epsilon: Decimal) -> Self {
        self.epsilon = epsilon.abs();
        self
    }

    /// Records the window the matrix was aggregated over.
    pub fn with_window(mut self, window: Option<DateWindow>) -> Self {
        self.window = window;
        self
    }

    pub fn build(&self, matrix: &PeriodMatrix) -> Result<Statement> {
        self.template.validate()?;
        self.check_matrix_lines(matrix)?;

        let mut resolver = Resolver {
            template: self.template,
            matrix,
            unclassified_line: self.template.unclassified_line(),
            resolved: BTreeMap::new(),
        };

        let mut rows = Vec::with_capacity(self.template.lines().len() + 1);
        for line in self.template.lines() {
            let values = match line.role {
                LineRole::Header => BTreeMap::new(),
                _ => resolver.resolve(line.line_number)?,
            };
            rows.push(statement_line(line, values));
        }

        if self.template.unclassified_line().is_none() {
            let synthetic = self.synthetic_unclassified_row(matrix);
            if let Some(row) = synthetic {
                rows.push(row);
            }
        }

        let warnings = self.override_divergences(matrix, &resolver);
        for warning in &warnings {
            warn!("Reconciliation warning: {:?}", warning);
        }

        debug!(
            "Built statement with {} rows over {} periods",
            rows.len(),
            matrix.periods().len()
        );

        Ok(Statement {
            headers: matrix.periods().iter().copied().collect(),
            rows,
            warnings,
            window: self.window,
        })
    }

    /// Every matrix row must land on a valued template line. Rows for derived
    /// lines are only acceptable when they carry nothing but overrides, and
    /// header rows are never acceptable.
    fn check_matrix_lines(&self, matrix: &PeriodMatrix) -> Result<()> {
        for key in matrix.lines() {
            let line = match key {
                LineKey::Unclassified => continue,
                LineKey::Line(line) if *line == UNCLASSIFIED_LINE => continue,
                LineKey::Line(line) => *line,
            };

            let template_line =
                self.template
                    .get(line)
                    .ok_or_else(|| InvariantViolation::UnknownLine {
                        line,
                        context: "not declared in the statement template".to_string(),
                    })?;

            let fed_directly = matrix.row(*key).map_or(false, |row| {
                row.iter()
                    .any(|(period, value)| !value.is_zero() && !matrix.is_overridden(*key, *period))
            });

            match &template_line.role {
                LineRole::Header => {
                    let overridden = matrix
                        .periods()
                        .iter()
                        .any(|p| matrix.is_overridden(*key, *p));
                    if overridden && !fed_directly {
                        return Err(InvariantViolation::OverrideOnHeader { line }.into());
                    }
                    return Err(InvariantViolation::UnknownLine {
                        line,
                        context: "headers cannot receive classified amounts".to_string(),
                    }
                    .into());
                }
                role if role.is_computed() && fed_directly => {
                    return Err(InvariantViolation::UnknownLine {
                        line,
                        context: "derived lines cannot receive classified amounts".to_string(),
                    }
                    .into());
                }
                _ => {}
            }
        }

        Ok(())
    }

    fn synthetic_unclassified_row(&self, matrix: &PeriodMatrix) -> Option<StatementLine> {
        let sentinel = matrix.row(LineKey::Unclassified);
        let merged = matrix.row(LineKey::Line(UNCLASSIFIED_LINE));
        if sentinel.is_none() && merged.is_none() {
            return None;
        }

        let values = matrix
            .periods()
            .iter()
            .map(|p| {
                let value = matrix.cell(LineKey::Unclassified, *p)
                    + matrix.cell(LineKey::Line(UNCLASSIFIED_LINE), *p);
                (*p, value)
            })
            .collect();

        Some(StatementLine {
            line_number: UNCLASSIFIED_LINE,
            description: "Unclassified".to_string(),
            is_header: false,
            is_total: false,
            is_percent: false,
            indent_level: 1,
            kind: Some(Kind::Expense),
            non_operating: false,
            values_by_period: values,
        })
    }

    fn override_divergences(
        &self,
        matrix: &PeriodMatrix,
        resolver: &Resolver<'_>,
    ) -> Vec<ReconciliationWarning> {
        let mut warnings = Vec::new();

        for (key, period) in matrix.overridden_cells() {
            let LineKey::Line(line) = key else { continue };
            let is_derived = self
                .template
                .get(*line)
                .map_or(false, |l| l.role.is_computed());
            if !is_derived {
                continue;
            }

            let override_value = matrix.cell(*key, *period);
            let computed = resolver
                .resolved
                .get(line)
                .and_then(|values| values.get(period))
                .copied()
                .unwrap_or(Decimal::ZERO);

            if (override_value - computed).abs() > self.epsilon {
                warnings.push(ReconciliationWarning::OverrideDivergence {
                    line: *line,
                    period: *period,
                    override_value,
                    computed,
                });
            }
        }

        warnings
    }
}

impl Resolver<'_> {
    fn resolve(&mut self, line: LineNumber) -> Result<PeriodValues> {
        if let Some(values) = self.resolved.get(&line) {
            return Ok(values.clone());
        }

        let template = self.template;
        let template_line = template
            .get(line)
            .ok_or_else(|| InvariantViolation::UnknownLine {
                line,
                context: "referenced while resolving derived lines".to_string(),
            })?;

        let periods: Vec<Period> = self.matrix.periods().iter().copied().collect();
        let values: PeriodValues = match &template_line.role {
            LineRole::Header => periods.iter().map(|p| (*p, Decimal::ZERO)).collect(),
            LineRole::Leaf { .. } => periods
                .iter()
                .map(|p| (*p, self.matrix.cell(LineKey::Line(line), *p)))
                .collect(),
            LineRole::Unclassified => {
                // a matrix that never went through the pipeline may still hold the sentinel row
                periods
                    .iter()
                    .map(|p| {
                        let mut value = self.matrix.cell(LineKey::Line(line), *p);
                        if Some(line) == self.unclassified_line {
                            value += self.matrix.cell(LineKey::Unclassified, *p);
                        }
                        (*p, value)
                    })
                    .collect()
            }
            LineRole::Total { children } => {
                let mut sums: PeriodValues = periods.iter().map(|p| (*p, Decimal::ZERO)).collect();
                for child in children {
                    let child_values = self.resolve(*child)?;
                    for (period, value) in child_values {
                        *sums.entry(period).or_insert(Decimal::ZERO) += value;
                    }
                }
                sums
            }
            LineRole::Scaled { source, factor, .. } => {
                let source_values = self.resolve(*source)?;
                source_values
                    .into_iter()
                    .map(|(period, value)| (period, value * *factor))
                    .collect()
            }
            LineRole::Ratio {
                numerator,
                denominator,
            } => {
                let numerators = self.resolve(*numerator)?;
                let denominators = self.resolve(*denominator)?;
                periods
                    .iter()
                    .map(|p| {
                        let num = numerators.get(p).copied().unwrap_or(Decimal::ZERO);
                        let den = denominators.get(p).copied().unwrap_or(Decimal::ZERO);
                        (*p, safe_ratio(num, den))
                    })
                    .collect()
            }
        };

        self.resolved.insert(line, values.clone());
        Ok(values)
    }
}

/// `numerator / denominator`, or zero when the denominator is zero.
pub fn safe_ratio(numerator: Decimal, denominator: Decimal) -> Decimal {
    if denominator.is_zero() {
        return Decimal::ZERO;
    }
    numerator.checked_div(denominator).unwrap_or(Decimal::ZERO)
}

fn statement_line(line: &TemplateLine, values: PeriodValues) -> StatementLine {
    let (non_operating, is_total, is_percent) = match &line.role {
        LineRole::Leaf { non_operating, .. } => (*non_operating, false, false),
        LineRole::Total { .. } => (false, true, false),
        LineRole::Ratio { .. } => (false, false, true),
        _ => (false, false, false),
    };

    StatementLine {
        line_number: line.line_number,
        description: line.description.clone(),
        is_header: line.role == LineRole::Header,
        is_total,
        is_percent,
        indent_level: line.indent_level,
        kind: line.role.kind(),
        non_operating,
        values_by_period: values,
    }
}

/// Builds with the default reconciliation epsilon.
pub fn build(matrix: &PeriodMatrix, template: &StatementTemplate) -> Result<Statement> {
    StatementBuilder::new(template).build(matrix)
}
