use crate::error::{InvariantViolation, PnlError, Result};
use crate::schema::{Kind, LineNumber};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// How a template line gets its value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum LineRole {
    /// Display-only grouping row. Never carries a value.
    Header,

    /// Fed directly by the period matrix (i.e. by mapping rules).
    Leaf {
        kind: Kind,
        #[serde(default)]
        #[schemars(description = "Excluded from operating expenses when computing EBITDA")]
        non_operating: bool,
    },

    /// Receives every transaction no active rule matched.
    Unclassified,

    /// Sum of the declared child lines, recomputed on every build.
    Total { children: Vec<LineNumber> },

    /// A fixed multiple of another line, e.g. a processing fee charged as a
    /// percentage of app revenue.
    Scaled {
        source: LineNumber,
        factor: Decimal,
        kind: Kind,
    },

    /// `numerator / denominator` per period, stored as a raw ratio.
    Ratio {
        numerator: LineNumber,
        denominator: LineNumber,
    },
}

impl LineRole {
    /// Lines whose value is derived from other lines.
    pub fn is_computed(&self) -> bool {
        matches!(
            self,
            LineRole::Total { .. } | LineRole::Scaled { .. } | LineRole::Ratio { .. }
        )
    }

    pub fn kind(&self) -> Option<Kind> {
        match self {
            LineRole::Leaf { kind, .. } | LineRole::Scaled { kind, .. } => Some(*kind),
            LineRole::Unclassified => Some(Kind::Expense),
            _ => None,
        }
    }

    fn dependencies(&self) -> Vec<LineNumber> {
        match self {
            LineRole::Total { children } => children.clone(),
            LineRole::Scaled { source, .. } => vec![*source],
            LineRole::Ratio {
                numerator,
                denominator,
            } => vec![*numerator, *denominator],
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TemplateLine {
    pub line_number: LineNumber,
    pub description: String,
    #[serde(default)]
    pub indent_level: u8,
    #[serde(flatten)]
    pub role: LineRole,
}

impl TemplateLine {
    pub fn header(line: u32, description: &str) -> Self {
        Self::with_role(line, description, 0, LineRole::Header)
    }

    pub fn leaf(line: u32, description: &str, kind: Kind) -> Self {
        Self::with_role(
            line,
            description,
            1,
            LineRole::Leaf {
                kind,
                non_operating: false,
            },
        )
    }

    pub fn non_operating(line: u32, description: &str, kind: Kind) -> Self {
        Self::with_role(
            line,
            description,
            1,
            LineRole::Leaf {
                kind,
                non_operating: true,
            },
        )
    }

    pub fn unclassified(line: u32, description: &str) -> Self {
        Self::with_role(line, description, 1, LineRole::Unclassified)
    }

    pub fn total(line: u32, description: &str, children: &[u32]) -> Self {
        Self::with_role(
            line,
            description,
            0,
            LineRole::Total {
                children: children.iter().copied().map(LineNumber).collect(),
            },
        )
    }

    pub fn scaled(line: u32, description: &str, source: u32, factor: Decimal, kind: Kind) -> Self {
        Self::with_role(
            line,
            description,
            1,
            LineRole::Scaled {
                source: LineNumber(source),
                factor,
                kind,
            },
        )
    }

    pub fn ratio(line: u32, description: &str, numerator: u32, denominator: u32) -> Self {
        Self::with_role(
            line,
            description,
            0,
            LineRole::Ratio {
                numerator: LineNumber(numerator),
                denominator: LineNumber(denominator),
            },
        )
    }

    pub fn indented(mut self, indent_level: u8) -> Self {
        self.indent_level = indent_level;
        self
    }

    fn with_role(line: u32, description: &str, indent_level: u8, role: LineRole) -> Self {
        Self {
            line_number: LineNumber(line),
            description: description.to_string(),
            indent_level,
            role,
        }
    }
}

/// The ordered line declaration of the statement. Row order in the built
/// statement follows declaration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct StatementTemplate {
    lines: Vec<TemplateLine>,
}

#[derive(Clone, Copy, PartialEq)]
enum Visit {
    InProgress,
    Done,
}

impl StatementTemplate {
    pub fn new(lines: Vec<TemplateLine>) -> Result<Self> {
        let template = Self { lines };
        template.validate()?;
        Ok(template)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let template: StatementTemplate = serde_json::from_str(json)?;
        template.validate()?;
        Ok(template)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn lines(&self) -> &[TemplateLine] {
        &self.lines
    }

    pub fn get(&self, line: LineNumber) -> Option<&TemplateLine> {
        self.lines.iter().find(|l| l.line_number == line)
    }

    /// Lines mapping rules may target.
    pub fn leaf_lines(&self) -> BTreeSet<LineNumber> {
        self.lines
            .iter()
            .filter(|l| matches!(l.role, LineRole::Leaf { .. }))
            .map(|l| l.line_number)
            .collect()
    }

    /// Kind of every leaf line, keyed by line number.
    pub fn leaf_kinds(&self) -> BTreeMap<LineNumber, Kind> {
        self.lines
            .iter()
            .filter_map(|l| match l.role {
                LineRole::Leaf { kind, .. } => Some((l.line_number, kind)),
                _ => None,
            })
            .collect()
    }

    pub fn unclassified_line(&self) -> Option<LineNumber> {
        self.lines
            .iter()
            .find(|l| l.role == LineRole::Unclassified)
            .map(|l| l.line_number)
    }

    pub fn validate(&self) -> Result<()> {
        let mut roles: BTreeMap<LineNumber, &LineRole> = BTreeMap::new();
        for line in &self.lines {
            if roles.insert(line.line_number, &line.role).is_some() {
                return Err(PnlError::InvalidTemplate(format!(
                    "line number {} is declared more than once",
                    line.line_number
                )));
            }
        }

        let unclassified_rows = self
            .lines
            .iter()
            .filter(|l| l.role == LineRole::Unclassified)
            .count();
        if unclassified_rows > 1 {
            return Err(PnlError::InvalidTemplate(
                "at most one unclassified line may be declared".to_string(),
            ));
        }

        for line in &self.lines {
            for dependency in line.role.dependencies() {
                let target = roles.get(&dependency).ok_or(InvariantViolation::UnknownChildLine {
                    total: line.line_number,
                    child: dependency,
                })?;

                if matches!(target, LineRole::Header | LineRole::Ratio { .. }) {
                    return Err(PnlError::InvalidTemplate(format!(
                        "line {} depends on line {}, which is a header or ratio line",
                        line.line_number, dependency
                    )));
                }
            }
        }

        let mut visits: BTreeMap<LineNumber, Visit> = BTreeMap::new();
        for line in &self.lines {
            Self::detect_cycle(line.line_number, &roles, &mut visits)?;
        }

        Ok(())
    }

    fn detect_cycle(
        line: LineNumber,
        roles: &BTreeMap<LineNumber, &LineRole>,
        visits: &mut BTreeMap<LineNumber, Visit>,
    ) -> Result<()> {
        match visits.get(&line) {
            Some(Visit::Done) => return Ok(()),
            Some(Visit::InProgress) => {
                return Err(InvariantViolation::CyclicTotal { line }.into());
            }
            None => {}
        }

        visits.insert(line, Visit::InProgress);
        if let Some(role) = roles.get(&line) {
            for dependency in role.dependencies() {
                Self::detect_cycle(dependency, roles, visits)?;
            }
        }
        visits.insert(line, Visit::Done);

        Ok(())
    }

    /// The default layout for a mobile-app business: store revenue, investment
    /// income, a 17.65% payment-processing fee, web-services COGS and the usual
    /// SG&A lines, down to EBITDA, net result and margins.
    pub fn standard() -> Self {
        Self {
            lines: vec![
                TemplateLine::header(10, "Operating Revenue"),
                TemplateLine::leaf(11, "App Store Revenue", Kind::Revenue).indented(2),
                TemplateLine::leaf(12, "Google Play Revenue", Kind::Revenue).indented(2),
                TemplateLine::total(13, "App Sales (Google + Apple)", &[11, 12]).indented(1),
                TemplateLine::leaf(14, "Investment Income", Kind::Revenue),
                TemplateLine::total(15, "Total Revenue", &[13, 14]),
                TemplateLine::header(20, "(-) Direct Costs"),
                TemplateLine::scaled(
                    21,
                    "Payment Processing (17.65%)",
                    13,
                    dec!(-0.1765),
                    Kind::Cost,
                ),
                TemplateLine::leaf(22, "COGS (Web Services)", Kind::Cost),
                TemplateLine::total(23, "Total Direct Costs", &[21, 22]),
                TemplateLine::total(30, "(=) Gross Profit", &[15, 23]),
                TemplateLine::header(40, "(-) Operating Expenses"),
                TemplateLine::leaf(41, "Marketing", Kind::Expense),
                TemplateLine::leaf(42, "Wages", Kind::Expense),
                TemplateLine::leaf(43, "Tech Support & Services", Kind::Expense),
                TemplateLine::leaf(44, "Other Expenses", Kind::Expense),
                TemplateLine::unclassified(45, "Unclassified"),
                TemplateLine::total(46, "Total Operating Expenses", &[41, 42, 43, 44, 45]),
                TemplateLine::total(50, "(=) EBITDA", &[30, 46]),
                TemplateLine::total(60, "(=) Net Result", &[50]),
                TemplateLine::ratio(70, "EBITDA Margin %", 50, 15),
                TemplateLine::ratio(71, "Gross Margin %", 30, 15),
            ],
        }
    }
}
