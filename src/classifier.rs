use crate::schema::{Kind, LineNumber, MappingRule, Period, Transaction};
use crate::utils::normalize_label;
use log::debug;
use rust_decimal::Decimal;
use std::fmt;

/// Row key of the period matrix: a template line, or the sentinel bucket for
/// transactions no rule matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LineKey {
    Line(LineNumber),
    Unclassified,
}

impl fmt::Display for LineKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LineKey::Line(line) => write!(f, "{}", line),
            LineKey::Unclassified => f.write_str("UNCLASSIFIED"),
        }
    }
}

impl From<LineNumber> for LineKey {
    fn from(line: LineNumber) -> Self {
        LineKey::Line(line)
    }
}

/// A transaction tagged with the line and kind it resolved to. Derived on
/// every run, never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedLineItem<'a> {
    pub transaction: &'a Transaction,
    pub line: LineKey,
    pub kind: Kind,
    /// The rule that matched, `None` for unclassified items.
    pub rule_id: Option<&'a str>,
}

impl ClassifiedLineItem<'_> {
    pub fn amount(&self) -> Decimal {
        self.transaction.amount
    }

    pub fn period(&self) -> Period {
        self.transaction.period()
    }

    pub fn is_unclassified(&self) -> bool {
        self.line == LineKey::Unclassified
    }
}

// Rule predicates normalized once per run. `None` is a wildcard.
struct RulePredicate<'a> {
    rule: &'a MappingRule,
    financial_group: Option<String>,
    cost_center: Option<String>,
    counterparty: Option<String>,
}

impl<'a> RulePredicate<'a> {
    fn new(rule: &'a MappingRule) -> Self {
        Self {
            rule,
            financial_group: predicate(&rule.financial_group),
            cost_center: predicate(&rule.cost_center),
            counterparty: predicate(&rule.counterparty),
        }
    }

    fn matches(&self, transaction: &Transaction) -> bool {
        field_matches(&self.financial_group, &transaction.financial_group)
            && field_matches(&self.cost_center, &transaction.cost_center)
            && field_matches(&self.counterparty, &transaction.counterparty)
    }
}

fn predicate(value: &str) -> Option<String> {
    let normalized = normalize_label(value);
    if normalized.is_empty() {
        None
    } else {
        Some(normalized)
    }
}

fn field_matches(predicate: &Option<String>, value: &str) -> bool {
    match predicate {
        Some(expected) => *expected == normalize_label(value),
        None => true,
    }
}

/// Classifies every transaction against `rules` in stored order. The first
/// active rule whose non-empty predicates all match wins; anything left over
/// lands in [`LineKey::Unclassified`] as an expense.
///
/// Pure: output order follows input order and nothing is mutated.
pub fn classify<'a>(
    transactions: &'a [Transaction],
    rules: &'a [MappingRule],
) -> Vec<ClassifiedLineItem<'a>> {
    let predicates: Vec<RulePredicate<'a>> = rules
        .iter()
        .filter(|r| r.active)
        .map(RulePredicate::new)
        .collect();

    let items: Vec<ClassifiedLineItem<'a>> = transactions
        .iter()
        .map(|tx| classify_with(tx, &predicates))
        .collect();

    debug!(
        "Classified {} transactions against {} active rules ({} unclassified)",
        items.len(),
        predicates.len(),
        items.iter().filter(|i| i.is_unclassified()).count()
    );

    items
}

fn classify_with<'a>(
    transaction: &'a Transaction,
    predicates: &[RulePredicate<'a>],
) -> ClassifiedLineItem<'a> {
    match predicates.iter().find(|p| p.matches(transaction)) {
        Some(predicate) => ClassifiedLineItem {
            transaction,
            line: LineKey::Line(predicate.rule.pl_line),
            kind: predicate.rule.kind,
            rule_id: Some(predicate.rule.id.as_str()),
        },
        None => ClassifiedLineItem {
            transaction,
            line: LineKey::Unclassified,
            kind: Kind::Expense,
            rule_id: None,
        },
    }
}
