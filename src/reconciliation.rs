use crate::aggregator::PeriodMatrix;
use crate::classifier::{classify, ClassifiedLineItem};
use crate::error::{InvariantViolation, Result};
use crate::schema::{Kind, LineNumber, MappingRule, Period, Transaction};
use rust_decimal::Decimal;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Advisory findings returned alongside a successful statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReconciliationWarning {
    /// Transactions no active rule matched. They are carried in the
    /// unclassified expense line and need review.
    UnclassifiedTransactions { count: usize, amount: Decimal },

    /// An override on a derived line disagrees with the value recomputed from
    /// its inputs. The recomputed value is the one shown.
    OverrideDivergence {
        line: LineNumber,
        period: Period,
        override_value: Decimal,
        computed: Decimal,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ClassificationReport {
    pub transaction_count: usize,
    pub total_amount: Decimal,
    pub classified_count: usize,
    pub classified_amount: Decimal,
    pub unclassified_count: usize,
    pub unclassified_amount: Decimal,
    /// Ids of the unclassified transactions, in input order.
    pub unclassified_ids: Vec<String>,
    /// Number of transactions each rule claimed, by rule id.
    pub rule_hits: BTreeMap<String, usize>,
    pub amount_by_kind: BTreeMap<String, Decimal>,
}

impl ClassificationReport {
    pub fn from_items(items: &[ClassifiedLineItem<'_>]) -> Self {
        let mut report = Self::default();

        for item in items {
            report.transaction_count += 1;
            report.total_amount += item.amount();
            *report
                .amount_by_kind
                .entry(item.kind.to_string())
                .or_insert(Decimal::ZERO) += item.amount();

            match item.rule_id {
                Some(rule_id) => {
                    report.classified_count += 1;
                    report.classified_amount += item.amount();
                    *report.rule_hits.entry(rule_id.to_string()).or_insert(0) += 1;
                }
                None => {
                    report.unclassified_count += 1;
                    report.unclassified_amount += item.amount();
                    report.unclassified_ids.push(item.transaction.id.clone());
                }
            }
        }

        report
    }

    pub fn is_fully_classified(&self) -> bool {
        self.unclassified_count == 0
    }

    pub fn amount_for(&self, kind: Kind) -> Decimal {
        self.amount_by_kind
            .get(&kind.to_string())
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    pub fn warning(&self) -> Option<ReconciliationWarning> {
        if self.is_fully_classified() {
            None
        } else {
            Some(ReconciliationWarning::UnclassifiedTransactions {
                count: self.unclassified_count,
                amount: self.unclassified_amount,
            })
        }
    }
}

/// Classifies `transactions` and summarizes how much of the input the rules
/// account for.
pub fn classification_report(
    transactions: &[Transaction],
    rules: &[MappingRule],
) -> ClassificationReport {
    let items = classify(transactions, rules);
    ClassificationReport::from_items(&items)
}

/// Checks that the matrix holds exactly the sum of the items it was built
/// from. Classified plus unclassified must reconcile to the raw total.
pub fn verify_conservation(items: &[ClassifiedLineItem<'_>], matrix: &PeriodMatrix) -> Result<()> {
    let items_total: Decimal = items.iter().map(|i| i.amount()).sum();
    let matrix_total = matrix.grand_total();

    if items_total != matrix_total {
        return Err(InvariantViolation::ConservationBroken {
            items: items_total,
            matrix: matrix_total,
        }
        .into());
    }

    Ok(())
}
