use crate::classifier::{ClassifiedLineItem, LineKey};
use crate::schema::Period;
use crate::window::DateWindow;
use log::debug;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};

pub type PeriodValues = BTreeMap<Period, Decimal>;

/// Line × period grid of exact sums.
///
/// Every row carries a value for every period in `periods`; missing activity
/// is an explicit zero.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PeriodMatrix {
    periods: BTreeSet<Period>,
    rows: BTreeMap<LineKey, PeriodValues>,
    overridden: BTreeSet<(LineKey, Period)>,
}

impl PeriodMatrix {
    pub fn periods(&self) -> &BTreeSet<Period> {
        &self.periods
    }

    pub fn lines(&self) -> impl Iterator<Item = &LineKey> {
        self.rows.keys()
    }

    pub fn row(&self, key: LineKey) -> Option<&PeriodValues> {
        self.rows.get(&key)
    }

    pub fn cell(&self, key: LineKey, period: Period) -> Decimal {
        self.rows
            .get(&key)
            .and_then(|row| row.get(&period))
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    pub fn is_overridden(&self, key: LineKey, period: Period) -> bool {
        self.overridden.contains(&(key, period))
    }

    pub fn overridden_cells(&self) -> impl Iterator<Item = &(LineKey, Period)> {
        self.overridden.iter()
    }

    pub fn grand_total(&self) -> Decimal {
        self.rows.values().flat_map(|row| row.values()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty() && self.periods.is_empty()
    }

    /// Adds a period column, zero-filled for every existing row.
    pub fn add_period(&mut self, period: Period) {
        if self.periods.insert(period) {
            for row in self.rows.values_mut() {
                row.entry(period).or_insert(Decimal::ZERO);
            }
        }
    }

    fn row_mut(&mut self, key: LineKey) -> &mut PeriodValues {
        let periods = &self.periods;
        self.rows
            .entry(key)
            .or_insert_with(|| periods.iter().map(|p| (*p, Decimal::ZERO)).collect())
    }

    pub(crate) fn add_to_cell(&mut self, key: LineKey, period: Period, amount: Decimal) {
        self.add_period(period);
        *self.row_mut(key).entry(period).or_insert(Decimal::ZERO) += amount;
    }

    pub(crate) fn replace_cell(&mut self, key: LineKey, period: Period, value: Decimal) {
        self.add_period(period);
        self.row_mut(key).insert(period, value);
        self.overridden.insert((key, period));
    }

    /// Folds the `from` row into `into`, cell by cell, and drops `from`.
    pub fn merge_row(&mut self, from: LineKey, into: LineKey) {
        if from == into {
            return;
        }
        if let Some(source) = self.rows.remove(&from) {
            let target = self.row_mut(into);
            for (period, amount) in source {
                *target.entry(period).or_insert(Decimal::ZERO) += amount;
            }
        }
    }
}

/// Restricts items to the window. `None` keeps everything.
pub fn within_window<'a>(
    items: &[ClassifiedLineItem<'a>],
    window: Option<&DateWindow>,
) -> Vec<ClassifiedLineItem<'a>> {
    items
        .iter()
        .filter(|item| window.map_or(true, |w| w.contains(item.transaction.date)))
        .cloned()
        .collect()
}

/// Sums classified amounts per line and calendar month. The window is
/// applied to the items before any summation.
pub fn aggregate(items: &[ClassifiedLineItem<'_>], window: Option<&DateWindow>) -> PeriodMatrix {
    let in_window = within_window(items, window);
    let mut matrix = PeriodMatrix::default();

    for item in &in_window {
        matrix.add_to_cell(item.line, item.period(), item.amount());
    }

    debug!(
        "Aggregated {} of {} items into {} lines over {} periods",
        in_window.len(),
        items.len(),
        matrix.rows.len(),
        matrix.periods.len()
    );

    matrix
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::classify;
    use crate::schema::{Kind, LineNumber, MappingRule, Transaction};
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn period(s: &str) -> Period {
        s.parse().unwrap()
    }

    fn sample() -> (Vec<Transaction>, Vec<MappingRule>) {
        let date = |y, m, d| NaiveDate::from_ymd_opt(y, m, d).unwrap();
        let transactions = vec![
            Transaction::new("t1", date(2024, 3, 15), dec!(1000)).with_counterparty("Acme"),
            Transaction::new("t2", date(2024, 3, 20), dec!(250.25)).with_counterparty("Acme"),
            Transaction::new("t3", date(2024, 4, 2), dec!(-80)).with_counterparty("AWS"),
            Transaction::new("t4", date(2024, 4, 9), dec!(-15.10)).with_counterparty("Unknown"),
        ];
        let rules = vec![
            MappingRule::new("acme", 1, Kind::Revenue).with_counterparty("Acme"),
            MappingRule::new("aws", 2, Kind::Cost).with_counterparty("AWS"),
        ];
        (transactions, rules)
    }

    #[test]
    fn test_sums_by_line_and_month() {
        let (transactions, rules) = sample();
        let items = classify(&transactions, &rules);
        let matrix = aggregate(&items, None);

        let revenue = LineKey::Line(LineNumber(1));
        assert_eq!(matrix.cell(revenue, period("2024-03")), dec!(1250.25));
        assert_eq!(matrix.cell(LineKey::Unclassified, period("2024-04")), dec!(-15.10));
        assert_eq!(matrix.grand_total(), dec!(1155.15));
    }

    #[test]
    fn test_every_line_has_every_period() {
        let (transactions, rules) = sample();
        let items = classify(&transactions, &rules);
        let matrix = aggregate(&items, None);

        assert_eq!(matrix.periods().len(), 2);
        for key in matrix.lines() {
            let row = matrix.row(*key).unwrap();
            assert_eq!(row.len(), 2, "line {} is missing a period", key);
        }
        // revenue had no April activity but still has an explicit zero
        assert_eq!(
            matrix.row(LineKey::Line(LineNumber(1))).unwrap().get(&period("2024-04")),
            Some(&Decimal::ZERO)
        );
    }

    #[test]
    fn test_window_filters_before_summing() {
        let (transactions, rules) = sample();
        let items = classify(&transactions, &rules);
        let window = DateWindow::new(
            NaiveDate::from_ymd_opt(2024, 3, 18).unwrap(),
            NaiveDate::from_ymd_opt(2024, 4, 5).unwrap(),
        )
        .unwrap();

        let matrix = aggregate(&items, Some(&window));
        assert_eq!(matrix.cell(LineKey::Line(LineNumber(1)), period("2024-03")), dec!(250.25));
        assert_eq!(matrix.cell(LineKey::Line(LineNumber(2)), period("2024-04")), dec!(-80));
        assert_eq!(matrix.cell(LineKey::Unclassified, period("2024-04")), Decimal::ZERO);
        assert_eq!(matrix.grand_total(), dec!(170.25));
    }

    #[test]
    fn test_empty_input_gives_empty_matrix() {
        let matrix = aggregate(&[], None);
        assert!(matrix.is_empty());
        assert_eq!(matrix.grand_total(), Decimal::ZERO);
    }

    #[test]
    fn test_merge_row() {
        let (transactions, rules) = sample();
        let items = classify(&transactions, &rules);
        let mut matrix = aggregate(&items, None);

        let bucket = LineKey::Line(LineNumber(99));
        matrix.merge_row(LineKey::Unclassified, bucket);
        assert!(matrix.row(LineKey::Unclassified).is_none());
        assert_eq!(matrix.cell(bucket, period("2024-04")), dec!(-15.10));
        assert_eq!(matrix.cell(bucket, period("2024-03")), Decimal::ZERO);
        assert_eq!(matrix.grand_total(), dec!(1155.15));
    }
}
