use crate::aggregator::PeriodMatrix;
use crate::classifier::LineKey;
use crate::error::{InvariantViolation, Result};
use crate::schema::{LineNumber, Override, Period};
use log::debug;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Manual corrections keyed by `(line, period)`. A second write for the same
/// key replaces the first; values never stack.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<Override>", into = "Vec<Override>")]
pub struct OverrideStore {
    cells: BTreeMap<(LineNumber, Period), Decimal>,
}

impl OverrideStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a persisted list. Later entries for the same key win.
    pub fn from_overrides<I: IntoIterator<Item = Override>>(overrides: I) -> Self {
        let mut store = Self::new();
        for o in overrides {
            store.set(o.pl_line, o.period, o.value);
        }
        store
    }

    /// Writes an override and returns the value it replaced, if any.
    pub fn set(&mut self, line: LineNumber, period: Period, value: Decimal) -> Option<Decimal> {
        let previous = self.cells.insert((line, period), value);
        if let Some(old) = previous {
            debug!(
                "Override for line {} in {} replaced ({} -> {})",
                line, period, old, value
            );
        }
        previous
    }

    pub fn get(&self, line: LineNumber, period: Period) -> Option<Decimal> {
        self.cells.get(&(line, period)).copied()
    }

    pub fn clear(&mut self, line: LineNumber, period: Period) -> Option<Override> {
        self.cells
            .remove(&(line, period))
            .map(|value| Override::new(line, period, value))
    }

    /// Clears every period of one line. Returns how many overrides were removed.
    pub fn clear_line(&mut self, line: LineNumber) -> usize {
        let before = self.cells.len();
        self.cells.retain(|(l, _), _| *l != line);
        before - self.cells.len()
    }

    pub fn clear_all(&mut self) {
        self.cells.clear();
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// All overrides, ordered by line then period.
    pub fn list(&self) -> Vec<Override> {
        self.cells
            .iter()
            .map(|((line, period), value)| Override::new(*line, *period, *value))
            .collect()
    }
}

impl From<Vec<Override>> for OverrideStore {
    fn from(overrides: Vec<Override>) -> Self {
        Self::from_overrides(overrides)
    }
}

impl From<OverrideStore> for Vec<Override> {
    fn from(store: OverrideStore) -> Self {
        store.list()
    }
}

/// Replaces the overridden cells of `matrix`; every other cell passes
/// through. Callers must hand in at most one override per key, otherwise the
/// merge fails without touching anything.
pub fn apply_overrides(matrix: &PeriodMatrix, overrides: &[Override]) -> Result<PeriodMatrix> {
    let mut seen = BTreeSet::new();
    for o in overrides {
        if !seen.insert((o.pl_line, o.period)) {
            return Err(InvariantViolation::DuplicateOverride {
                line: o.pl_line,
                period: o.period,
            }
            .into());
        }
    }

    let mut merged = matrix.clone();
    for o in overrides {
        merged.replace_cell(LineKey::Line(o.pl_line), o.period, o.value);
    }

    debug!("Applied {} overrides", overrides.len());
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::aggregate;
    use crate::classifier::classify;
    use crate::error::PnlError;
    use crate::schema::{Kind, MappingRule, Transaction};
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn march() -> Period {
        Period::new(2024, 3).unwrap()
    }

    #[test]
    fn test_last_write_wins() {
        let mut store = OverrideStore::new();
        assert_eq!(store.set(LineNumber(1), march(), dec!(1500)), None);
        assert_eq!(store.set(LineNumber(1), march(), dec!(1700)), Some(dec!(1500)));

        assert_eq!(store.len(), 1);
        assert_eq!(store.get(LineNumber(1), march()), Some(dec!(1700)));
    }

    #[test]
    fn test_from_overrides_keeps_latest() {
        let store = OverrideStore::from_overrides(vec![
            Override::new(1, march(), dec!(1)),
            Override::new(2, march(), dec!(2)),
            Override::new(1, march(), dec!(3)),
        ]);
        assert_eq!(
            store.list(),
            vec![
                Override::new(1, march(), dec!(3)),
                Override::new(2, march(), dec!(2)),
            ]
        );
    }

    #[test]
    fn test_clearing() {
        let april = Period::new(2024, 4).unwrap();
        let mut store = OverrideStore::new();
        store.set(LineNumber(1), march(), dec!(10));
        store.set(LineNumber(1), april, dec!(20));
        store.set(LineNumber(2), march(), dec!(30));

        assert_eq!(
            store.clear(LineNumber(2), march()),
            Some(Override::new(2, march(), dec!(30)))
        );
        assert_eq!(store.clear(LineNumber(2), march()), None);
        assert_eq!(store.clear_line(LineNumber(1)), 2);
        assert!(store.is_empty());

        store.set(LineNumber(3), march(), dec!(1));
        store.clear_all();
        assert!(store.is_empty());
    }

    #[test]
    fn test_store_serializes_as_list() {
        let mut store = OverrideStore::new();
        store.set(LineNumber(11), march(), dec!(1500));

        let json = serde_json::to_string(&store).unwrap();
        assert_eq!(json, r#"[{"pl_line":11,"period":"2024-03","value":"1500"}]"#);

        let back: OverrideStore = serde_json::from_str(&json).unwrap();
        assert_eq!(back, store);
    }

    #[test]
    fn test_apply_replaces_only_overridden_cells() {
        let date = |d| NaiveDate::from_ymd_opt(2024, 3, d).unwrap();
        let transactions = vec![
            Transaction::new("t1", date(15), dec!(1000)).with_counterparty("Acme"),
            Transaction::new("t2", date(16), dec!(-40)).with_counterparty("AWS"),
        ];
        let rules = vec![
            MappingRule::new("acme", 1, Kind::Revenue).with_counterparty("Acme"),
            MappingRule::new("aws", 2, Kind::Cost).with_counterparty("AWS"),
        ];
        let items = classify(&transactions, &rules);
        let matrix = aggregate(&items, None);

        let merged = apply_overrides(&matrix, &[Override::new(1, march(), dec!(1500))]).unwrap();
        let line = |n| LineKey::Line(LineNumber(n));
        assert_eq!(merged.cell(line(1), march()), dec!(1500));
        assert_eq!(merged.cell(line(2), march()), dec!(-40));
        assert!(merged.is_overridden(line(1), march()));
        assert!(!merged.is_overridden(line(2), march()));

        // the input matrix is left untouched
        assert_eq!(matrix.cell(line(1), march()), dec!(1000));
    }

    #[test]
    fn test_override_on_new_period_adds_zero_filled_column() {
        let matrix = PeriodMatrix::default();
        let merged = apply_overrides(&matrix, &[Override::new(7, march(), dec!(99))]).unwrap();
        assert!(merged.periods().contains(&march()));
        assert_eq!(merged.cell(LineKey::Line(LineNumber(7)), march()), dec!(99));
    }

    #[test]
    fn test_duplicate_keys_fail_fast() {
        let matrix = PeriodMatrix::default();
        let err = apply_overrides(
            &matrix,
            &[
                Override::new(1, march(), dec!(1)),
                Override::new(1, march(), dec!(2)),
            ],
        )
        .unwrap_err();

        assert!(matches!(
            err,
            PnlError::InvariantViolation(InvariantViolation::DuplicateOverride { .. })
        ));
        assert!(err.to_string().contains("2024-03"));
    }
}
