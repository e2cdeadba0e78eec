use crate::schema::{Kind, Period};
use crate::statement::{safe_ratio, Statement};
use crate::window::DateWindow;
use log::warn;
use rust_decimal::Decimal;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Headline figures over the whole filtered window.
///
/// `cost_of_revenue` and `operating_expenses` are positive magnitudes, so
/// `gross_profit = total_revenue - cost_of_revenue` and
/// `ebitda = gross_profit - operating_expenses` hold on the signed amounts.
/// Margins are raw ratios and are zero when there is no revenue.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct KpiSet {
    pub total_revenue: Decimal,
    pub cost_of_revenue: Decimal,
    pub gross_profit: Decimal,
    pub operating_expenses: Decimal,
    pub ebitda: Decimal,
    pub net_result: Decimal,
    pub gross_margin: Decimal,
    pub ebitda_margin: Decimal,
    #[serde(default)]
    pub window: Option<DateWindow>,
}

/// Computes the KPI set from a finished statement.
///
/// Only base lines contribute (rows tagged with a kind that are neither
/// totals nor ratios), so no amount is counted twice. Every period of the
/// statement is summed: the window was applied to the transactions before
/// aggregation and is reported back from `statement.window`. A different
/// `window` cannot be honoured on month buckets, so it is ignored with a
/// warning. Rebuild the statement for that window instead.
pub fn compute_kpis(statement: &Statement, window: Option<&DateWindow>) -> KpiSet {
    if let Some(requested) = window {
        if statement.window.as_ref() != Some(requested) {
            warn!(
                "Ignoring KPI window {}: the statement covers {}",
                requested,
                statement
                    .window
                    .map_or_else(|| "the full history".to_string(), |w| w.to_string())
            );
        }
    }

    sum_periods(statement, &statement.headers, statement.window)
}

/// KPIs for one month of the statement.
pub fn kpis_for_period(statement: &Statement, period: Period) -> KpiSet {
    let month = DateWindow::month(period);
    let window = match statement.window {
        Some(built) => built.intersection(&month),
        None => Some(month),
    };
    sum_periods(statement, &[period], window)
}

fn sum_periods(statement: &Statement, periods: &[Period], window: Option<DateWindow>) -> KpiSet {
    let mut revenue = Decimal::ZERO;
    let mut costs = Decimal::ZERO;
    let mut operating = Decimal::ZERO;

    for row in statement.rows.iter().filter(|r| r.is_base_line()) {
        let amount: Decimal = periods.iter().map(|p| row.value(*p)).sum();
        match row.kind {
            Some(Kind::Revenue) => revenue += amount,
            Some(Kind::Cost) => costs += amount,
            Some(Kind::Expense) if !row.non_operating => operating += amount,
            _ => {}
        }
    }

    let cost_of_revenue = -costs;
    let operating_expenses = -operating;
    let gross_profit = revenue - cost_of_revenue;
    let ebitda = gross_profit - operating_expenses;

    KpiSet {
        total_revenue: revenue,
        cost_of_revenue,
        gross_profit,
        operating_expenses,
        ebitda,
        net_result: ebitda,
        gross_margin: safe_ratio(gross_profit, revenue),
        ebitda_margin: safe_ratio(ebitda, revenue),
        window,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::aggregate;
    use crate::classifier::classify;
    use crate::schema::{LineNumber, MappingRule, Transaction};
    use crate::statement::build;
    use crate::template::{StatementTemplate, TemplateLine};
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn statement(transactions: &[Transaction], template: &StatementTemplate) -> Statement {
        let rules = vec![
            MappingRule::new("sales", 1, Kind::Revenue).with_counterparty("Acme"),
            MappingRule::new("hosting", 2, Kind::Cost).with_counterparty("AWS"),
            MappingRule::new("ads", 3, Kind::Expense).with_counterparty("Meta"),
            MappingRule::new("interest", 4, Kind::Expense).with_counterparty("Bank"),
        ];
        let items = classify(transactions, &rules);
        build(&aggregate(&items, None), template).unwrap()
    }

    fn template() -> StatementTemplate {
        StatementTemplate::new(vec![
            TemplateLine::leaf(1, "Sales", Kind::Revenue),
            TemplateLine::leaf(2, "Hosting", Kind::Cost),
            TemplateLine::leaf(3, "Advertising", Kind::Expense),
            TemplateLine::non_operating(4, "Interest", Kind::Expense),
            TemplateLine::total(5, "Gross Profit", &[1, 2]),
            TemplateLine::ratio(6, "Gross Margin", 5, 1),
        ])
        .unwrap()
    }

    fn sample() -> Vec<Transaction> {
        vec![
            Transaction::new("t1", date(2024, 3, 1), dec!(1000)).with_counterparty("Acme"),
            Transaction::new("t2", date(2024, 3, 2), dec!(-300)).with_counterparty("AWS"),
            Transaction::new("t3", date(2024, 4, 3), dec!(-200)).with_counterparty("Meta"),
            Transaction::new("t4", date(2024, 4, 4), dec!(-50)).with_counterparty("Bank"),
        ]
    }

    #[test]
    fn test_kpi_formulas() {
        let kpis = compute_kpis(&statement(&sample(), &template()), None);

        assert_eq!(kpis.total_revenue, dec!(1000));
        assert_eq!(kpis.cost_of_revenue, dec!(300));
        assert_eq!(kpis.gross_profit, dec!(700));
        // non-operating interest stays out of EBITDA
        assert_eq!(kpis.operating_expenses, dec!(200));
        assert_eq!(kpis.ebitda, dec!(500));
        assert_eq!(kpis.net_result, kpis.ebitda);
        assert_eq!(kpis.gross_margin, dec!(0.7));
        assert_eq!(kpis.ebitda_margin, dec!(0.5));
        assert!(kpis.window.is_none());
    }

    #[test]
    fn test_totals_and_ratios_are_not_double_counted() {
        let statement = statement(&sample(), &template());
        assert_eq!(
            statement.value(LineNumber(5), "2024-03".parse().unwrap()),
            Some(dec!(700))
        );
        let kpis = compute_kpis(&statement, None);
        assert_eq!(kpis.total_revenue, dec!(1000));
    }

    #[test]
    fn test_kpis_cover_the_statement_not_the_requested_window() {
        let statement = statement(&sample(), &template());
        let april = DateWindow::new(date(2024, 4, 1), date(2024, 4, 30)).unwrap();
        let kpis = compute_kpis(&statement, Some(&april));

        assert_eq!(kpis, compute_kpis(&statement, None));
        assert_eq!(kpis.total_revenue, dec!(1000));
        assert!(kpis.window.is_none());
    }

    #[test]
    fn test_kpis_for_period() {
        let statement = statement(&sample(), &template());
        let april = Period::new(2024, 4).unwrap();
        let kpis = kpis_for_period(&statement, april);

        assert_eq!(kpis.total_revenue, Decimal::ZERO);
        assert_eq!(kpis.operating_expenses, dec!(200));
        assert_eq!(kpis.ebitda, dec!(-200));
        assert_eq!(kpis.window, Some(DateWindow::month(april)));
    }

    #[test]
    fn test_kpis_for_period_clip_to_build_window() {
        let mut statement = statement(&sample(), &template());
        let built = DateWindow::new(date(2024, 3, 1), date(2024, 4, 10)).unwrap();
        statement.window = Some(built);

        let kpis = kpis_for_period(&statement, Period::new(2024, 4).unwrap());
        assert_eq!(
            kpis.window,
            Some(DateWindow::new(date(2024, 4, 1), date(2024, 4, 10)).unwrap())
        );
        assert_eq!(compute_kpis(&statement, None).window, Some(built));
    }

    #[test]
    fn test_zero_revenue_gives_zero_margins() {
        let transactions = vec![
            Transaction::new("t1", date(2024, 3, 2), dec!(-300)).with_counterparty("AWS"),
        ];
        let kpis = compute_kpis(&statement(&transactions, &template()), None);

        assert_eq!(kpis.total_revenue, Decimal::ZERO);
        assert_eq!(kpis.gross_margin, Decimal::ZERO);
        assert_eq!(kpis.ebitda_margin, Decimal::ZERO);
        assert_eq!(kpis.gross_profit, dec!(-300));
    }

    #[test]
    fn test_scaled_fee_counts_as_cost_in_standard_template() {
        let rules = vec![MappingRule::new("apple", 11, Kind::Revenue).with_counterparty("Apple")];
        let transactions =
            vec![Transaction::new("t1", date(2024, 3, 5), dec!(1000)).with_counterparty("Apple")];
        let items = classify(&transactions, &rules);
        let statement = build(&aggregate(&items, None), &StatementTemplate::standard()).unwrap();
        let kpis = compute_kpis(&statement, None);

        assert_eq!(kpis.cost_of_revenue, dec!(176.5));
        assert_eq!(kpis.gross_profit, dec!(823.5));
        assert_eq!(
            statement.value(LineNumber(30), "2024-03".parse().unwrap()),
            Some(kpis.gross_profit)
        );
    }

    #[test]
    fn test_empty_statement() {
        let statement = Statement {
            headers: vec![],
            rows: vec![],
            warnings: vec![],
            window: None,
        };
        assert_eq!(compute_kpis(&statement, None), KpiSet::default());
    }
}
