use crate::kpi::{compute_kpis, kpis_for_period, KpiSet};
use crate::schema::{Kind, Period};
use crate::statement::Statement;
use rust_decimal::Decimal;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One point of the monthly chart series. Costs and expenses are positive
/// magnitudes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MonthlySummary {
    pub period: Period,
    pub revenue: Decimal,
    pub costs: Decimal,
    pub expenses: Decimal,
    pub ebitda: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DashboardData {
    /// KPIs over the window the statement was built for.
    pub kpis: KpiSet,
    pub monthly: Vec<MonthlySummary>,
    /// Most recent period with positive revenue, or the last period when no
    /// period has any.
    pub latest_period: Option<Period>,
    pub latest_kpis: Option<KpiSet>,
    /// Magnitude of every cost and expense line in `latest_period`, keyed by
    /// line description.
    pub cost_structure: BTreeMap<String, Decimal>,
}

impl DashboardData {
    pub fn from_statement(statement: &Statement) -> Self {
        let kpis = compute_kpis(statement, None);

        let monthly: Vec<MonthlySummary> = statement
            .headers
            .iter()
            .map(|period| {
                let month = kpis_for_period(statement, *period);
                MonthlySummary {
                    period: *period,
                    revenue: month.total_revenue,
                    costs: month.cost_of_revenue,
                    expenses: month.operating_expenses,
                    ebitda: month.ebitda,
                }
            })
            .collect();

        let latest_period = monthly
            .iter()
            .rev()
            .find(|m| m.revenue > Decimal::ZERO)
            .or_else(|| monthly.last())
            .map(|m| m.period);

        let latest_kpis = latest_period.map(|period| kpis_for_period(statement, period));

        let cost_structure = latest_period
            .map(|period| cost_structure(statement, period))
            .unwrap_or_default();

        Self {
            kpis,
            monthly,
            latest_period,
            latest_kpis,
            cost_structure,
        }
    }
}

fn cost_structure(statement: &Statement, period: Period) -> BTreeMap<String, Decimal> {
    statement
        .rows
        .iter()
        .filter(|r| r.is_base_line() && matches!(r.kind, Some(Kind::Cost | Kind::Expense)))
        .fold(BTreeMap::new(), |mut acc, row| {
            *acc.entry(row.description.clone()).or_insert(Decimal::ZERO) += row.value(period).abs();
            acc
        })
}
