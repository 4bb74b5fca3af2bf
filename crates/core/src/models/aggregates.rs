use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::category::{BudgetBucket, Category};
use super::period::Period;

/// Share of the monthly salary recommended for each bucket (50/30/20 rule).
pub const NEEDS_SHARE_PCT: i64 = 50;
pub const WANTS_SHARE_PCT: i64 = 30;
pub const SAVINGS_SHARE_PCT: i64 = 20;

/// Cached per-category spending for one period.
///
/// Always replaced as a whole; never patched row by row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryTotals {
    pub period: Period,
    pub totals: BTreeMap<Category, Decimal>,
    pub last_updated: DateTime<Utc>,
}

impl CategoryTotals {
    /// Sum across all categories.
    pub fn grand_total(&self) -> Decimal {
        self.totals.values().copied().sum()
    }

    /// Equality ignoring `last_updated`.
    pub fn same_content(&self, other: &Self) -> bool {
        self.period == other.period && self.totals == other.totals
    }
}

/// Needs / wants / savings breakdown of spending against the monthly salary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisSnapshot {
    pub period: Period,
    /// Date bucket this snapshot was computed for.
    pub date: NaiveDate,
    pub monthly_salary: Decimal,
    pub needs_amount: Decimal,
    pub wants_amount: Decimal,
    pub savings_amount: Decimal,
    /// Percent of `monthly_salary`, rounded to 2 dp; zero when the salary is zero.
    pub needs_percent: Decimal,
    pub wants_percent: Decimal,
    pub savings_percent: Decimal,
    pub last_updated: DateTime<Utc>,
}

impl AnalysisSnapshot {
    /// Build a snapshot from per-category totals.
    pub fn from_totals(
        period: Period,
        date: NaiveDate,
        monthly_salary: Decimal,
        totals: &BTreeMap<Category, Decimal>,
        last_updated: DateTime<Utc>,
    ) -> Self {
        let mut needs = Decimal::ZERO;
        let mut wants = Decimal::ZERO;
        let mut savings = Decimal::ZERO;
        for (category, amount) in totals {
            match category.bucket() {
                BudgetBucket::Needs => needs += amount,
                BudgetBucket::Wants => wants += amount,
                BudgetBucket::Savings => savings += amount,
            }
        }

        Self {
            period,
            date,
            monthly_salary,
            needs_amount: needs,
            wants_amount: wants,
            savings_amount: savings,
            needs_percent: percent_of(needs, monthly_salary),
            wants_percent: percent_of(wants, monthly_salary),
            savings_percent: percent_of(savings, monthly_salary),
            last_updated,
        }
    }

    /// Recommended amount per bucket for this salary.
    pub fn ideal_allocation(&self) -> BTreeMap<&'static str, Decimal> {
        let share = |pct: i64| (self.monthly_salary * Decimal::from(pct) / Decimal::ONE_HUNDRED).round_dp(2);
        BTreeMap::from([
            ("needs", share(NEEDS_SHARE_PCT)),
            ("wants", share(WANTS_SHARE_PCT)),
            ("savings", share(SAVINGS_SHARE_PCT)),
        ])
    }

    pub fn same_content(&self, other: &Self) -> bool {
        Self {
            last_updated: other.last_updated,
            ..self.clone()
        } == *other
    }
}

fn percent_of(amount: Decimal, whole: Decimal) -> Decimal {
    if whole.is_zero() {
        return Decimal::ZERO;
    }
    (amount * Decimal::ONE_HUNDRED / whole).round_dp(2)
}

/// Calories for one food item within a day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalorieBreakdownItem {
    pub food_item: String,
    pub calories: i64,
    pub count: u32,
}

/// Totals for everything eaten on one local calendar date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyCalorieSummary {
    pub date: NaiveDate,
    pub total_calories: i64,
    pub total_carbs: i64,
    pub total_protein: i64,
    pub total_fat: i64,
    /// Highest-calorie food first; ties ordered by name.
    pub breakdown: Vec<CalorieBreakdownItem>,
    pub last_updated: DateTime<Utc>,
}

impl DailyCalorieSummary {
    pub fn same_content(&self, other: &Self) -> bool {
        Self {
            last_updated: other.last_updated,
            ..self.clone()
        } == *other
    }
}
