use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use tracing::debug;

use crate::clock::Clock;
use crate::config::CoreConfig;
use crate::errors::CoreError;
use crate::models::aggregates::{
    AnalysisSnapshot, CalorieBreakdownItem, CategoryTotals, DailyCalorieSummary,
};
use crate::models::calorie::CalorieEntry;
use crate::models::category::Category;
use crate::models::period::Period;
use crate::models::transaction::Transaction;
use crate::storage::cache::is_stale;
use crate::storage::LocalStore;

/// Maximum age per derived cache before it is recomputed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheTtls {
    pub category_totals: Duration,
    pub analysis: Duration,
    pub calorie_summary: Duration,
}

impl CacheTtls {
    pub fn from_config(config: &CoreConfig) -> Self {
        Self {
            category_totals: config.category_totals_ttl(),
            analysis: config.analysis_ttl(),
            calorie_summary: config.calorie_summary_ttl(),
        }
    }
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self::from_config(&CoreConfig::default())
    }
}

/// Read path over [`LocalStore`].
///
/// Aggregates come from the cache while it is fresh; otherwise (or with
/// `force_refresh`) they are recomputed from raw rows and written back.
/// Writes through [`CommandRepository`](super::command_repository::CommandRepository)
/// mark the affected caches stale, so a read after a mutation never returns
/// the pre-mutation aggregate.
pub struct QueryRepository {
    store: Arc<LocalStore>,
    clock: Arc<dyn Clock>,
    ttls: CacheTtls,
}

impl QueryRepository {
    pub fn new(store: Arc<LocalStore>, clock: Arc<dyn Clock>, ttls: CacheTtls) -> Self {
        Self { store, clock, ttls }
    }

    // ── Raw entities ────────────────────────────────────────────────

    pub fn get_transaction(&self, id: &str) -> Result<Option<Transaction>, CoreError> {
        self.store.get_transaction(id)
    }

    pub fn get_calorie_entry(&self, id: &str) -> Result<Option<CalorieEntry>, CoreError> {
        self.store.get_calorie_entry(id)
    }

    /// Transactions in the current `period` window, newest first.
    pub fn transactions(&self, period: Period) -> Result<Vec<Transaction>, CoreError> {
        self.store.transactions_by_period(period, self.clock.now())
    }

    pub fn calorie_entries(&self, period: Period) -> Result<Vec<CalorieEntry>, CoreError> {
        self.store.calorie_entries_by_period(period, self.clock.now())
    }

    // ── Aggregates ──────────────────────────────────────────────────

    /// Spending per category for the current `period` window.
    pub fn get_category_totals(
        &self,
        period: Period,
        force_refresh: bool,
    ) -> Result<CategoryTotals, CoreError> {
        let now = self.clock.now();
        if !force_refresh {
            if let Some(cached) = self.store.get_cached_category_totals(period)? {
                if !is_stale(Some(cached.last_updated), self.ttls.category_totals, now) {
                    debug!(period = %period, "Category totals cache hit");
                    return Ok(cached);
                }
            }
        }

        let rows = self.store.transactions_by_period(period, now)?;
        let fresh = CategoryTotals {
            period,
            totals: category_totals(&rows),
            last_updated: now,
        };
        self.store.save_category_totals(&fresh)?;
        debug!(period = %period, rows = rows.len(), "Recomputed category totals");
        Ok(fresh)
    }

    /// Needs/wants/savings split of spending in the `period` window ending on `date`.
    ///
    /// A cached snapshot computed for a different salary is treated as a miss.
    pub fn get_transaction_analysis(
        &self,
        period: Period,
        date: NaiveDate,
        monthly_salary: Decimal,
        force_refresh: bool,
    ) -> Result<AnalysisSnapshot, CoreError> {
        if monthly_salary.is_sign_negative() {
            return Err(CoreError::ValidationError(
                "monthly salary cannot be negative".into(),
            ));
        }
        let now = self.clock.now();
        if !force_refresh {
            if let Some(cached) = self.store.get_transaction_analysis(period, date)? {
                let fresh = !is_stale(Some(cached.last_updated), self.ttls.analysis, now);
                if fresh && cached.monthly_salary == monthly_salary {
                    debug!(period = %period, %date, "Analysis cache hit");
                    return Ok(cached);
                }
            }
        }

        let (from, until) = period.bounds_for_date(date);
        let rows = self.store.transactions_in_window(from, until)?;
        let snapshot = AnalysisSnapshot::from_totals(
            period,
            date,
            monthly_salary,
            &category_totals(&rows),
            now,
        );
        self.store.save_transaction_analysis(&snapshot)?;
        debug!(period = %period, %date, rows = rows.len(), "Recomputed transaction analysis");
        Ok(snapshot)
    }

    /// Calorie and macro totals for one local calendar date.
    pub fn get_daily_calorie_summary(
        &self,
        date: NaiveDate,
        force_refresh: bool,
    ) -> Result<DailyCalorieSummary, CoreError> {
        let now = self.clock.now();
        if !force_refresh {
            if let Some(cached) = self.store.get_daily_calorie_summary(date)? {
                if !is_stale(Some(cached.last_updated), self.ttls.calorie_summary, now) {
                    debug!(%date, "Calorie summary cache hit");
                    return Ok(cached);
                }
            }
        }

        let (from, until) = Period::Day.bounds_for_date(date);
        let entries = self.store.calorie_entries_in_window(from, until)?;
        let summary = daily_calorie_summary(date, &entries, now);
        self.store.save_daily_calorie_summary(&summary)?;
        debug!(%date, entries = entries.len(), "Recomputed calorie summary");
        Ok(summary)
    }
}

fn category_totals(rows: &[Transaction]) -> BTreeMap<Category, Decimal> {
    let mut totals = BTreeMap::new();
    for t in rows {
        *totals.entry(t.category).or_insert(Decimal::ZERO) += t.amount;
    }
    totals
}

fn daily_calorie_summary(
    date: NaiveDate,
    entries: &[CalorieEntry],
    now: DateTime<Utc>,
) -> DailyCalorieSummary {
    let mut by_food: BTreeMap<&str, (i64, u32)> = BTreeMap::new();
    let mut summary = DailyCalorieSummary {
        date,
        total_calories: 0,
        total_carbs: 0,
        total_protein: 0,
        total_fat: 0,
        breakdown: Vec::new(),
        last_updated: now,
    };
    for e in entries {
        summary.total_calories += e.calories;
        summary.total_carbs += e.carbs.unwrap_or(0);
        summary.total_protein += e.protein.unwrap_or(0);
        summary.total_fat += e.fat.unwrap_or(0);
        let slot = by_food.entry(e.food_item.as_str()).or_insert((0, 0));
        slot.0 += e.calories;
        slot.1 += 1;
    }

    summary.breakdown = by_food
        .into_iter()
        .map(|(food, (calories, count))| CalorieBreakdownItem {
            food_item: food.to_string(),
            calories,
            count,
        })
        .collect();
    // Stable sort keeps the name order from the BTreeMap for equal calories.
    summary.breakdown.sort_by(|a, b| b.calories.cmp(&a.calories));
    summary
}
