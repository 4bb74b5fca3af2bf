use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rusqlite::{params, OptionalExtension, Transaction as SqlTransaction};
use tracing::{debug, info};

use super::{decimal_from_sql, ts_from_sql, ts_to_sql, LocalStore};
use crate::errors::CoreError;
use crate::models::aggregates::{AnalysisSnapshot, CalorieBreakdownItem, CategoryTotals, DailyCalorieSummary};
use crate::models::category::Category;
use crate::models::period::Period;

/// `now - last_updated > max_age`. Exactly `max_age` old is still fresh;
/// a missing cache entry is always stale.
pub fn is_stale(last_updated: Option<DateTime<Utc>>, max_age: Duration, now: DateTime<Utc>) -> bool {
    match last_updated {
        Some(updated) => now - updated > max_age,
        None => true,
    }
}

fn date_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn epoch() -> String {
    ts_to_sql(&DateTime::<Utc>::UNIX_EPOCH)
}

/// Mark every transaction-derived cache as stale (rows are kept).
pub(crate) fn invalidate_transaction_caches(tx: &SqlTransaction<'_>) -> Result<(), CoreError> {
    let epoch = epoch();
    tx.execute("UPDATE category_totals SET last_updated=?1", params![epoch])?;
    tx.execute("UPDATE category_totals_meta SET last_updated=?1", params![epoch])?;
    tx.execute("UPDATE transaction_analysis SET last_updated=?1", params![epoch])?;
    Ok(())
}

pub(crate) fn invalidate_calorie_summary(
    tx: &SqlTransaction<'_>,
    date: NaiveDate,
) -> Result<(), CoreError> {
    tx.execute(
        "UPDATE calorie_daily_summary SET last_updated=?2 WHERE date=?1",
        params![date_key(date), epoch()],
    )?;
    Ok(())
}

impl LocalStore {
    // ── Category totals ─────────────────────────────────────────────

    /// Replace every row for `totals.period` in one transaction.
    ///
    /// The period's timestamp lives in its own row, so a period with no
    /// spending is cached like any other.
    pub fn save_category_totals(&self, totals: &CategoryTotals) -> Result<(), CoreError> {
        let period = totals.period.label();
        let updated = ts_to_sql(&totals.last_updated);
        self.write(|tx| {
            tx.execute("DELETE FROM category_totals WHERE period=?1", params![period])?;
            tx.execute(
                "INSERT OR REPLACE INTO category_totals_meta(period, last_updated) VALUES (?1, ?2)",
                params![period, updated],
            )?;
            let mut stmt = tx.prepare(
                "INSERT INTO category_totals(period, category, total, last_updated) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for (category, total) in &totals.totals {
                stmt.execute(params![period, category.as_key(), total.to_string(), updated])?;
            }
            Ok(())
        })?;
        debug!(period, categories = totals.totals.len(), "Saved category totals");
        Ok(())
    }

    pub fn get_cached_category_totals(
        &self,
        period: Period,
    ) -> Result<Option<CategoryTotals>, CoreError> {
        let conn = self.lock()?;
        let updated: Option<String> = conn
            .query_row(
                "SELECT last_updated FROM category_totals_meta WHERE period=?1",
                params![period.label()],
                |r| r.get(0),
            )
            .optional()?;
        let Some(updated) = updated else {
            return Ok(None);
        };

        let mut stmt = conn.prepare(
            "SELECT category, total FROM category_totals WHERE period=?1 ORDER BY category",
        )?;
        let rows = stmt
            .query_map(params![period.label()], |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut totals = BTreeMap::new();
        for (category, total) in rows {
            totals.insert(Category::from_str(&category)?, decimal_from_sql(&total)?);
        }
        Ok(Some(CategoryTotals {
            period,
            totals,
            last_updated: ts_from_sql(&updated)?,
        }))
    }

    pub fn is_category_totals_stale(
        &self,
        period: Period,
        max_age: Duration,
        now: DateTime<Utc>,
    ) -> Result<bool, CoreError> {
        let cached = self.get_cached_category_totals(period)?;
        Ok(is_stale(cached.map(|c| c.last_updated), max_age, now))
    }

    // ── Transaction analysis ────────────────────────────────────────

    pub fn save_transaction_analysis(&self, snapshot: &AnalysisSnapshot) -> Result<(), CoreError> {
        self.write(|tx| {
            tx.execute(
                "INSERT OR REPLACE INTO transaction_analysis(period, date, monthly_salary,
                 needs_amount, wants_amount, savings_amount,
                 needs_percent, wants_percent, savings_percent, last_updated)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    snapshot.period.label(),
                    date_key(snapshot.date),
                    snapshot.monthly_salary.to_string(),
                    snapshot.needs_amount.to_string(),
                    snapshot.wants_amount.to_string(),
                    snapshot.savings_amount.to_string(),
                    snapshot.needs_percent.to_string(),
                    snapshot.wants_percent.to_string(),
                    snapshot.savings_percent.to_string(),
                    ts_to_sql(&snapshot.last_updated),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_transaction_analysis(
        &self,
        period: Period,
        date: NaiveDate,
    ) -> Result<Option<AnalysisSnapshot>, CoreError> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                "SELECT monthly_salary, needs_amount, wants_amount, savings_amount,
                 needs_percent, wants_percent, savings_percent, last_updated
                 FROM transaction_analysis WHERE period=?1 AND date=?2",
                params![period.label(), date_key(date)],
                |r| {
                    let mut cols = Vec::with_capacity(8);
                    for i in 0..8 {
                        cols.push(r.get::<_, String>(i)?);
                    }
                    Ok(cols)
                },
            )
            .optional()?;
        let Some(cols) = raw else {
            return Ok(None);
        };

        Ok(Some(AnalysisSnapshot {
            period,
            date,
            monthly_salary: decimal_from_sql(&cols[0])?,
            needs_amount: decimal_from_sql(&cols[1])?,
            wants_amount: decimal_from_sql(&cols[2])?,
            savings_amount: decimal_from_sql(&cols[3])?,
            needs_percent: decimal_from_sql(&cols[4])?,
            wants_percent: decimal_from_sql(&cols[5])?,
            savings_percent: decimal_from_sql(&cols[6])?,
            last_updated: ts_from_sql(&cols[7])?,
        }))
    }

    pub fn is_analysis_stale(
        &self,
        period: Period,
        date: NaiveDate,
        max_age: Duration,
        now: DateTime<Utc>,
    ) -> Result<bool, CoreError> {
        let cached = self.get_transaction_analysis(period, date)?;
        Ok(is_stale(cached.map(|c| c.last_updated), max_age, now))
    }

    // ── Daily calorie summary ───────────────────────────────────────

    pub fn save_daily_calorie_summary(&self, summary: &DailyCalorieSummary) -> Result<(), CoreError> {
        let breakdown = serde_json::to_string(&summary.breakdown)
            .map_err(|e| CoreError::Serialization(e.to_string()))?;
        self.write(|tx| {
            tx.execute(
                "INSERT OR REPLACE INTO calorie_daily_summary(date, total_calories, total_carbs,
                 total_protein, total_fat, breakdown, last_updated)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    date_key(summary.date),
                    summary.total_calories,
                    summary.total_carbs,
                    summary.total_protein,
                    summary.total_fat,
                    breakdown,
                    ts_to_sql(&summary.last_updated),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_daily_calorie_summary(
        &self,
        date: NaiveDate,
    ) -> Result<Option<DailyCalorieSummary>, CoreError> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                "SELECT total_calories, total_carbs, total_protein, total_fat, breakdown, last_updated
                 FROM calorie_daily_summary WHERE date=?1",
                params![date_key(date)],
                |r| {
                    Ok((
                        r.get::<_, i64>(0)?,
                        r.get::<_, i64>(1)?,
                        r.get::<_, i64>(2)?,
                        r.get::<_, i64>(3)?,
                        r.get::<_, String>(4)?,
                        r.get::<_, String>(5)?,
                    ))
                },
            )
            .optional()?;
        let Some((calories, carbs, protein, fat, breakdown, updated)) = raw else {
            return Ok(None);
        };
        let breakdown: Vec<CalorieBreakdownItem> = serde_json::from_str(&breakdown)?;
        Ok(Some(DailyCalorieSummary {
            date,
            total_calories: calories,
            total_carbs: carbs,
            total_protein: protein,
            total_fat: fat,
            breakdown,
            last_updated: ts_from_sql(&updated)?,
        }))
    }

    pub fn is_calorie_summary_stale(
        &self,
        date: NaiveDate,
        max_age: Duration,
        now: DateTime<Utc>,
    ) -> Result<bool, CoreError> {
        let cached = self.get_daily_calorie_summary(date)?;
        Ok(is_stale(cached.map(|c| c.last_updated), max_age, now))
    }

    /// Maintenance: delete every derived cache row. Entities and the queue are untouched.
    pub fn clear_caches(&self) -> Result<(), CoreError> {
        self.write(|tx| {
            tx.execute_batch(
                "DELETE FROM category_totals;
                 DELETE FROM category_totals_meta;
                 DELETE FROM transaction_analysis;
                 DELETE FROM calorie_daily_summary;",
            )?;
            Ok(())
        })?;
        info!("Cleared derived caches");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_cache_is_stale() {
        assert!(is_stale(None, Duration::minutes(5), Utc::now()));
    }

    #[test]
    fn exactly_max_age_is_fresh() {
        let now = Utc::now();
        let max_age = Duration::minutes(5);
        assert!(!is_stale(Some(now - max_age), max_age, now));
    }
}
