use chrono::{DateTime, Datelike, Duration, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Symbolic aggregation window.
///
/// The window is always "from the start of the current calendar unit up to now",
/// evaluated in local time. Every component that filters by period goes through
/// [`Period::window_start`] so the boundaries cannot drift apart.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Day,
    Week,
    #[default]
    Month,
    Year,
}

impl Period {
    /// Parse a period label case-insensitively. Unrecognised labels fall back to `Month`.
    pub fn parse(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "day" | "daily" => Period::Day,
            "week" | "weekly" => Period::Week,
            "month" | "monthly" => Period::Month,
            "year" | "yearly" => Period::Year,
            _ => Period::Month,
        }
    }

    /// Canonical label, used as the cache key.
    pub fn label(&self) -> &'static str {
        match self {
            Period::Day => "daily",
            Period::Week => "weekly",
            Period::Month => "monthly",
            Period::Year => "yearly",
        }
    }

    /// Inclusive lower bound of the window containing `now` (local wall-clock time).
    pub fn window_start(&self, now: NaiveDateTime) -> NaiveDateTime {
        let date = now.date();
        let start = match self {
            Period::Day => date,
            Period::Week => date - Duration::days(i64::from(date.weekday().num_days_from_monday())),
            Period::Month => date.with_day(1).unwrap_or(date),
            Period::Year => NaiveDate::from_ymd_opt(date.year(), 1, 1).unwrap_or(date),
        };
        start.and_time(NaiveTime::MIN)
    }

    /// Same as [`Period::window_start`], for an instant, resolved through the local timezone.
    pub fn window_start_utc(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let local_now = now.with_timezone(&Local).naive_local();
        local_to_utc(self.window_start(local_now))
    }

    /// Half-open window `[start, end)` anchored at a calendar date: from the
    /// period start up to the local midnight that ends `date`.
    pub fn bounds_for_date(&self, date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
        let start = self.window_start(date.and_time(NaiveTime::MIN));
        let next_midnight = (date + Duration::days(1)).and_time(NaiveTime::MIN);
        (local_to_utc(start), local_to_utc(next_midnight))
    }
}

impl std::fmt::Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Resolve a local wall-clock time to an instant.
///
/// Ambiguous times (DST fall-back) take the earlier instant; non-existent
/// times (DST spring-forward gap) move forward one hour.
pub fn local_to_utc(naive: NaiveDateTime) -> DateTime<Utc> {
    Local
        .from_local_datetime(&naive)
        .earliest()
        .or_else(|| Local.from_local_datetime(&(naive + Duration::hours(1))).earliest())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&naive))
}

/// Local calendar date of an instant.
pub fn local_date(instant: DateTime<Utc>) -> NaiveDate {
    instant.with_timezone(&Local).date_naive()
}
