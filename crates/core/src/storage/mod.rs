//! On-device persistence: entities, derived caches and the sync queue,
//! all in one SQLite database owned by [`LocalStore`].

pub mod cache;
pub mod local_store;
pub mod queue;
pub mod schema;

pub use local_store::{EntityRows, LocalStore};

use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use std::str::FromStr;

use crate::errors::CoreError;

/// Fixed-width UTC RFC 3339 with nanoseconds, so text order equals time order.
pub(crate) fn ts_to_sql(instant: &DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub(crate) fn ts_from_sql(value: &str) -> Result<DateTime<Utc>, CoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| CoreError::Deserialization(format!("invalid timestamp '{value}': {e}")))
}

pub(crate) fn decimal_from_sql(value: &str) -> Result<Decimal, CoreError> {
    Ok(Decimal::from_str(value)?)
}
