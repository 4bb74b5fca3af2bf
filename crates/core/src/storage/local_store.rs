use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{
    params, params_from_iter, Connection, OptionalExtension, Row, Transaction as SqlTransaction,
};
use tracing::{debug, info};

use super::{decimal_from_sql, schema, ts_from_sql, ts_to_sql};
use crate::errors::CoreError;
use crate::models::calorie::CalorieEntry;
use crate::models::category::Category;
use crate::models::period::{local_date, Period};
use crate::models::sync::EntityType;
use crate::models::transaction::{Transaction, TransactionSource};

const TRANSACTION_COLUMNS: &str =
    "id, user_id, amount, category, description, merchant, timestamp, source, metadata";

const CALORIE_COLUMNS: &str =
    "id, food_item, calories, protein, carbs, fat, quantity, unit, timestamp, synced, server_id";

/// `?1` inclusive lower bound, `?2` inclusive upper bound, `?3` exclusive upper bound; NULL skips.
const RANGE_FILTER: &str = "(?1 IS NULL OR timestamp >= ?1)
     AND (?2 IS NULL OR timestamp <= ?2)
     AND (?3 IS NULL OR timestamp < ?3)";

/// Rows returned by [`LocalStore::query_by_period`].
#[derive(Debug, Clone, PartialEq)]
pub enum EntityRows {
    Transactions(Vec<Transaction>),
    CalorieEntries(Vec<CalorieEntry>),
}

impl EntityRows {
    pub fn len(&self) -> usize {
        match self {
            EntityRows::Transactions(rows) => rows.len(),
            EntityRows::CalorieEntries(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Single source of truth on the device.
///
/// Every multi-row write runs inside one SQLite transaction, and the
/// connection sits behind a mutex, so readers never observe half a write.
/// Storage faults are returned as [`CoreError::Storage`] and never swallowed here.
pub struct LocalStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStore").finish_non_exhaustive()
    }
}

impl LocalStore {
    /// Open (or create) the database at `path` and migrate it.
    pub fn open(path: &Path) -> Result<Self, CoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .map_err(|e| CoreError::Storage(format!("open {}: {e}", path.display())))?;
        info!(path = %path.display(), "Opened local store");
        Self::init(conn)
    }

    /// Private in-memory database, mostly for tests.
    pub fn open_in_memory() -> Result<Self, CoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(mut conn: Connection) -> Result<Self, CoreError> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        schema::migrate(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>, CoreError> {
        self.conn
            .lock()
            .map_err(|_| CoreError::Storage("local store lock poisoned".into()))
    }

    /// Run `f` inside one SQLite transaction; commits only if `f` succeeds.
    pub(crate) fn write<T>(
        &self,
        f: impl FnOnce(&SqlTransaction<'_>) -> Result<T, CoreError>,
    ) -> Result<T, CoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    pub fn schema_version(&self) -> Result<i64, CoreError> {
        let conn = self.lock()?;
        schema::schema_version(&conn)
    }

    // ── Transactions ────────────────────────────────────────────────

    pub fn insert_transaction(&self, transaction: &Transaction) -> Result<(), CoreError> {
        self.insert_transactions(std::slice::from_ref(transaction))
    }

    /// Insert all rows atomically: either every row is visible afterwards or none is.
    pub fn insert_transactions(&self, transactions: &[Transaction]) -> Result<(), CoreError> {
        self.write(|tx| {
            for t in transactions {
                insert_transaction_row(tx, t)?;
            }
            super::cache::invalidate_transaction_caches(tx)?;
            Ok(())
        })?;
        debug!(count = transactions.len(), "Inserted transactions");
        Ok(())
    }

    /// Full-row replace. Fails with `NotFound` when the id does not exist.
    pub fn update_transaction(&self, transaction: &Transaction) -> Result<(), CoreError> {
        self.write(|tx| {
            let changed = tx.execute(
                "UPDATE transactions SET user_id=?2, amount=?3, category=?4, description=?5,
                 merchant=?6, timestamp=?7, source=?8, metadata=?9 WHERE id=?1",
                params![
                    transaction.id,
                    transaction.user_id,
                    transaction.amount.to_string(),
                    transaction.category.as_key(),
                    transaction.description,
                    transaction.merchant,
                    ts_to_sql(&transaction.timestamp),
                    transaction.source.as_key(),
                    metadata_to_sql(transaction)?,
                ],
            )?;
            if changed == 0 {
                return Err(CoreError::not_found("Transaction", &transaction.id));
            }
            super::cache::invalidate_transaction_caches(tx)
        })
    }

    /// Returns whether a row was removed.
    pub fn delete_transaction(&self, id: &str) -> Result<bool, CoreError> {
        self.write(|tx| {
            let removed = tx.execute("DELETE FROM transactions WHERE id=?1", params![id])? > 0;
            if removed {
                super::cache::invalidate_transaction_caches(tx)?;
            }
            Ok(removed)
        })
    }

    pub fn get_transaction(&self, id: &str) -> Result<Option<Transaction>, CoreError> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                &format!("SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE id=?1"),
                params![id],
                TransactionRow::read,
            )
            .optional()?;
        raw.map(TransactionRow::into_model).transpose()
    }

    /// Every transaction, newest first.
    pub fn list_transactions(&self) -> Result<Vec<Transaction>, CoreError> {
        self.transactions_between(None, None)
    }

    /// Transactions with `from <= timestamp` (and `timestamp <= to` when given), newest first.
    pub fn transactions_between(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<Transaction>, CoreError> {
        self.select_transactions(from, to, None)
    }

    /// Transactions with `from <= timestamp < until`, newest first.
    pub fn transactions_in_window(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<Transaction>, CoreError> {
        self.select_transactions(Some(from), None, Some(until))
    }

    fn select_transactions(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Result<Vec<Transaction>, CoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE {RANGE_FILTER}
             ORDER BY timestamp DESC, id ASC"
        ))?;
        let rows = stmt
            .query_map(params_from_iter(range_params(from, to, until)), TransactionRow::read)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(TransactionRow::into_model).collect()
    }

    // ── Calorie entries ─────────────────────────────────────────────

    pub fn insert_calorie_entry(&self, entry: &CalorieEntry) -> Result<(), CoreError> {
        self.insert_calorie_entries(std::slice::from_ref(entry))
    }

    pub fn insert_calorie_entries(&self, entries: &[CalorieEntry]) -> Result<(), CoreError> {
        self.write(|tx| {
            for e in entries {
                insert_calorie_row(tx, e)?;
                super::cache::invalidate_calorie_summary(tx, local_date(e.timestamp))?;
            }
            Ok(())
        })?;
        debug!(count = entries.len(), "Inserted calorie entries");
        Ok(())
    }

    pub fn update_calorie_entry(&self, entry: &CalorieEntry) -> Result<(), CoreError> {
        self.write(|tx| {
            let previous: Option<String> = tx
                .query_row(
                    "SELECT timestamp FROM calorie_entries WHERE id=?1",
                    params![entry.id],
                    |r| r.get(0),
                )
                .optional()?;
            let Some(previous) = previous else {
                return Err(CoreError::not_found("CalorieEntry", &entry.id));
            };
            tx.execute(
                "UPDATE calorie_entries SET food_item=?2, calories=?3, protein=?4, carbs=?5,
                 fat=?6, quantity=?7, unit=?8, timestamp=?9, synced=?10, server_id=?11 WHERE id=?1",
                params![
                    entry.id,
                    entry.food_item,
                    entry.calories,
                    entry.protein,
                    entry.carbs,
                    entry.fat,
                    entry.quantity.to_string(),
                    entry.unit,
                    ts_to_sql(&entry.timestamp),
                    entry.synced,
                    entry.server_id,
                ],
            )?;
            super::cache::invalidate_calorie_summary(tx, local_date(ts_from_sql(&previous)?))?;
            super::cache::invalidate_calorie_summary(tx, local_date(entry.timestamp))
        })
    }

    pub fn delete_calorie_entry(&self, id: &str) -> Result<bool, CoreError> {
        self.write(|tx| {
            let timestamp: Option<String> = tx
                .query_row(
                    "SELECT timestamp FROM calorie_entries WHERE id=?1",
                    params![id],
                    |r| r.get(0),
                )
                .optional()?;
            let Some(timestamp) = timestamp else {
                return Ok(false);
            };
            tx.execute("DELETE FROM calorie_entries WHERE id=?1", params![id])?;
            super::cache::invalidate_calorie_summary(tx, local_date(ts_from_sql(&timestamp)?))?;
            Ok(true)
        })
    }

    /// Record remote acknowledgement. Missing rows (deleted meanwhile) are ignored.
    pub fn mark_calorie_entry_synced(
        &self,
        id: &str,
        server_id: Option<&str>,
    ) -> Result<(), CoreError> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE calorie_entries SET synced=1, server_id=COALESCE(?2, server_id) WHERE id=?1",
            params![id, server_id],
        )?;
        Ok(())
    }

    /// Store the id the service assigned without touching the synced flag.
    pub fn set_calorie_server_id(&self, id: &str, server_id: &str) -> Result<(), CoreError> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE calorie_entries SET server_id=?2 WHERE id=?1",
            params![id, server_id],
        )?;
        Ok(())
    }

    pub fn get_calorie_entry(&self, id: &str) -> Result<Option<CalorieEntry>, CoreError> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                &format!("SELECT {CALORIE_COLUMNS} FROM calorie_entries WHERE id=?1"),
                params![id],
                CalorieRow::read,
            )
            .optional()?;
        raw.map(CalorieRow::into_model).transpose()
    }

    /// Entries with `from <= timestamp` (and `timestamp <= to` when given), newest first.
    pub fn calorie_entries_between(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<CalorieEntry>, CoreError> {
        self.select_calorie_entries(from, to, None)
    }

    /// Entries with `from <= timestamp < until`, newest first.
    pub fn calorie_entries_in_window(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<CalorieEntry>, CoreError> {
        self.select_calorie_entries(Some(from), None, Some(until))
    }

    fn select_calorie_entries(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Result<Vec<CalorieEntry>, CoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {CALORIE_COLUMNS} FROM calorie_entries WHERE {RANGE_FILTER}
             ORDER BY timestamp DESC, id ASC"
        ))?;
        let rows = stmt
            .query_map(params_from_iter(range_params(from, to, until)), CalorieRow::read)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(CalorieRow::into_model).collect()
    }

    // ── Period queries ──────────────────────────────────────────────

    /// All rows of `kind` from the start of the period containing `now`, newest first.
    ///
    /// `period_label` is parsed with [`Period::parse`]; unknown labels mean "month".
    pub fn query_by_period(
        &self,
        kind: EntityType,
        period_label: &str,
        now: DateTime<Utc>,
    ) -> Result<EntityRows, CoreError> {
        let from = Period::parse(period_label).window_start_utc(now);
        match kind {
            EntityType::Transaction => Ok(EntityRows::Transactions(
                self.transactions_between(Some(from), None)?,
            )),
            EntityType::CalorieEntry => Ok(EntityRows::CalorieEntries(
                self.calorie_entries_between(Some(from), None)?,
            )),
        }
    }

    /// Rows of `kind` with `from <= timestamp <= to`, newest first.
    pub fn query_between(
        &self,
        kind: EntityType,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<EntityRows, CoreError> {
        match kind {
            EntityType::Transaction => Ok(EntityRows::Transactions(
                self.transactions_between(Some(from), Some(to))?,
            )),
            EntityType::CalorieEntry => Ok(EntityRows::CalorieEntries(
                self.calorie_entries_between(Some(from), Some(to))?,
            )),
        }
    }

    pub fn transactions_by_period(
        &self,
        period: Period,
        now: DateTime<Utc>,
    ) -> Result<Vec<Transaction>, CoreError> {
        self.transactions_between(Some(period.window_start_utc(now)), None)
    }

    pub fn calorie_entries_by_period(
        &self,
        period: Period,
        now: DateTime<Utc>,
    ) -> Result<Vec<CalorieEntry>, CoreError> {
        self.calorie_entries_between(Some(period.window_start_utc(now)), None)
    }

    // ── Maintenance ─────────────────────────────────────────────────

    /// Drop every table's rows, entities and queue included.
    pub fn clear_all(&self) -> Result<(), CoreError> {
        self.write(|tx| {
            tx.execute_batch(
                "DELETE FROM transactions;
                 DELETE FROM calorie_entries;
                 DELETE FROM category_totals;
                 DELETE FROM category_totals_meta;
                 DELETE FROM transaction_analysis;
                 DELETE FROM calorie_daily_summary;
                 DELETE FROM sync_queue;",
            )?;
            Ok(())
        })?;
        info!("Cleared local store");
        Ok(())
    }
}

// ── Row mapping ─────────────────────────────────────────────────────

fn range_params(
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
    until: Option<DateTime<Utc>>,
) -> [Option<String>; 3] {
    [from, to, until].map(|bound| bound.as_ref().map(ts_to_sql))
}

fn metadata_to_sql(transaction: &Transaction) -> Result<Option<String>, CoreError> {
    transaction
        .metadata
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| CoreError::Serialization(e.to_string()))
}

fn insert_transaction_row(tx: &SqlTransaction<'_>, t: &Transaction) -> Result<(), CoreError> {
    tx.execute(
        &format!("INSERT INTO transactions({TRANSACTION_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"),
        params![
            t.id,
            t.user_id,
            t.amount.to_string(),
            t.category.as_key(),
            t.description,
            t.merchant,
            ts_to_sql(&t.timestamp),
            t.source.as_key(),
            metadata_to_sql(t)?,
        ],
    )?;
    Ok(())
}

fn insert_calorie_row(tx: &SqlTransaction<'_>, e: &CalorieEntry) -> Result<(), CoreError> {
    tx.execute(
        &format!("INSERT INTO calorie_entries({CALORIE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"),
        params![
            e.id,
            e.food_item,
            e.calories,
            e.protein,
            e.carbs,
            e.fat,
            e.quantity.to_string(),
            e.unit,
            ts_to_sql(&e.timestamp),
            e.synced,
            e.server_id,
        ],
    )?;
    Ok(())
}

/// Raw column values; parsed into the model outside the rusqlite callback
/// so parse failures surface as `CoreError` rather than SQL errors.
struct TransactionRow {
    id: String,
    user_id: String,
    amount: String,
    category: String,
    description: String,
    merchant: Option<String>,
    timestamp: String,
    source: String,
    metadata: Option<String>,
}

impl TransactionRow {
    fn read(r: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: r.get(0)?,
            user_id: r.get(1)?,
            amount: r.get(2)?,
            category: r.get(3)?,
            description: r.get(4)?,
            merchant: r.get(5)?,
            timestamp: r.get(6)?,
            source: r.get(7)?,
            metadata: r.get(8)?,
        })
    }

    fn into_model(self) -> Result<Transaction, CoreError> {
        Ok(Transaction {
            amount: decimal_from_sql(&self.amount)?,
            category: Category::from_str(&self.category)?,
            timestamp: ts_from_sql(&self.timestamp)?,
            source: TransactionSource::from_str(&self.source)?,
            metadata: self
                .metadata
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            id: self.id,
            user_id: self.user_id,
            description: self.description,
            merchant: self.merchant,
        })
    }
}

struct CalorieRow {
    id: String,
    food_item: String,
    calories: i64,
    protein: Option<i64>,
    carbs: Option<i64>,
    fat: Option<i64>,
    quantity: String,
    unit: String,
    timestamp: String,
    synced: bool,
    server_id: Option<String>,
}

impl CalorieRow {
    fn read(r: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: r.get(0)?,
            food_item: r.get(1)?,
            calories: r.get(2)?,
            protein: r.get(3)?,
            carbs: r.get(4)?,
            fat: r.get(5)?,
            quantity: r.get(6)?,
            unit: r.get(7)?,
            timestamp: r.get(8)?,
            synced: r.get(9)?,
            server_id: r.get(10)?,
        })
    }

    fn into_model(self) -> Result<CalorieEntry, CoreError> {
        Ok(CalorieEntry {
            quantity: decimal_from_sql(&self.quantity)?,
            timestamp: ts_from_sql(&self.timestamp)?,
            id: self.id,
            food_item: self.food_item,
            calories: self.calories,
            protein: self.protein,
            carbs: self.carbs,
            fat: self.fat,
            unit: self.unit,
            synced: self.synced,
            server_id: self.server_id,
        })
    }
}
