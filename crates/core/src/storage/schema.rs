use rusqlite::Connection;
use tracing::{debug, info};

use crate::errors::CoreError;

/// Schema version written to `PRAGMA user_version`.
pub const CURRENT_SCHEMA_VERSION: i64 = 2;

/// Ordered migrations; entry `i` upgrades a database from version `i` to `i + 1`.
const MIGRATIONS: &[&str] = &[
    // v1: entities, derived caches, sync queue
    r#"
    CREATE TABLE IF NOT EXISTS transactions(
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        amount TEXT NOT NULL,
        category TEXT NOT NULL,
        description TEXT NOT NULL,
        merchant TEXT,
        timestamp TEXT NOT NULL,
        source TEXT NOT NULL,
        metadata TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_transactions_timestamp ON transactions(timestamp);

    CREATE TABLE IF NOT EXISTS calorie_entries(
        id TEXT PRIMARY KEY,
        food_item TEXT NOT NULL,
        calories INTEGER NOT NULL,
        protein INTEGER,
        carbs INTEGER,
        fat INTEGER,
        quantity TEXT NOT NULL,
        unit TEXT NOT NULL,
        timestamp TEXT NOT NULL,
        synced INTEGER NOT NULL DEFAULT 0,
        server_id TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_calorie_entries_timestamp ON calorie_entries(timestamp);

    CREATE TABLE IF NOT EXISTS category_totals(
        period TEXT NOT NULL,
        category TEXT NOT NULL,
        total TEXT NOT NULL,
        last_updated TEXT NOT NULL,
        PRIMARY KEY(period, category)
    );

    CREATE TABLE IF NOT EXISTS transaction_analysis(
        period TEXT NOT NULL,
        date TEXT NOT NULL,
        monthly_salary TEXT NOT NULL,
        needs_amount TEXT NOT NULL,
        wants_amount TEXT NOT NULL,
        savings_amount TEXT NOT NULL,
        needs_percent TEXT NOT NULL,
        wants_percent TEXT NOT NULL,
        savings_percent TEXT NOT NULL,
        last_updated TEXT NOT NULL,
        PRIMARY KEY(period, date)
    );

    CREATE TABLE IF NOT EXISTS calorie_daily_summary(
        date TEXT PRIMARY KEY,
        total_calories INTEGER NOT NULL,
        total_carbs INTEGER NOT NULL,
        total_protein INTEGER NOT NULL,
        total_fat INTEGER NOT NULL,
        breakdown TEXT NOT NULL,
        last_updated TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS sync_queue(
        id TEXT PRIMARY KEY,
        entity_type TEXT NOT NULL,
        entity_id TEXT NOT NULL,
        operation TEXT NOT NULL CHECK(operation IN ('create','update','delete')),
        payload TEXT NOT NULL,
        created_at TEXT NOT NULL,
        attempt_count INTEGER NOT NULL DEFAULT 0,
        last_attempt_at TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_sync_queue_created ON sync_queue(created_at);
    CREATE INDEX IF NOT EXISTS idx_sync_queue_entity ON sync_queue(entity_type, entity_id);
    "#,
    // v2: per-period timestamp for category totals, so an empty period is cacheable
    r#"
    CREATE TABLE IF NOT EXISTS category_totals_meta(
        period TEXT PRIMARY KEY,
        last_updated TEXT NOT NULL
    );
    INSERT OR IGNORE INTO category_totals_meta(period, last_updated)
        SELECT period, MIN(last_updated) FROM category_totals GROUP BY period;
    "#,
];

/// Bring the database up to [`CURRENT_SCHEMA_VERSION`], one migration per transaction.
pub fn migrate(conn: &mut Connection) -> Result<(), CoreError> {
    let version: i64 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    if version > CURRENT_SCHEMA_VERSION {
        return Err(CoreError::Storage(format!(
            "database schema v{version} is newer than supported v{CURRENT_SCHEMA_VERSION}"
        )));
    }
    if version == CURRENT_SCHEMA_VERSION {
        debug!(version, "Schema up to date");
        return Ok(());
    }

    for (index, sql) in MIGRATIONS.iter().enumerate().skip(version as usize) {
        let target = index as i64 + 1;
        let tx = conn.transaction()?;
        tx.execute_batch(sql)?;
        tx.pragma_update(None, "user_version", target)?;
        tx.commit()?;
        info!(from = target - 1, to = target, "Applied schema migration");
    }
    Ok(())
}

/// Schema version of an open database.
pub fn schema_version(conn: &Connection) -> Result<i64, CoreError> {
    Ok(conn.query_row("PRAGMA user_version", [], |r| r.get(0))?)
}
