//! SQLite persistence
//!
//! One database file holds watermarks, the large-transaction feed and the
//! reward ledger. Schema files under `sql/` are embedded at compile time and
//! applied in order; every statement uses `IF NOT EXISTS` so opening an
//! existing database is idempotent.

pub mod feed;
pub mod rewards;
pub mod watermarks;

pub use feed::SqliteFeedStore;
pub use rewards::SqliteRewardLedger;
pub use watermarks::SqliteWatermarkStore;

use crate::error::PersistenceError;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

pub type SharedConnection = Arc<Mutex<Connection>>;

const MIGRATIONS: &[(&str, &str)] = &[
    ("00_watermarks.sql", include_str!("../../sql/00_watermarks.sql")),
    ("01_large_transactions.sql", include_str!("../../sql/01_large_transactions.sql")),
    ("02_rewards.sql", include_str!("../../sql/02_rewards.sql")),
    ("03_points.sql", include_str!("../../sql/03_points.sql")),
];

/// Open (or create) the tracker database and apply migrations
pub fn open_database(db_path: impl AsRef<Path>) -> Result<SharedConnection, PersistenceError> {
    let db_path = db_path.as_ref();
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut conn = Connection::open(db_path)?;

    let mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    log::info!("📊 SQLite journal mode: {}", mode);

    run_schema_migrations(&mut conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}

/// In-memory database with the full schema (tests, dry runs)
pub fn open_in_memory() -> Result<SharedConnection, PersistenceError> {
    let mut conn = Connection::open_in_memory()?;
    run_schema_migrations(&mut conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}

pub fn run_schema_migrations(conn: &mut Connection) -> Result<(), PersistenceError> {
    log::debug!("🔧 Running {} schema migrations", MIGRATIONS.len());

    for (name, sql) in MIGRATIONS {
        conn.execute_batch(sql)?;
        log::debug!("   ├─ ✅ {}", name);
    }

    Ok(())
}

pub(crate) fn lock(conn: &SharedConnection) -> Result<MutexGuard<'_, Connection>, PersistenceError> {
    conn.lock().map_err(|_| PersistenceError::Poisoned)
}

pub(crate) fn to_sql_int(value: u64) -> Result<i64, PersistenceError> {
    i64::try_from(value)
        .map_err(|_| PersistenceError::InvalidData(format!("{} exceeds SQLite integer range", value)))
}

pub(crate) fn from_sql_int(value: i64) -> Result<u64, PersistenceError> {
    u64::try_from(value)
        .map_err(|_| PersistenceError::InvalidData(format!("negative stored amount {}", value)))
}

pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, PersistenceError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| PersistenceError::InvalidData(format!("bad timestamp '{}': {}", raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_open_creates_schema_idempotently() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("tracker.db");

        let conn = open_database(&path).unwrap();
        drop(conn);
        let conn = open_database(&path).unwrap();

        let guard = conn.lock().unwrap();
        let tables: i64 = guard
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN
                 ('watermarks', 'large_transactions', 'rewards', 'points_accounts', 'exchange_history')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 5);
    }

    #[test]
    fn test_helpers() {
        assert!(to_sql_int(u64::MAX).is_err());
        assert_eq!(to_sql_int(42).unwrap(), 42);
        assert!(from_sql_int(-1).is_err());
        assert!(parse_timestamp("2024-05-01T12:00:00Z").is_ok());
        assert!(parse_timestamp("yesterday").is_err());
    }
}
