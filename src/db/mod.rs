//! SQLite database module for the daily challenge ledger
//!
//! ## Tables
//!
//! - `daily_targets` - Published target color per day
//! - `attempts` - Attempt ledger, unique on (user_id, date, attempt_number)
//! - `attempt_modifiers` - Additive extra-attempt grants per (user_id, date)
//! - `leaderboard` - Best score per (user_id, date)
//! - `settlements` - One settlement marker per (user_id, date)
//! - `account_economy` - Points, level and credits per user
//!
//! Each module below exposes plain functions over a `Connection` (or an
//! open `Transaction`, which derefs to one) so services can compose several
//! of them inside a single transaction.

pub mod schema;
pub mod models;
pub mod attempts;
pub mod modifiers;
pub mod leaderboard;
pub mod settlements;
pub mod targets;
pub mod accounts;

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use rusqlite::{Connection, Transaction, TransactionBehavior};
use tracing::{debug, info};

use crate::error::ChallengeError;

/// Default time SQLite waits on a locked database before reporting BUSY
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

/// SQLite database for the challenge ledger
pub struct ChallengeDb {
    conn: Mutex<Connection>,
}

impl ChallengeDb {
    /// Open or create the challenge database at `db_path`
    pub fn open(db_path: &Path, busy_timeout: Duration) -> Result<Self, ChallengeError> {
        info!("Opening SQLite database at {:?}", db_path);

        let conn = Connection::open(db_path)
            .map_err(|e| ChallengeError::store("Failed to open SQLite", e))?;

        conn.busy_timeout(busy_timeout)
            .map_err(|e| ChallengeError::store("Failed to set busy timeout", e))?;

        // WAL for concurrent readers; NORMAL is durable enough under WAL.
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| ChallengeError::store("Failed to set PRAGMA", e))?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;

        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self, ChallengeError> {
        debug!("Opening in-memory SQLite database");

        let conn = Connection::open_in_memory()
            .map_err(|e| ChallengeError::store("Failed to open in-memory SQLite", e))?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;

        Ok(db)
    }

    fn init_schema(&self) -> Result<(), ChallengeError> {
        self.with_conn(schema::init_schema)
    }

    /// Run a read with the connection
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, ChallengeError>
    where
        F: FnOnce(&Connection) -> Result<T, ChallengeError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| ChallengeError::Internal(format!("Lock poisoned: {}", e)))?;
        f(&conn)
    }

    /// Run a write (typically a transaction) with exclusive access
    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T, ChallengeError>
    where
        F: FnOnce(&mut Connection) -> Result<T, ChallengeError>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| ChallengeError::Internal(format!("Lock poisoned: {}", e)))?;
        f(&mut conn)
    }

    /// Run `f` inside an IMMEDIATE transaction, committing on `Ok`.
    ///
    /// The write lock is taken up front, so the reads inside `f` see state no
    /// other writer can change before commit. Dropping the transaction on
    /// `Err` rolls it back.
    pub fn with_immediate_tx<F, T>(&self, f: F) -> Result<T, ChallengeError>
    where
        F: FnOnce(&Transaction) -> Result<T, ChallengeError>,
    {
        self.with_conn_mut(|conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(|e| ChallengeError::store("Failed to begin transaction", e))?;
            let value = f(&tx)?;
            tx.commit()
                .map_err(|e| ChallengeError::store("Failed to commit transaction", e))?;
            Ok(value)
        })
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<DbStats, ChallengeError> {
        self.with_conn(|conn| {
            let count = |sql: &str| -> Result<u64, ChallengeError> {
                conn.query_row(sql, [], |row| row.get::<_, i64>(0))
                    .map(|n| n.max(0) as u64)
                    .map_err(|e| ChallengeError::store("Query failed", e))
            };

            Ok(DbStats {
                target_count: count("SELECT COUNT(*) FROM daily_targets")?,
                attempt_count: count("SELECT COUNT(*) FROM attempts")?,
                leaderboard_count: count("SELECT COUNT(*) FROM leaderboard")?,
                settlement_count: count("SELECT COUNT(*) FROM settlements")?,
            })
        })
    }
}

/// Database statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct DbStats {
    pub target_count: u64,
    pub attempt_count: u64,
    pub leaderboard_count: u64,
    pub settlement_count: u64,
}

// Re-exports
pub use models::{
    Attempt, AttemptModifier, DailyTarget, EconomyDelta, LeaderboardEntry, RankedEntry,
    SettlementRecord, SettlementStatus, UserEconomy, UserKey,
};

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_in_memory_has_empty_stats() {
        let db = ChallengeDb::open_in_memory().unwrap();
        let stats = db.stats().unwrap();
        assert_eq!(stats.attempt_count, 0);
        assert_eq!(stats.target_count, 0);
    }

    #[test]
    fn test_failed_transaction_rolls_back() {
        let db = ChallengeDb::open_in_memory().unwrap();

        let result: Result<(), _> = db.with_immediate_tx(|tx| {
            tx.execute(
                "INSERT INTO daily_targets (date, target_r, target_g, target_b, created_at) VALUES ('2024-01-01', 1, 2, 3, 'now')",
                [],
            )?;
            Err(ChallengeError::Internal("abort".into()))
        });
        assert!(result.is_err());
        assert_eq!(db.stats().unwrap().target_count, 0);
    }

    #[test]
    fn test_reopen_keeps_schema() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("challenge.db");
        {
            let db = ChallengeDb::open(&path, DEFAULT_BUSY_TIMEOUT).unwrap();
            assert_eq!(db.stats().unwrap().settlement_count, 0);
        }
        let db = ChallengeDb::open(&path, DEFAULT_BUSY_TIMEOUT).unwrap();
        let version: i32 = db
            .with_conn(|conn| {
                conn.query_row("SELECT version FROM schema_version", [], |r| r.get(0))
                    .map_err(ChallengeError::from)
            })
            .unwrap();
        assert_eq!(version, schema::SCHEMA_VERSION);
    }
}
