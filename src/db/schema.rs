//! Database schema definitions

use rusqlite::Connection;
use tracing::info;

use crate::error::ChallengeError;

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<(), ChallengeError> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        info!("Creating new database schema v{}", SCHEMA_VERSION);
        create_tables(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if current_version < SCHEMA_VERSION {
        info!("Migrating schema from v{} to v{}", current_version, SCHEMA_VERSION);
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else {
        info!("Database schema is up to date (v{})", current_version);
    }

    Ok(())
}

/// Get current schema version (0 if not initialized)
fn get_schema_version(conn: &Connection) -> Result<i32, ChallengeError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        [],
    )
    .map_err(|e| ChallengeError::store("Failed to create schema_version table", e))?;

    let version: Option<i32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(ChallengeError::store("Failed to read schema_version", other)),
        })?;

    Ok(version.unwrap_or(0))
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<(), ChallengeError> {
    conn.execute("DELETE FROM schema_version", [])
        .map_err(|e| ChallengeError::store("Failed to clear schema_version", e))?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?)", [version])
        .map_err(|e| ChallengeError::store("Failed to set schema_version", e))?;
    Ok(())
}

fn create_tables(conn: &Connection) -> Result<(), ChallengeError> {
    conn.execute_batch(CHALLENGE_SCHEMA)
        .map_err(|e| ChallengeError::store("Failed to create challenge tables", e))?;

    conn.execute_batch(ACCOUNT_SCHEMA)
        .map_err(|e| ChallengeError::store("Failed to create account tables", e))?;

    conn.execute_batch(INDEXES_SCHEMA)
        .map_err(|e| ChallengeError::store("Failed to create indexes", e))?;

    Ok(())
}

/// Challenge ledger tables
const CHALLENGE_SCHEMA: &str = r#"
-- One target color per day, immutable once published
CREATE TABLE IF NOT EXISTS daily_targets (
    date TEXT PRIMARY KEY NOT NULL,
    color_name TEXT,
    target_r INTEGER NOT NULL CHECK (target_r BETWEEN 0 AND 255),
    target_g INTEGER NOT NULL CHECK (target_g BETWEEN 0 AND 255),
    target_b INTEGER NOT NULL CHECK (target_b BETWEEN 0 AND 255),
    created_at TEXT NOT NULL
);

-- Attempt ledger: numbers are contiguous from 1 per (user_id, date)
CREATE TABLE IF NOT EXISTS attempts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT NOT NULL,
    date TEXT NOT NULL,
    attempt_number INTEGER NOT NULL CHECK (attempt_number >= 1),
    score INTEGER NOT NULL CHECK (score BETWEEN 0 AND 100),
    submitted_r INTEGER NOT NULL,
    submitted_g INTEGER NOT NULL,
    submitted_b INTEGER NOT NULL,
    target_r INTEGER NOT NULL,
    target_g INTEGER NOT NULL,
    target_b INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE (user_id, date, attempt_number)
);

-- Additive bonus attempts from consumed items
CREATE TABLE IF NOT EXISTS attempt_modifiers (
    user_id TEXT NOT NULL,
    date TEXT NOT NULL,
    extra_attempts INTEGER NOT NULL DEFAULT 0 CHECK (extra_attempts >= 0),
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (user_id, date)
);

-- Best score per (user_id, date)
CREATE TABLE IF NOT EXISTS leaderboard (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT NOT NULL,
    date TEXT NOT NULL,
    best_score INTEGER NOT NULL,
    attempts_used INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE (user_id, date)
);

-- Settlement markers: at most one per (user_id, date)
CREATE TABLE IF NOT EXISTS settlements (
    user_id TEXT NOT NULL,
    date TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'claimed',
    best_score INTEGER NOT NULL DEFAULT 0,
    points_awarded INTEGER NOT NULL DEFAULT 0,
    credits_awarded INTEGER NOT NULL DEFAULT 0,
    levels_gained INTEGER NOT NULL DEFAULT 0,
    claimed_at TEXT NOT NULL,
    applied_at TEXT,
    PRIMARY KEY (user_id, date)
);
"#;

/// Economy subset of the account entity
const ACCOUNT_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS account_economy (
    user_id TEXT PRIMARY KEY NOT NULL,
    points INTEGER NOT NULL DEFAULT 0,
    level INTEGER NOT NULL DEFAULT 1,
    credits INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL
);
"#;

/// Index definitions for fast queries
const INDEXES_SCHEMA: &str = r#"
CREATE INDEX IF NOT EXISTS idx_attempts_user_date ON attempts(user_id, date);
CREATE INDEX IF NOT EXISTS idx_attempts_user ON attempts(user_id);
CREATE INDEX IF NOT EXISTS idx_leaderboard_ranking
    ON leaderboard(date, best_score DESC, attempts_used ASC, updated_at ASC);
"#;
