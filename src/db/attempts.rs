//! Attempt ledger rows

use rusqlite::{params, Connection};
use tracing::debug;

use super::models::{current_timestamp, Attempt, UserKey};
use crate::error::{is_constraint_violation, ChallengeError};
use crate::scoring::Rgb;

/// Where the ledger stands for one (user, date)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerPosition {
    pub count: u32,
    pub max_number: u32,
}

impl LedgerPosition {
    /// Contiguous numbering from 1 means the highest number equals the count
    pub fn is_contiguous(&self) -> bool {
        self.count == self.max_number
    }

    pub fn next_number(&self) -> u32 {
        self.max_number + 1
    }
}

/// Fields for a new attempt row
#[derive(Debug, Clone)]
pub struct NewAttempt<'a> {
    pub key: &'a UserKey,
    pub attempt_number: u32,
    pub score: u8,
    pub submitted: Rgb,
    pub target: Rgb,
}

const SELECT_ATTEMPT: &str = r#"
    SELECT id, user_id, date, attempt_number, score,
           submitted_r, submitted_g, submitted_b,
           target_r, target_g, target_b, created_at
    FROM attempts
"#;

/// Count and highest attempt number for a key
pub fn ledger_position(conn: &Connection, key: &UserKey) -> Result<LedgerPosition, ChallengeError> {
    conn.query_row(
        "SELECT COUNT(*), COALESCE(MAX(attempt_number), 0) FROM attempts WHERE user_id = ? AND date = ?",
        params![key.user_id, key.date_str()],
        |row| {
            Ok(LedgerPosition {
                count: row.get(0)?,
                max_number: row.get(1)?,
            })
        },
    )
    .map_err(|e| ChallengeError::store("Attempt count failed", e))
}

/// Insert an attempt. `Ok(None)` means the attempt number is already taken.
pub fn insert_attempt(conn: &Connection, input: &NewAttempt) -> Result<Option<Attempt>, ChallengeError> {
    let created_at = current_timestamp();

    let result = conn.execute(
        r#"
        INSERT INTO attempts (
            user_id, date, attempt_number, score,
            submitted_r, submitted_g, submitted_b,
            target_r, target_g, target_b, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        params![
            input.key.user_id,
            input.key.date_str(),
            input.attempt_number,
            input.score,
            input.submitted.r,
            input.submitted.g,
            input.submitted.b,
            input.target.r,
            input.target.g,
            input.target.b,
            created_at,
        ],
    );

    match result {
        Ok(_) => {}
        Err(e) if is_constraint_violation(&e) => {
            debug!(key = %input.key, number = input.attempt_number, "Attempt number already taken");
            return Ok(None);
        }
        Err(e) => return Err(ChallengeError::store("Attempt insert failed", e)),
    }

    Ok(Some(Attempt {
        id: conn.last_insert_rowid(),
        user_id: input.key.user_id.clone(),
        date: input.key.date,
        attempt_number: input.attempt_number,
        score: input.score,
        submitted: input.submitted,
        target: input.target,
        created_at,
    }))
}

/// All attempts for a key, in attempt order
pub fn get_attempts_for_day(conn: &Connection, key: &UserKey) -> Result<Vec<Attempt>, ChallengeError> {
    let sql = format!(
        "{} WHERE user_id = ? AND date = ? ORDER BY attempt_number ASC",
        SELECT_ATTEMPT
    );
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| ChallengeError::store("Prepare failed", e))?;

    let rows = stmt
        .query_map(params![key.user_id, key.date_str()], Attempt::from_row)
        .map_err(|e| ChallengeError::store("Query failed", e))?;

    rows.collect::<Result<Vec<_>, _>>()
        .map_err(|e| ChallengeError::store("Row parse failed", e))
}

/// Every attempt a user has made, newest day first
pub fn get_user_history(conn: &Connection, user_id: &str, limit: u32) -> Result<Vec<Attempt>, ChallengeError> {
    let sql = format!(
        "{} WHERE user_id = ? ORDER BY date DESC, attempt_number ASC LIMIT ?",
        SELECT_ATTEMPT
    );
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| ChallengeError::store("Prepare failed", e))?;

    let rows = stmt
        .query_map(params![user_id, limit], Attempt::from_row)
        .map_err(|e| ChallengeError::store("Query failed", e))?;

    rows.collect::<Result<Vec<_>, _>>()
        .map_err(|e| ChallengeError::store("Row parse failed", e))
}

/// Highest score and the first attempt that reached it, straight from the ledger
pub fn best_from_ledger(conn: &Connection, key: &UserKey) -> Result<Option<(u8, u32)>, ChallengeError> {
    let result = conn.query_row(
        r#"
        SELECT score, attempt_number FROM attempts
        WHERE user_id = ? AND date = ?
        ORDER BY score DESC, attempt_number ASC
        LIMIT 1
        "#,
        params![key.user_id, key.date_str()],
        |row| Ok((row.get(0)?, row.get(1)?)),
    );

    match result {
        Ok(best) => Ok(Some(best)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(ChallengeError::store("Best score query failed", e)),
    }
}

/// Delete every attempt for a key
pub fn delete_for_day(conn: &Connection, key: &UserKey) -> Result<usize, ChallengeError> {
    conn.execute(
        "DELETE FROM attempts WHERE user_id = ? AND date = ?",
        params![key.user_id, key.date_str()],
    )
    .map_err(|e| ChallengeError::store("Attempt delete failed", e))
}
