//! Extra-attempt modifier rows
//!
//! Grants are additive upserts: the stored value only ever grows.

use rusqlite::{params, Connection};

use super::models::{current_timestamp, AttemptModifier, UserKey};
use crate::error::ChallengeError;

/// Extra attempts for a key (0 when nothing was granted)
pub fn get_extra_attempts(conn: &Connection, key: &UserKey) -> Result<u32, ChallengeError> {
    Ok(get_modifier(conn, key)?.map(|m| m.extra_attempts).unwrap_or(0))
}

/// Full modifier row for a key
pub fn get_modifier(conn: &Connection, key: &UserKey) -> Result<Option<AttemptModifier>, ChallengeError> {
    let result = conn.query_row(
        r#"
        SELECT user_id, date, extra_attempts, created_at, updated_at
        FROM attempt_modifiers
        WHERE user_id = ? AND date = ?
        "#,
        params![key.user_id, key.date_str()],
        AttemptModifier::from_row,
    );

    match result {
        Ok(modifier) => Ok(Some(modifier)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(ChallengeError::store("Modifier query failed", e)),
    }
}

/// Add `extra` attempts to a key and return the new total
pub fn add_extra_attempts(conn: &Connection, key: &UserKey, extra: u32) -> Result<u32, ChallengeError> {
    let now = current_timestamp();

    conn.query_row(
        r#"
        INSERT INTO attempt_modifiers (user_id, date, extra_attempts, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(user_id, date) DO UPDATE SET
            extra_attempts = attempt_modifiers.extra_attempts + excluded.extra_attempts,
            updated_at = excluded.updated_at
        RETURNING extra_attempts
        "#,
        params![key.user_id, key.date_str(), extra, now, now],
        |row| row.get(0),
    )
    .map_err(|e| ChallengeError::store("Failed to grant extra attempts", e))
}
