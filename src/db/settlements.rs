//! Settlement markers
//!
//! Claiming inserts the row; a second claim for the same key finds it and
//! loses. `release` removes a claim whose account mutation failed.

use rusqlite::{params, Connection};

use super::models::{current_timestamp, SettlementRecord, SettlementStatus, UserKey};
use crate::error::ChallengeError;

/// Awards written onto an applied marker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppliedAward {
    pub best_score: u8,
    pub points_awarded: i64,
    pub credits_awarded: i64,
    pub levels_gained: i64,
}

/// Try to claim the marker. `true` means this caller owns the settlement.
pub fn try_claim(conn: &Connection, key: &UserKey) -> Result<bool, ChallengeError> {
    let inserted = conn
        .execute(
            r#"
            INSERT OR IGNORE INTO settlements (user_id, date, status, claimed_at)
            VALUES (?, ?, ?, ?)
            "#,
            params![
                key.user_id,
                key.date_str(),
                SettlementStatus::Claimed.as_str(),
                current_timestamp()
            ],
        )
        .map_err(|e| ChallengeError::store("Settlement claim failed", e))?;

    Ok(inserted == 1)
}

/// Record the awards and flip the marker to applied
pub fn mark_applied(conn: &Connection, key: &UserKey, award: &AppliedAward) -> Result<(), ChallengeError> {
    let updated = conn
        .execute(
            r#"
            UPDATE settlements
            SET status = ?, best_score = ?, points_awarded = ?, credits_awarded = ?,
                levels_gained = ?, applied_at = ?
            WHERE user_id = ? AND date = ? AND status = ?
            "#,
            params![
                SettlementStatus::Applied.as_str(),
                award.best_score,
                award.points_awarded,
                award.credits_awarded,
                award.levels_gained,
                current_timestamp(),
                key.user_id,
                key.date_str(),
                SettlementStatus::Claimed.as_str(),
            ],
        )
        .map_err(|e| ChallengeError::store("Settlement update failed", e))?;

    if updated != 1 {
        return Err(ChallengeError::InvariantViolation(format!(
            "settlement marker for {} was not in claimed state",
            key
        )));
    }
    Ok(())
}

/// Drop a claimed marker so a later call can settle
pub fn release(conn: &Connection, key: &UserKey) -> Result<(), ChallengeError> {
    conn.execute(
        "DELETE FROM settlements WHERE user_id = ? AND date = ? AND status = ?",
        params![key.user_id, key.date_str(), SettlementStatus::Claimed.as_str()],
    )
    .map_err(|e| ChallengeError::store("Settlement release failed", e))?;
    Ok(())
}

pub fn get(conn: &Connection, key: &UserKey) -> Result<Option<SettlementRecord>, ChallengeError> {
    let result = conn.query_row(
        r#"
        SELECT user_id, date, status, best_score, points_awarded, credits_awarded,
               levels_gained, claimed_at, applied_at
        FROM settlements
        WHERE user_id = ? AND date = ?
        "#,
        params![key.user_id, key.date_str()],
        SettlementRecord::from_row,
    );

    match result {
        Ok(record) => Ok(Some(record)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(ChallengeError::store("Settlement query failed", e)),
    }
}

/// Delete the marker in any state. Returns whether one existed.
pub fn delete_for_day(conn: &Connection, key: &UserKey) -> Result<bool, ChallengeError> {
    let deleted = conn
        .execute(
            "DELETE FROM settlements WHERE user_id = ? AND date = ?",
            params![key.user_id, key.date_str()],
        )
        .map_err(|e| ChallengeError::store("Settlement delete failed", e))?;
    Ok(deleted > 0)
}
