//! Leaderboard rows and ranking queries
//!
//! One row per (user, date). A row only changes on a strict improvement,
//! so `attempts_used` always points at the first attempt that reached the
//! best score.

use chrono::NaiveDate;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use super::models::{current_timestamp, format_date, Attempt, LeaderboardEntry, RankedEntry, UserKey};
use crate::error::ChallengeError;

/// Outcome of folding one attempt into the leaderboard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordResult {
    pub is_new_best: bool,
    pub best_score: u8,
    pub attempts_used_for_best: u32,
}

const RANK_ORDER: &str = "best_score DESC, attempts_used ASC, updated_at ASC, id ASC";

pub fn get_entry(conn: &Connection, key: &UserKey) -> Result<Option<LeaderboardEntry>, ChallengeError> {
    let result = conn.query_row(
        r#"
        SELECT id, user_id, date, best_score, attempts_used, created_at, updated_at
        FROM leaderboard
        WHERE user_id = ? AND date = ?
        "#,
        params![key.user_id, key.date_str()],
        LeaderboardEntry::from_row,
    );

    match result {
        Ok(entry) => Ok(Some(entry)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(ChallengeError::store("Leaderboard query failed", e)),
    }
}

/// Fold an admitted attempt into its (user, date) row
pub fn record(conn: &Connection, attempt: &Attempt) -> Result<RecordResult, ChallengeError> {
    let key = UserKey::new(attempt.user_id.clone(), attempt.date);
    let now = current_timestamp();

    let Some(existing) = get_entry(conn, &key)? else {
        conn.execute(
            r#"
            INSERT INTO leaderboard (user_id, date, best_score, attempts_used, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
            params![key.user_id, key.date_str(), attempt.score, attempt.attempt_number, now, now],
        )
        .map_err(|e| ChallengeError::store("Leaderboard insert failed", e))?;

        return Ok(RecordResult {
            is_new_best: true,
            best_score: attempt.score,
            attempts_used_for_best: attempt.attempt_number,
        });
    };

    if attempt.score <= existing.best_score {
        return Ok(RecordResult {
            is_new_best: false,
            best_score: existing.best_score,
            attempts_used_for_best: existing.attempts_used,
        });
    }

    conn.execute(
        "UPDATE leaderboard SET best_score = ?, attempts_used = ?, updated_at = ? WHERE id = ?",
        params![attempt.score, attempt.attempt_number, now, existing.id],
    )
    .map_err(|e| ChallengeError::store("Leaderboard update failed", e))?;

    Ok(RecordResult {
        is_new_best: true,
        best_score: attempt.score,
        attempts_used_for_best: attempt.attempt_number,
    })
}

/// One page of the day's ranking. Ranks are global: `offset + position + 1`.
pub fn rank_page(
    conn: &Connection,
    date: NaiveDate,
    limit: u32,
    offset: u32,
) -> Result<Vec<RankedEntry>, ChallengeError> {
    let sql = format!(
        "SELECT user_id, best_score, attempts_used FROM leaderboard WHERE date = ? ORDER BY {} LIMIT ? OFFSET ?",
        RANK_ORDER
    );
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| ChallengeError::store("Prepare failed", e))?;

    let rows = stmt
        .query_map(params![format_date(date), limit, offset], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, u8>(1)?, row.get::<_, u32>(2)?))
        })
        .map_err(|e| ChallengeError::store("Query failed", e))?;

    let mut page = Vec::new();
    for (i, row) in rows.enumerate() {
        let (user_id, best_score, attempts_used) =
            row.map_err(|e| ChallengeError::store("Row parse failed", e))?;
        page.push(RankedEntry {
            rank: offset + i as u32 + 1,
            user_id,
            best_score,
            attempts_used,
        });
    }

    Ok(page)
}

/// Position of a user in the day's ranking, if they have an entry
pub fn user_rank(conn: &Connection, key: &UserKey) -> Result<Option<u32>, ChallengeError> {
    let Some(entry) = get_entry(conn, key)? else {
        return Ok(None);
    };

    // Count everyone ordered strictly ahead under the same ordering.
    let ahead: u32 = conn
        .query_row(
            r#"
            SELECT COUNT(*) FROM leaderboard
            WHERE date = ?1 AND (
                best_score > ?2
                OR (best_score = ?2 AND attempts_used < ?3)
                OR (best_score = ?2 AND attempts_used = ?3 AND updated_at < ?4)
                OR (best_score = ?2 AND attempts_used = ?3 AND updated_at = ?4 AND id < ?5)
            )
            "#,
            params![
                key.date_str(),
                entry.best_score,
                entry.attempts_used,
                entry.updated_at,
                entry.id
            ],
            |row| row.get(0),
        )
        .map_err(|e| ChallengeError::store("Rank query failed", e))?;

    Ok(Some(ahead + 1))
}

/// Delete the row for a key. Returns whether one existed.
pub fn delete_for_day(conn: &Connection, key: &UserKey) -> Result<bool, ChallengeError> {
    let deleted = conn
        .execute(
            "DELETE FROM leaderboard WHERE user_id = ? AND date = ?",
            params![key.user_id, key.date_str()],
        )
        .map_err(|e| ChallengeError::store("Leaderboard delete failed", e))?;
    Ok(deleted > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::parse_date;
    use crate::db::ChallengeDb;
    use crate::scoring::Rgb;

    fn day() -> NaiveDate {
        parse_date("2024-07-04").unwrap()
    }

    fn attempt(user: &str, number: u32, score: u8) -> Attempt {
        Attempt {
            id: 0,
            user_id: user.to_string(),
            date: day(),
            attempt_number: number,
            score,
            submitted: Rgb::new(0, 0, 0),
            target: Rgb::new(0, 0, 0),
            created_at: current_timestamp(),
        }
    }

    #[test]
    fn test_only_strict_improvement_updates() {
        let db = ChallengeDb::open_in_memory().unwrap();

        db.with_conn(|conn| {
            let r = record(conn, &attempt("u", 1, 40))?;
            assert!(r.is_new_best);

            let r = record(conn, &attempt("u", 2, 95))?;
            assert_eq!((r.is_new_best, r.best_score, r.attempts_used_for_best), (true, 95, 2));

            // Tie keeps the earlier attempt
            let r = record(conn, &attempt("u", 3, 95))?;
            assert_eq!((r.is_new_best, r.best_score, r.attempts_used_for_best), (false, 95, 2));

            record(conn, &attempt("u", 4, 10))?;
            let entry = get_entry(conn, &UserKey::new("u", day()))?.unwrap();
            assert_eq!((entry.best_score, entry.attempts_used), (95, 2));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_ranking_order_and_pages() {
        let db = ChallengeDb::open_in_memory().unwrap();

        db.with_conn(|conn| {
            record(conn, &attempt("A", 3, 90))?;
            record(conn, &attempt("B", 2, 90))?;
            record(conn, &attempt("C", 5, 95))?;

            let page = rank_page(conn, day(), 10, 0)?;
            let order: Vec<_> = page.iter().map(|e| (e.rank, e.user_id.as_str())).collect();
            assert_eq!(order, vec![(1, "C"), (2, "B"), (3, "A")]);

            // Re-query is stable
            assert_eq!(rank_page(conn, day(), 10, 0)?, page);

            let second = rank_page(conn, day(), 2, 2)?;
            assert_eq!(second.len(), 1);
            assert_eq!((second[0].rank, second[0].user_id.as_str()), (3, "A"));

            assert_eq!(user_rank(conn, &UserKey::new("B", day()))?, Some(2));
            assert_eq!(user_rank(conn, &UserKey::new("A", day()))?, Some(3));
            assert_eq!(user_rank(conn, &UserKey::new("Z", day()))?, None);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_delete_for_day() {
        let db = ChallengeDb::open_in_memory().unwrap();

        db.with_conn(|conn| {
            record(conn, &attempt("u", 1, 50))?;
            let key = UserKey::new("u", day());
            assert!(delete_for_day(conn, &key)?);
            assert!(!delete_for_day(conn, &key)?);
            assert!(get_entry(conn, &key)?.is_none());
            Ok(())
        })
        .unwrap();
    }
}
