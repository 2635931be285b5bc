//! Leaderboard aggregation and ranking

use std::sync::Arc;

use chrono::NaiveDate;
use rusqlite::Connection;

use crate::db::leaderboard::{self, RecordResult};
use crate::db::{Attempt, ChallengeDb, LeaderboardEntry, RankedEntry, UserKey};
use crate::error::ChallengeError;

/// Upper bound on a single ranking page
pub const MAX_RANK_PAGE: u32 = 1000;

pub struct LeaderboardAggregator {
    db: Arc<ChallengeDb>,
}

impl LeaderboardAggregator {
    pub fn new(db: Arc<ChallengeDb>) -> Self {
        Self { db }
    }

    /// Fold an attempt into the leaderboard inside the caller's transaction.
    /// Admission uses this so the attempt and its leaderboard effect commit together.
    pub fn record_in(conn: &Connection, attempt: &Attempt) -> Result<RecordResult, ChallengeError> {
        leaderboard::record(conn, attempt)
    }

    pub fn entry(&self, key: &UserKey) -> Result<Option<LeaderboardEntry>, ChallengeError> {
        self.db.with_conn(|conn| leaderboard::get_entry(conn, key))
    }

    /// Ranked page for a day. `limit` is clamped to `1..=MAX_RANK_PAGE`.
    pub fn rank(&self, date: NaiveDate, limit: u32, offset: u32) -> Result<Vec<RankedEntry>, ChallengeError> {
        let limit = limit.clamp(1, MAX_RANK_PAGE);
        self.db
            .with_conn(|conn| leaderboard::rank_page(conn, date, limit, offset))
    }

    pub fn user_rank(&self, key: &UserKey) -> Result<Option<u32>, ChallengeError> {
        self.db.with_conn(|conn| leaderboard::user_rank(conn, key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{current_timestamp, parse_date};
    use crate::scoring::Rgb;

    #[test]
    fn test_record_is_idempotent_on_retry() {
        let db = Arc::new(ChallengeDb::open_in_memory().unwrap());
        let board = LeaderboardAggregator::new(db.clone());
        let record = |attempt: &Attempt| {
            db.with_immediate_tx(|tx| LeaderboardAggregator::record_in(tx, attempt))
        };
        let attempt = Attempt {
            id: 1,
            user_id: "ivy".into(),
            date: parse_date("2024-03-03").unwrap(),
            attempt_number: 1,
            score: 77,
            submitted: Rgb::new(1, 1, 1),
            target: Rgb::new(2, 2, 2),
            created_at: current_timestamp(),
        };

        assert!(record(&attempt).unwrap().is_new_best);
        let again = record(&attempt).unwrap();
        assert!(!again.is_new_best);
        assert_eq!((again.best_score, again.attempts_used_for_best), (77, 1));

        let page = board.rank(attempt.date, 0, 0).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].rank, 1);
    }
}
