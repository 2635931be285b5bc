//! Attempt admission
//!
//! The admission section for one (user, date):
//!
//! 1. take the key's admission lock
//! 2. open an IMMEDIATE transaction
//! 3. read the modifier and the ledger position, derive the cap
//! 4. reject when the budget is spent, otherwise score and insert
//!    `max_number + 1`, then fold the attempt into the leaderboard
//! 5. commit
//!
//! The unique constraint on `(user_id, date, attempt_number)` backs the lock
//! when another process writes the same database. A lost insert re-reads the
//! position and tries the next number.

use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::config::AttemptRules;
use crate::db::attempts::{self, NewAttempt};
use crate::db::leaderboard::RecordResult;
use crate::db::{modifiers, Attempt, ChallengeDb, DailyTarget, UserKey};
use crate::error::ChallengeError;
use crate::locks::KeyedLocks;
use crate::scoring::{self, Rgb};

use super::events::{ChallengeEvent, EventBus};
use super::leaderboard_service::LeaderboardAggregator;

const INSERT_RETRIES: usize = 3;

/// A committed attempt and what it did
#[derive(Debug, Clone)]
pub struct Admission {
    pub attempt: Attempt,
    /// Budget in effect when the attempt was admitted
    pub cap: u32,
    pub extra_attempts: u32,
    pub leaderboard: RecordResult,
}

impl Admission {
    pub fn attempts_left(&self) -> u32 {
        self.cap.saturating_sub(self.attempt.attempt_number)
    }

    /// This attempt used the last slot of the budget
    pub fn exhausted_budget(&self) -> bool {
        self.attempt.attempt_number == self.cap
    }
}

#[derive(Debug, Clone)]
pub enum AdmitOutcome {
    Admitted(Admission),
    LimitReached { max_attempts: u32, attempts_used: u32 },
}

pub struct AttemptLedger {
    db: Arc<ChallengeDb>,
    admission_locks: Arc<KeyedLocks<UserKey>>,
    rules: AttemptRules,
    events: Arc<EventBus>,
}

impl AttemptLedger {
    pub fn new(
        db: Arc<ChallengeDb>,
        admission_locks: Arc<KeyedLocks<UserKey>>,
        rules: AttemptRules,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            db,
            admission_locks,
            rules,
            events,
        }
    }

    /// Admit and score one submission against `target`
    pub fn submit(
        &self,
        key: &UserKey,
        submitted: Rgb,
        target: &DailyTarget,
    ) -> Result<AdmitOutcome, ChallengeError> {
        if target.date != key.date {
            return Err(ChallengeError::InvalidInput(format!(
                "target is for {}, submission is for {}",
                target.date, key.date
            )));
        }

        let outcome = self
            .admission_locks
            .with_lock(key, || self.db.with_immediate_tx(|tx| self.admit(tx, key, submitted, target)))?;

        match &outcome {
            AdmitOutcome::Admitted(admission) => {
                let attempt = &admission.attempt;
                self.events.emit(ChallengeEvent::AttemptRecorded {
                    user_id: attempt.user_id.clone(),
                    date: attempt.date,
                    attempt_number: attempt.attempt_number,
                    score: attempt.score,
                });
                if admission.leaderboard.is_new_best {
                    self.events.emit(ChallengeEvent::NewBest {
                        user_id: attempt.user_id.clone(),
                        date: attempt.date,
                        best_score: admission.leaderboard.best_score,
                        attempts_used: admission.leaderboard.attempts_used_for_best,
                    });
                }
            }
            AdmitOutcome::LimitReached {
                max_attempts,
                attempts_used,
            } => {
                self.events.emit(ChallengeEvent::AttemptRejected {
                    user_id: key.user_id.clone(),
                    date: key.date,
                    attempts_used: *attempts_used,
                    max_attempts: *max_attempts,
                });
            }
        }

        Ok(outcome)
    }

    fn admit(
        &self,
        conn: &rusqlite::Connection,
        key: &UserKey,
        submitted: Rgb,
        target: &DailyTarget,
    ) -> Result<AdmitOutcome, ChallengeError> {
        let extra_attempts = modifiers::get_extra_attempts(conn, key)?;
        let cap = self.rules.cap(extra_attempts);

        for _ in 0..INSERT_RETRIES {
            let position = attempts::ledger_position(conn, key)?;

            if !position.is_contiguous() {
                error!(
                    alert = true,
                    user_id = %key.user_id,
                    date = %key.date,
                    count = position.count,
                    max_number = position.max_number,
                    "Attempt numbering has a gap"
                );
                return Err(ChallengeError::InvariantViolation(format!(
                    "attempts for {} number up to {} but only {} exist",
                    key, position.max_number, position.count
                )));
            }

            if position.count >= cap {
                debug!(key = %key, used = position.count, cap, "Attempt limit reached");
                return Ok(AdmitOutcome::LimitReached {
                    max_attempts: cap,
                    attempts_used: position.count,
                });
            }

            let input = NewAttempt {
                key,
                attempt_number: position.next_number(),
                score: scoring::score(target.color, submitted),
                submitted,
                target: target.color,
            };

            if let Some(attempt) = attempts::insert_attempt(conn, &input)? {
                let leaderboard = LeaderboardAggregator::record_in(conn, &attempt)?;
                debug!(
                    key = %key,
                    attempt_number = attempt.attempt_number,
                    score = attempt.score,
                    cap,
                    "Attempt admitted"
                );
                return Ok(AdmitOutcome::Admitted(Admission {
                    attempt,
                    cap,
                    extra_attempts,
                    leaderboard,
                }));
            }

            warn!(key = %key, number = input.attempt_number, "Attempt number taken, retrying");
        }

        Err(ChallengeError::TransientStore(format!(
            "could not claim an attempt number for {} after {} tries",
            key, INSERT_RETRIES
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{current_timestamp, parse_date};

    fn setup() -> (Arc<ChallengeDb>, AttemptLedger) {
        let db = Arc::new(ChallengeDb::open_in_memory().unwrap());
        let ledger = AttemptLedger::new(
            db.clone(),
            Arc::new(KeyedLocks::new()),
            AttemptRules::default(),
            Arc::new(EventBus::new()),
        );
        (db, ledger)
    }

    fn target(date: &str) -> DailyTarget {
        DailyTarget {
            date: parse_date(date).unwrap(),
            color_name: None,
            color: Rgb::new(200, 100, 50),
            created_at: current_timestamp(),
        }
    }

    #[test]
    fn test_admits_up_to_cap_then_rejects() {
        let (_db, ledger) = setup();
        let target = target("2024-04-04");
        let key = UserKey::new("jo", target.date);

        for n in 1..=5 {
            match ledger.submit(&key, Rgb::new(0, 0, 0), &target).unwrap() {
                AdmitOutcome::Admitted(a) => {
                    assert_eq!(a.attempt.attempt_number, n);
                    assert_eq!(a.attempts_left(), 5 - n);
                    assert_eq!(a.exhausted_budget(), n == 5);
                }
                other => panic!("expected admission, got {:?}", other),
            }
        }

        match ledger.submit(&key, Rgb::new(0, 0, 0), &target).unwrap() {
            AdmitOutcome::LimitReached {
                max_attempts,
                attempts_used,
            } => assert_eq!((max_attempts, attempts_used), (5, 5)),
            other => panic!("expected limit, got {:?}", other),
        }
    }

    #[test]
    fn test_gap_is_reported_not_repaired() {
        let (db, ledger) = setup();
        let target = target("2024-04-05");
        let key = UserKey::new("kim", target.date);

        db.with_conn(|conn| {
            attempts::insert_attempt(
                conn,
                &NewAttempt {
                    key: &key,
                    attempt_number: 3,
                    score: 10,
                    submitted: Rgb::new(0, 0, 0),
                    target: target.color,
                },
            )
            .map(|_| ())
        })
        .unwrap();

        let result = ledger.submit(&key, Rgb::new(0, 0, 0), &target);
        assert!(matches!(result, Err(ChallengeError::InvariantViolation(_))));
        assert_eq!(db.stats().unwrap().attempt_count, 1);
    }

    #[test]
    fn test_target_date_must_match() {
        let (_db, ledger) = setup();
        let target = target("2024-04-06");
        let key = UserKey::new("lee", parse_date("2024-04-07").unwrap());
        assert!(matches!(
            ledger.submit(&key, Rgb::new(0, 0, 0), &target),
            Err(ChallengeError::InvalidInput(_))
        ));
    }
}
