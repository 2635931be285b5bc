//! Daily challenge operations
//!
//! Composes admission, leaderboard, modifiers and settlement into the
//! operations the HTTP layer (or any other caller) uses.

use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::collaborators::{DailyTargetProvider, ItemEffectSource};
use crate::config::AttemptRules;
use crate::db::{
    attempts, leaderboard, modifiers, settlements, targets, Attempt, ChallengeDb, DailyTarget,
    RankedEntry, SettlementRecord, UserKey,
};
use crate::error::ChallengeError;
use crate::locks::KeyedLocks;
use crate::scoring::{self, Rgb};

use super::attempt_service::{AdmitOutcome, AttemptLedger};
use super::events::{ChallengeEvent, EventBus};
use super::leaderboard_service::LeaderboardAggregator;
use super::modifier_service::AttemptModifierLedger;
use super::settlement_service::{EconomySettlement, SettleOutcome};

/// Response for an accepted submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionResult {
    pub score: u8,
    pub attempt_number: u32,
    pub attempts_left: u32,
    pub max_attempts: u32,
    pub best_score: u8,
    pub is_new_best: bool,
    pub submitted_color: String,
    pub target_color: String,
    pub message: String,
    /// Present on the submission that spent the budget
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settlement: Option<SettleOutcome>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    Accepted(SubmissionResult),
    AttemptLimitReached { max_attempts: u32, attempts_used: u32 },
    NotPublished { date: NaiveDate },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDaySummary {
    pub user_id: String,
    pub date: NaiveDate,
    pub attempts: Vec<Attempt>,
    pub best_score: u8,
    pub attempts_used: u32,
    pub attempts_left: u32,
    pub extra_attempts: u32,
    pub max_attempts: u32,
    pub settlement: Option<SettlementRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetResult {
    pub user_id: String,
    pub date: NaiveDate,
    pub attempts_deleted: usize,
    pub leaderboard_cleared: bool,
    pub settlement_cleared: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemUseResult {
    pub extra_attempts_applied: u32,
    pub total_extra_attempts: u32,
    pub max_attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedTarget {
    pub target: DailyTarget,
    pub created: bool,
}

pub struct ChallengeService {
    db: Arc<ChallengeDb>,
    targets: Arc<dyn DailyTargetProvider>,
    attempts: Arc<AttemptLedger>,
    modifiers: Arc<AttemptModifierLedger>,
    leaderboard: Arc<LeaderboardAggregator>,
    settlement: Arc<EconomySettlement>,
    admission_locks: Arc<KeyedLocks<UserKey>>,
    settlement_locks: Arc<KeyedLocks<UserKey>>,
    rules: AttemptRules,
    events: Arc<EventBus>,
}

/// Shared handles a `ChallengeService` is assembled from
pub struct ChallengeParts {
    pub db: Arc<ChallengeDb>,
    pub targets: Arc<dyn DailyTargetProvider>,
    pub attempts: Arc<AttemptLedger>,
    pub modifiers: Arc<AttemptModifierLedger>,
    pub leaderboard: Arc<LeaderboardAggregator>,
    pub settlement: Arc<EconomySettlement>,
    pub admission_locks: Arc<KeyedLocks<UserKey>>,
    pub settlement_locks: Arc<KeyedLocks<UserKey>>,
    pub rules: AttemptRules,
    pub events: Arc<EventBus>,
}

impl ChallengeService {
    pub fn new(parts: ChallengeParts) -> Self {
        Self {
            db: parts.db,
            targets: parts.targets,
            attempts: parts.attempts,
            modifiers: parts.modifiers,
            leaderboard: parts.leaderboard,
            settlement: parts.settlement,
            admission_locks: parts.admission_locks,
            settlement_locks: parts.settlement_locks,
            rules: parts.rules,
            events: parts.events,
        }
    }

    pub fn rules(&self) -> AttemptRules {
        self.rules
    }

    // =========================================================================
    // Player operations
    // =========================================================================

    /// Score a guess for `user_id` on `date`
    pub fn submit_attempt(
        &self,
        user_id: &str,
        date: NaiveDate,
        submitted: Rgb,
    ) -> Result<SubmitOutcome, ChallengeError> {
        let key = user_key(user_id, date)?;

        let Some(target) = self.targets.get_target(date)? else {
            return Ok(SubmitOutcome::NotPublished { date });
        };

        match self.attempts.submit(&key, submitted, &target)? {
            AdmitOutcome::LimitReached {
                max_attempts,
                attempts_used,
            } => {
                // A retried final submission lands here; make sure the day got settled.
                if let Err(e) = self.settlement.settle(&key) {
                    warn!(key = %key, error = %e, retriable = e.is_retriable(), "Catch-up settlement failed");
                }
                Ok(SubmitOutcome::AttemptLimitReached {
                    max_attempts,
                    attempts_used,
                })
            }
            AdmitOutcome::Admitted(admission) => {
                let settlement = if admission.exhausted_budget() {
                    match self.settlement.settle(&key) {
                        Ok(outcome) => Some(outcome),
                        Err(e) => {
                            // The attempt is committed; the next submission retries settlement.
                            error!(key = %key, error = %e, retriable = e.is_retriable(), "Settlement failed after final attempt");
                            None
                        }
                    }
                } else {
                    None
                };

                let attempts_left = admission.attempts_left();
                let attempt = &admission.attempt;
                Ok(SubmitOutcome::Accepted(SubmissionResult {
                    score: attempt.score,
                    attempt_number: attempt.attempt_number,
                    attempts_left,
                    max_attempts: admission.cap,
                    best_score: admission.leaderboard.best_score,
                    is_new_best: admission.leaderboard.is_new_best,
                    submitted_color: attempt.submitted.css(),
                    target_color: attempt.target.css(),
                    message: scoring::feedback(attempt.score, attempts_left),
                    settlement,
                }))
            }
        }
    }

    /// Consume an extra-attempt item and grant its effect for `date`
    pub fn use_extra_attempt_item(
        &self,
        user_id: &str,
        date: NaiveDate,
        source: &dyn ItemEffectSource,
    ) -> Result<ItemUseResult, ChallengeError> {
        let key = user_key(user_id, date)?;
        let granted = source.extra_attempt_effect(user_id)?;
        if granted == 0 {
            return Err(ChallengeError::InvalidInput(
                "item grants no extra attempts".to_string(),
            ));
        }
        // The item leaves inventory inside the grant's transaction.
        let total = self
            .modifiers
            .grant_with(&key, granted, || source.consume(user_id))?;

        Ok(ItemUseResult {
            extra_attempts_applied: granted,
            total_extra_attempts: total,
            max_attempts: self.rules.cap(total),
        })
    }

    pub fn get_user_day_summary(&self, user_id: &str, date: NaiveDate) -> Result<UserDaySummary, ChallengeError> {
        let key = user_key(user_id, date)?;

        self.db.with_conn(|conn| {
            let day_attempts = attempts::get_attempts_for_day(conn, &key)?;
            let extra_attempts = modifiers::get_extra_attempts(conn, &key)?;
            let best_score = match leaderboard::get_entry(conn, &key)? {
                Some(entry) => entry.best_score,
                None => day_attempts.iter().map(|a| a.score).max().unwrap_or(0),
            };
            let settlement = settlements::get(conn, &key)?;

            let max_attempts = self.rules.cap(extra_attempts);
            let attempts_used = day_attempts.len() as u32;

            Ok(UserDaySummary {
                user_id: key.user_id.clone(),
                date,
                attempts: day_attempts,
                best_score,
                attempts_used,
                attempts_left: max_attempts.saturating_sub(attempts_used),
                extra_attempts,
                max_attempts,
                settlement,
            })
        })
    }

    /// Every attempt a user has made, newest day first
    pub fn get_user_history(&self, user_id: &str, limit: u32) -> Result<Vec<Attempt>, ChallengeError> {
        validate_user_id(user_id)?;
        self.db
            .with_conn(|conn| attempts::get_user_history(conn, user_id, limit.max(1)))
    }

    // =========================================================================
    // Leaderboard
    // =========================================================================

    pub fn get_leaderboard(&self, date: NaiveDate, limit: u32, offset: u32) -> Result<Vec<RankedEntry>, ChallengeError> {
        self.leaderboard.rank(date, limit, offset)
    }

    pub fn user_rank(&self, user_id: &str, date: NaiveDate) -> Result<Option<u32>, ChallengeError> {
        let key = user_key(user_id, date)?;
        self.leaderboard.user_rank(&key)
    }

    // =========================================================================
    // Admin operations
    // =========================================================================

    /// Publish the day's target. An existing target is returned unchanged.
    pub fn publish_target(
        &self,
        date: NaiveDate,
        color_name: Option<&str>,
        color: Rgb,
    ) -> Result<PublishedTarget, ChallengeError> {
        let (target, created) = self
            .db
            .with_immediate_tx(|tx| targets::publish_target(tx, date, color_name, color))?;

        if created {
            info!(date = %date, color = %color.hex(), "Daily target published");
            self.events.emit(ChallengeEvent::TargetPublished { date });
        }

        Ok(PublishedTarget { target, created })
    }

    /// Wipe a user's attempts, leaderboard row and settlement marker for a day.
    /// Granted modifiers are kept.
    pub fn reset_user_day(&self, user_id: &str, date: NaiveDate) -> Result<ResetResult, ChallengeError> {
        let key = user_key(user_id, date)?;

        let result = self.admission_locks.with_lock(&key, || {
            self.settlement_locks.with_lock(&key, || {
                self.db.with_immediate_tx(|tx| {
                    Ok(ResetResult {
                        user_id: key.user_id.clone(),
                        date,
                        attempts_deleted: attempts::delete_for_day(tx, &key)?,
                        leaderboard_cleared: leaderboard::delete_for_day(tx, &key)?,
                        settlement_cleared: settlements::delete_for_day(tx, &key)?,
                    })
                })
            })
        })?;

        info!(
            user_id = %key.user_id,
            date = %date,
            attempts_deleted = result.attempts_deleted,
            "User day reset"
        );
        self.events.emit(ChallengeEvent::UserDayReset {
            user_id: key.user_id.clone(),
            date,
            attempts_deleted: result.attempts_deleted,
        });

        Ok(result)
    }
}

fn validate_user_id(user_id: &str) -> Result<(), ChallengeError> {
    if user_id.trim().is_empty() {
        return Err(ChallengeError::InvalidInput("user_id is required".to_string()));
    }
    Ok(())
}

fn user_key(user_id: &str, date: NaiveDate) -> Result<UserKey, ChallengeError> {
    validate_user_id(user_id)?;
    Ok(UserKey::new(user_id, date))
}
