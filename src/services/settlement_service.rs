//! Economy settlement
//!
//! Turns a finished day's best score into points, credits and levels, at
//! most once per (user, date). The marker row is claimed first; the account
//! is only touched by the caller that inserted it.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::collaborators::AccountStore;
use crate::config::POINTS_PER_LEVEL;
use crate::db::settlements::{self, AppliedAward};
use crate::db::{leaderboard, ChallengeDb, EconomyDelta, UserEconomy, UserKey};
use crate::error::ChallengeError;
use crate::locks::KeyedLocks;

use super::events::{ChallengeEvent, EventBus};

/// Rewards for one settled day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Award {
    pub points_awarded: i64,
    pub credits_awarded: i64,
    pub levels_gained: i64,
}

/// Rewards for `best_score` on an account currently holding `current_points`
pub fn compute_award(best_score: u8, current_points: i64) -> Award {
    let points_awarded = i64::from(best_score);
    let credits_awarded = (points_awarded + 1) / 2;
    let new_total = current_points + points_awarded;
    let levels_gained = (new_total.div_euclid(POINTS_PER_LEVEL)
        - current_points.div_euclid(POINTS_PER_LEVEL))
    .max(0);

    Award {
        points_awarded,
        credits_awarded,
        levels_gained,
    }
}

impl From<Award> for EconomyDelta {
    fn from(award: Award) -> Self {
        Self {
            points: award.points_awarded,
            credits: award.credits_awarded,
            levels: award.levels_gained,
        }
    }
}

impl From<EconomyDelta> for Award {
    fn from(delta: EconomyDelta) -> Self {
        Self {
            points_awarded: delta.points,
            credits_awarded: delta.credits,
            levels_gained: delta.levels,
        }
    }
}

/// A settlement this call applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettledDay {
    pub best_score: u8,
    #[serde(flatten)]
    pub award: Award,
    /// Account economy after the award
    pub economy: UserEconomy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SettleOutcome {
    Settled(SettledDay),
    AlreadySettled,
}

pub struct EconomySettlement {
    db: Arc<ChallengeDb>,
    accounts: Arc<dyn AccountStore>,
    settlement_locks: Arc<KeyedLocks<UserKey>>,
    events: Arc<EventBus>,
}

impl EconomySettlement {
    pub fn new(
        db: Arc<ChallengeDb>,
        accounts: Arc<dyn AccountStore>,
        settlement_locks: Arc<KeyedLocks<UserKey>>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            db,
            accounts,
            settlement_locks,
            events,
        }
    }

    /// Settle a day whose budget is spent.
    ///
    /// A failure before the account changes releases the marker, so calling
    /// again is safe.
    pub fn settle(&self, key: &UserKey) -> Result<SettleOutcome, ChallengeError> {
        let outcome = self.settlement_locks.with_lock(key, || self.settle_locked(key))?;

        if let SettleOutcome::Settled(day) = &outcome {
            self.events.emit(ChallengeEvent::Settled {
                user_id: key.user_id.clone(),
                date: key.date,
                points_awarded: day.award.points_awarded,
                credits_awarded: day.award.credits_awarded,
                levels_gained: day.award.levels_gained,
            });
        }

        Ok(outcome)
    }

    fn settle_locked(&self, key: &UserKey) -> Result<SettleOutcome, ChallengeError> {
        let claimed = self
            .db
            .with_immediate_tx(|tx| settlements::try_claim(tx, key))?;
        if !claimed {
            debug!(key = %key, "Day already settled");
            return Ok(SettleOutcome::AlreadySettled);
        }

        let (award, best_score, economy) = match self.apply(key) {
            Ok(applied) => applied,
            Err(e) => {
                warn!(key = %key, error = %e, "Settlement failed before account update, releasing marker");
                if let Err(release_err) = self.db.with_conn(|conn| settlements::release(conn, key)) {
                    error!(alert = true, key = %key, error = %release_err, "Could not release settlement marker");
                }
                return Err(e);
            }
        };

        let applied = AppliedAward {
            best_score,
            points_awarded: award.points_awarded,
            credits_awarded: award.credits_awarded,
            levels_gained: award.levels_gained,
        };
        // The account already changed: never release from here on.
        if let Err(e) = self
            .db
            .with_immediate_tx(|tx| settlements::mark_applied(tx, key, &applied))
        {
            error!(alert = true, key = %key, error = %e, "Rewards applied but marker not updated");
            return Err(e);
        }

        info!(
            user_id = %key.user_id,
            date = %key.date,
            best_score,
            points = award.points_awarded,
            credits = award.credits_awarded,
            levels = award.levels_gained,
            "Settlement applied"
        );

        Ok(SettleOutcome::Settled(SettledDay {
            best_score,
            award,
            economy,
        }))
    }

    fn apply(&self, key: &UserKey) -> Result<(Award, u8, UserEconomy), ChallengeError> {
        let entry = self
            .db
            .with_conn(|conn| leaderboard::get_entry(conn, key))?
            .ok_or_else(|| ChallengeError::NotFound(format!("no leaderboard entry for {}", key)))?;

        // Levels depend on the points the account holds when the delta lands,
        // so the award is derived inside the store's atomic update.
        let best_score = entry.best_score;
        let (delta, economy) = self
            .accounts
            .update_economy(&key.user_id, &|current: &UserEconomy| {
                EconomyDelta::from(compute_award(best_score, current.points))
            })?;

        Ok((Award::from(delta), best_score, economy))
    }
}
