//! Extra-attempt grants
//!
//! Grants share the admission lock with attempt submission, so a grant and
//! a submission for the same (user, date) never interleave.

use std::sync::Arc;

use tracing::info;

use crate::db::{modifiers, ChallengeDb, UserKey};
use crate::error::ChallengeError;
use crate::locks::KeyedLocks;

use super::events::{ChallengeEvent, EventBus};

pub struct AttemptModifierLedger {
    db: Arc<ChallengeDb>,
    admission_locks: Arc<KeyedLocks<UserKey>>,
    events: Arc<EventBus>,
}

impl AttemptModifierLedger {
    pub fn new(
        db: Arc<ChallengeDb>,
        admission_locks: Arc<KeyedLocks<UserKey>>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            db,
            admission_locks,
            events,
        }
    }

    /// Extra attempts granted for a key, 0 if none
    pub fn get(&self, key: &UserKey) -> Result<u32, ChallengeError> {
        self.db.with_conn(|conn| modifiers::get_extra_attempts(conn, key))
    }

    /// Add `extra` attempts and return the new total
    pub fn grant(&self, key: &UserKey, extra: u32) -> Result<u32, ChallengeError> {
        self.grant_with(key, extra, || Ok(()))
    }

    /// Add `extra` attempts, running `consume` before the grant commits.
    ///
    /// An error from `consume` rolls the grant back.
    pub fn grant_with<F>(&self, key: &UserKey, extra: u32, consume: F) -> Result<u32, ChallengeError>
    where
        F: FnOnce() -> Result<(), ChallengeError>,
    {
        if extra == 0 {
            return Err(ChallengeError::InvalidInput(
                "extra_attempts must be greater than 0".to_string(),
            ));
        }

        let total = self.admission_locks.with_lock(key, || {
            self.db.with_immediate_tx(|tx| {
                let total = modifiers::add_extra_attempts(tx, key, extra)?;
                consume()?;
                Ok(total)
            })
        })?;

        info!(user_id = %key.user_id, date = %key.date, granted = extra, total, "Extra attempts granted");

        self.events.emit(ChallengeEvent::ExtraAttemptsGranted {
            user_id: key.user_id.clone(),
            date: key.date,
            granted: extra,
            total_extra_attempts: total,
        });

        Ok(total)
    }
}
