//! Service layer for daily-hue
//!
//! Services own the critical sections. Each one wraps repository calls with:
//! - Input validation
//! - Per-(user, date) locking and transaction boundaries
//! - Event emission after commit
//!
//! ## Architecture
//!
//! ```text
//! HTTP Handlers (thin)
//!     ↓
//! ChallengeService (exposed operations)
//!     ↓
//! AttemptLedger / AttemptModifierLedger / LeaderboardAggregator / EconomySettlement
//!     ↓
//! Repository Layer (db/*.rs)
//!     ↓
//! SQLite Database
//! ```
//!
//! Lock order is always admission lock, then settlement lock, then the
//! connection mutex.

pub mod response;
pub mod events;
pub mod modifier_service;
pub mod attempt_service;
pub mod leaderboard_service;
pub mod settlement_service;
pub mod challenge_service;

// Re-exports
pub use attempt_service::{AdmitOutcome, Admission, AttemptLedger};
pub use challenge_service::{
    ChallengeParts, ChallengeService, ItemUseResult, PublishedTarget, ResetResult,
    SubmissionResult, SubmitOutcome, UserDaySummary,
};
pub use events::{ChallengeEvent, EventBus, EventListener, LoggingEventListener};
pub use leaderboard_service::LeaderboardAggregator;
pub use modifier_service::AttemptModifierLedger;
pub use settlement_service::{compute_award, Award, EconomySettlement, SettleOutcome, SettledDay};

use std::sync::Arc;

use crate::collaborators::{AccountStore, DailyTargetProvider};
use crate::config::AttemptRules;
use crate::db::accounts::SqliteAccountStore;
use crate::db::targets::SqliteTargetProvider;
use crate::db::{ChallengeDb, UserKey};
use crate::locks::KeyedLocks;

/// Service container for dependency injection
///
/// Holds all services over one shared database. Pass this to HttpServer for
/// handler access.
pub struct Services {
    pub db: Arc<ChallengeDb>,
    pub challenge: Arc<ChallengeService>,
    pub attempts: Arc<AttemptLedger>,
    pub modifiers: Arc<AttemptModifierLedger>,
    pub leaderboard: Arc<LeaderboardAggregator>,
    pub settlement: Arc<EconomySettlement>,
    pub accounts: Arc<dyn AccountStore>,
    pub events: Arc<EventBus>,
}

impl Services {
    /// Create all services with targets and accounts stored in the same database
    pub fn new(db: Arc<ChallengeDb>, rules: AttemptRules, events: Arc<EventBus>) -> Self {
        let targets = Arc::new(SqliteTargetProvider::new(db.clone()));
        let accounts = Arc::new(SqliteAccountStore::new(db.clone()));
        Self::with_collaborators(db, rules, targets, accounts, events)
    }

    /// Create all services around externally supplied collaborators
    pub fn with_collaborators(
        db: Arc<ChallengeDb>,
        rules: AttemptRules,
        targets: Arc<dyn DailyTargetProvider>,
        accounts: Arc<dyn AccountStore>,
        events: Arc<EventBus>,
    ) -> Self {
        let admission_locks: Arc<KeyedLocks<UserKey>> = Arc::new(KeyedLocks::new());
        let settlement_locks: Arc<KeyedLocks<UserKey>> = Arc::new(KeyedLocks::new());

        let attempts = Arc::new(AttemptLedger::new(
            db.clone(),
            admission_locks.clone(),
            rules,
            events.clone(),
        ));
        let modifiers = Arc::new(AttemptModifierLedger::new(
            db.clone(),
            admission_locks.clone(),
            events.clone(),
        ));
        let leaderboard = Arc::new(LeaderboardAggregator::new(db.clone()));
        let settlement = Arc::new(EconomySettlement::new(
            db.clone(),
            accounts.clone(),
            settlement_locks.clone(),
            events.clone(),
        ));

        let challenge = Arc::new(ChallengeService::new(ChallengeParts {
            db: db.clone(),
            targets,
            attempts: attempts.clone(),
            modifiers: modifiers.clone(),
            leaderboard: leaderboard.clone(),
            settlement: settlement.clone(),
            admission_locks,
            settlement_locks,
            rules,
            events: events.clone(),
        }));

        Self {
            db,
            challenge,
            attempts,
            modifiers,
            leaderboard,
            settlement,
            accounts,
            events,
        }
    }

    /// In-memory services with default rules (for testing)
    pub fn in_memory() -> Result<Self, crate::error::ChallengeError> {
        let db = Arc::new(ChallengeDb::open_in_memory()?);
        Ok(Self::new(db, AttemptRules::default(), Arc::new(EventBus::new())))
    }
}
