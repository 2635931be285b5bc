//! Daily Hue - daily color-matching challenge engine
//!
//! Players get one target color per day and a small budget of guesses.
//! Each guess is scored by RGB distance, the best score per day feeds a
//! leaderboard, and spending the whole budget converts the best score into
//! points, credits and levels exactly once.
//!
//! ## Architecture
//!
//! - **scoring**: pure score calculation and feedback text
//! - **db**: SQLite repositories (attempt ledger, modifiers, leaderboard,
//!   settlement markers, targets, account economy)
//! - **services**: critical sections per (user, date), events, and the
//!   operations exposed to callers
//! - **http**: thin JSON API over the services
//!
//! ## Storage Layout
//!
//! ```text
//! ~/.local/share/daily-hue/
//! ├── challenge.db           # SQLite database (WAL mode)
//! └── config.toml            # Configuration
//! ```

pub mod collaborators;
pub mod config;
pub mod db;
pub mod error;
pub mod http;
pub mod locks;
pub mod scoring;
pub mod services;

// Re-exports
pub use collaborators::{AccountStore, DailyTargetProvider, ItemEffectSource, ItemMetadata};
pub use config::{AttemptRules, Config};
pub use db::{ChallengeDb, UserKey};
pub use error::ChallengeError;
pub use http::HttpServer;
pub use locks::KeyedLocks;
pub use scoring::{score, Rgb};
pub use services::{
    ChallengeService, EventBus, Services, SettleOutcome, SubmissionResult, SubmitOutcome,
};
