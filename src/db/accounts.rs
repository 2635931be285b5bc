//! Account economy rows
//!
//! Only the economy subset of an account lives here. Missing rows read as
//! a fresh account: level 1, no points, no credits.

use std::sync::Arc;

use rusqlite::{named_params, params, Connection, OptionalExtension};

use super::models::{current_timestamp, EconomyDelta, UserEconomy};
use super::ChallengeDb;
use crate::collaborators::AccountStore;
use crate::error::ChallengeError;

/// Economy of an account that has never been credited
pub const NEW_ACCOUNT: UserEconomy = UserEconomy {
    points: 0,
    level: 1,
    credits: 0,
};

pub fn get_economy(conn: &Connection, user_id: &str) -> Result<UserEconomy, ChallengeError> {
    let economy = conn
        .query_row(
            "SELECT points, level, credits FROM account_economy WHERE user_id = ?",
            params![user_id],
            UserEconomy::from_row,
        )
        .optional()
        .map_err(|e| ChallengeError::store("Economy query failed", e))?;

    Ok(economy.unwrap_or(NEW_ACCOUNT))
}

/// Add the delta in one statement and return the resulting economy
pub fn apply_economy_delta(
    conn: &Connection,
    user_id: &str,
    delta: &EconomyDelta,
) -> Result<UserEconomy, ChallengeError> {
    conn.query_row(
        r#"
        INSERT INTO account_economy (user_id, points, level, credits, updated_at)
        VALUES (:user_id, :base_points + :points, :base_level + :levels, :base_credits + :credits, :now)
        ON CONFLICT(user_id) DO UPDATE SET
            points = account_economy.points + :points,
            level = account_economy.level + :levels,
            credits = account_economy.credits + :credits,
            updated_at = :now
        RETURNING points, level, credits
        "#,
        named_params! {
            ":user_id": user_id,
            ":base_points": NEW_ACCOUNT.points,
            ":base_level": NEW_ACCOUNT.level,
            ":base_credits": NEW_ACCOUNT.credits,
            ":points": delta.points,
            ":levels": delta.levels,
            ":credits": delta.credits,
            ":now": current_timestamp(),
        },
        UserEconomy::from_row,
    )
    .map_err(|e| ChallengeError::store("Economy update failed", e))
}

/// `AccountStore` backed by the challenge database
pub struct SqliteAccountStore {
    db: Arc<ChallengeDb>,
}

impl SqliteAccountStore {
    pub fn new(db: Arc<ChallengeDb>) -> Self {
        Self { db }
    }
}

impl AccountStore for SqliteAccountStore {
    fn get_economy(&self, user_id: &str) -> Result<UserEconomy, ChallengeError> {
        self.db.with_conn(|conn| get_economy(conn, user_id))
    }

    fn update_economy(
        &self,
        user_id: &str,
        derive: &dyn Fn(&UserEconomy) -> EconomyDelta,
    ) -> Result<(EconomyDelta, UserEconomy), ChallengeError> {
        self.db.with_immediate_tx(|tx| {
            let current = get_economy(tx, user_id)?;
            let delta = derive(&current);
            let economy = apply_economy_delta(tx, user_id, &delta)?;
            Ok((delta, economy))
        })
    }
}
