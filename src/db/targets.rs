//! Daily target rows

use std::sync::Arc;

use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};

use super::models::{current_timestamp, format_date, DailyTarget};
use super::ChallengeDb;
use crate::collaborators::DailyTargetProvider;
use crate::error::ChallengeError;
use crate::scoring::Rgb;

pub fn get_target(conn: &Connection, date: NaiveDate) -> Result<Option<DailyTarget>, ChallengeError> {
    conn.query_row(
        "SELECT date, color_name, target_r, target_g, target_b, created_at FROM daily_targets WHERE date = ?",
        params![format_date(date)],
        DailyTarget::from_row,
    )
    .optional()
    .map_err(|e| ChallengeError::store("Target query failed", e))
}

/// Insert the day's target unless one exists. Returns the stored target and
/// whether this call created it.
pub fn publish_target(
    conn: &Connection,
    date: NaiveDate,
    color_name: Option<&str>,
    color: Rgb,
) -> Result<(DailyTarget, bool), ChallengeError> {
    let inserted = conn
        .execute(
            r#"
            INSERT OR IGNORE INTO daily_targets (date, color_name, target_r, target_g, target_b, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
            params![format_date(date), color_name, color.r, color.g, color.b, current_timestamp()],
        )
        .map_err(|e| ChallengeError::store("Target insert failed", e))?;

    let target = get_target(conn, date)?.ok_or_else(|| {
        ChallengeError::Internal(format!("target for {} missing after insert", date))
    })?;

    Ok((target, inserted == 1))
}

/// `DailyTargetProvider` backed by the challenge database
pub struct SqliteTargetProvider {
    db: Arc<ChallengeDb>,
}

impl SqliteTargetProvider {
    pub fn new(db: Arc<ChallengeDb>) -> Self {
        Self { db }
    }
}

impl DailyTargetProvider for SqliteTargetProvider {
    fn get_target(&self, date: NaiveDate) -> Result<Option<DailyTarget>, ChallengeError> {
        self.db.with_conn(|conn| get_target(conn, date))
    }
}
