//! Row and domain types
//!
//! Dates are stored as `YYYY-MM-DD` TEXT, timestamps as RFC 3339 TEXT with
//! millisecond precision so that lexical order matches time order.

use chrono::{NaiveDate, SecondsFormat, Utc};
use rusqlite::Row;
use serde::{Deserialize, Serialize};

use crate::error::ChallengeError;
use crate::scoring::Rgb;

/// Format used for the `date` column
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Current UTC timestamp for TEXT columns
pub fn current_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Today's challenge day (UTC)
pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub fn parse_date(raw: &str) -> Result<NaiveDate, ChallengeError> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT).map_err(|_| {
        ChallengeError::InvalidInput(format!("date must be in YYYY-MM-DD format, got '{}'", raw))
    })
}

fn date_column(row: &Row, name: &str) -> Result<NaiveDate, rusqlite::Error> {
    let raw: String = row.get(name)?;
    NaiveDate::parse_from_str(&raw, DATE_FORMAT).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn rgb_columns(row: &Row, r: &str, g: &str, b: &str) -> Result<Rgb, rusqlite::Error> {
    Ok(Rgb::new(row.get(r)?, row.get(g)?, row.get(b)?))
}

/// The serialization unit: one user on one challenge day
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserKey {
    pub user_id: String,
    pub date: NaiveDate,
}

impl UserKey {
    pub fn new(user_id: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            user_id: user_id.into(),
            date,
        }
    }

    pub fn date_str(&self) -> String {
        format_date(self.date)
    }
}

impl std::fmt::Display for UserKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.user_id, self.date)
    }
}

/// The day's published target color. Never mutated once stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyTarget {
    pub date: NaiveDate,
    pub color_name: Option<String>,
    pub color: Rgb,
    pub created_at: String,
}

impl DailyTarget {
    pub(crate) fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            date: date_column(row, "date")?,
            color_name: row.get("color_name")?,
            color: rgb_columns(row, "target_r", "target_g", "target_b")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// One admitted, scored submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attempt {
    pub id: i64,
    pub user_id: String,
    pub date: NaiveDate,
    pub attempt_number: u32,
    pub score: u8,
    pub submitted: Rgb,
    pub target: Rgb,
    pub created_at: String,
}

impl Attempt {
    pub(crate) fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            date: date_column(row, "date")?,
            attempt_number: row.get("attempt_number")?,
            score: row.get("score")?,
            submitted: rgb_columns(row, "submitted_r", "submitted_g", "submitted_b")?,
            target: rgb_columns(row, "target_r", "target_g", "target_b")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// Bonus attempts granted for one user and day
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptModifier {
    pub user_id: String,
    pub date: NaiveDate,
    pub extra_attempts: u32,
    pub created_at: String,
    pub updated_at: String,
}

impl AttemptModifier {
    pub(crate) fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            user_id: row.get("user_id")?,
            date: date_column(row, "date")?,
            extra_attempts: row.get("extra_attempts")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Best score for one user and day
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub id: i64,
    pub user_id: String,
    pub date: NaiveDate,
    pub best_score: u8,
    /// Attempt number of the first attempt that reached `best_score`
    pub attempts_used: u32,
    pub created_at: String,
    pub updated_at: String,
}

impl LeaderboardEntry {
    pub(crate) fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            date: date_column(row, "date")?,
            best_score: row.get("best_score")?,
            attempts_used: row.get("attempts_used")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Leaderboard row as shown to players
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedEntry {
    pub rank: u32,
    pub user_id: String,
    pub best_score: u8,
    pub attempts_used: u32,
}

/// Account currency fields this engine may touch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserEconomy {
    pub points: i64,
    pub level: i64,
    pub credits: i64,
}

impl UserEconomy {
    pub(crate) fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            points: row.get("points")?,
            level: row.get("level")?,
            credits: row.get("credits")?,
        })
    }
}

/// Amounts added to an account in one update
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EconomyDelta {
    pub points: i64,
    pub credits: i64,
    pub levels: i64,
}

/// Settlement marker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementStatus {
    /// Marker claimed, account mutation in flight
    Claimed,
    /// Rewards applied
    Applied,
}

impl SettlementStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementStatus::Claimed => "claimed",
            SettlementStatus::Applied => "applied",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "claimed" => Some(SettlementStatus::Claimed),
            "applied" => Some(SettlementStatus::Applied),
            _ => None,
        }
    }
}

/// Settlement marker for one user and day
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementRecord {
    pub user_id: String,
    pub date: NaiveDate,
    pub status: SettlementStatus,
    pub best_score: u8,
    pub points_awarded: i64,
    pub credits_awarded: i64,
    pub levels_gained: i64,
    pub claimed_at: String,
    pub applied_at: Option<String>,
}

impl SettlementRecord {
    pub(crate) fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        let status: String = row.get("status")?;
        let status = SettlementStatus::parse(&status).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                format!("unknown settlement status '{}'", status).into(),
            )
        })?;

        Ok(Self {
            user_id: row.get("user_id")?,
            date: date_column(row, "date")?,
            status,
            best_score: row.get("best_score")?,
            points_awarded: row.get("points_awarded")?,
            credits_awarded: row.get("credits_awarded")?,
            levels_gained: row.get("levels_gained")?,
            claimed_at: row.get("claimed_at")?,
            applied_at: row.get("applied_at")?,
        })
    }
}
