//! Interfaces this engine consumes from the rest of the game
//!
//! The SQLite implementations live next to their tables in `db::targets`
//! and `db::accounts`. Calls are synchronous; async callers go through
//! `spawn_blocking`.

use chrono::NaiveDate;
use serde_json::Value;

use crate::db::models::{DailyTarget, EconomyDelta, UserEconomy};
use crate::error::ChallengeError;

/// Source of the day's target color
pub trait DailyTargetProvider: Send + Sync {
    /// `Ok(None)` when nothing is published for `date`
    fn get_target(&self, date: NaiveDate) -> Result<Option<DailyTarget>, ChallengeError>;
}

/// The only account mutation surface used here
pub trait AccountStore: Send + Sync {
    fn get_economy(&self, user_id: &str) -> Result<UserEconomy, ChallengeError>;

    /// Read the account, derive a delta from it and add that delta, as one
    /// atomic step. Returns the applied delta and the resulting economy.
    ///
    /// `derive` sees the committed state no concurrent update can change
    /// before this one lands.
    fn update_economy(
        &self,
        user_id: &str,
        derive: &dyn Fn(&UserEconomy) -> EconomyDelta,
    ) -> Result<(EconomyDelta, UserEconomy), ChallengeError>;
}

/// Inventory side of the item-use flow
pub trait ItemEffectSource: Send + Sync {
    /// How many extra attempts the item grants, without consuming it
    fn extra_attempt_effect(&self, user_id: &str) -> Result<u32, ChallengeError>;

    /// Remove the item from the user's inventory
    fn consume(&self, user_id: &str) -> Result<(), ChallengeError>;
}

/// Effect type tag on shop item metadata
pub const EXTRA_ATTEMPT_EFFECT: &str = "extra_attempt";

/// Read an extra-attempt effect out of item metadata.
///
/// Returns `None` unless `effect_type` is `"extra_attempt"`. The count comes
/// from `extra_attempts` (number or numeric string, fractions truncated);
/// missing or non-positive values fall back to 1.
pub fn parse_extra_attempt_effect(metadata: &Value) -> Option<u32> {
    if metadata.get("effect_type").and_then(Value::as_str) != Some(EXTRA_ATTEMPT_EFFECT) {
        return None;
    }

    let requested = match metadata.get("extra_attempts") {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
        _ => None,
    };

    Some(
        requested
            .filter(|n| *n > 0)
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(1),
    )
}

/// An item the caller has already taken out of inventory: its metadata is
/// the effect and consuming it is a no-op
#[derive(Debug, Clone)]
pub struct ItemMetadata(pub Value);

impl ItemEffectSource for ItemMetadata {
    fn extra_attempt_effect(&self, _user_id: &str) -> Result<u32, ChallengeError> {
        parse_extra_attempt_effect(&self.0).ok_or_else(|| {
            ChallengeError::InvalidInput("item has no extra_attempt effect".to_string())
        })
    }

    fn consume(&self, _user_id: &str) -> Result<(), ChallengeError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_effect_parsing() {
        let parse = |v: Value| parse_extra_attempt_effect(&v);

        assert_eq!(parse(json!({"effect_type": "extra_attempt"})), Some(1));
        assert_eq!(parse(json!({"effect_type": "extra_attempt", "extra_attempts": 3})), Some(3));
        assert_eq!(parse(json!({"effect_type": "extra_attempt", "extra_attempts": 2.9})), Some(2));
        assert_eq!(parse(json!({"effect_type": "extra_attempt", "extra_attempts": "4"})), Some(4));
        assert_eq!(parse(json!({"effect_type": "extra_attempt", "extra_attempts": -2})), Some(1));
        assert_eq!(parse(json!({"effect_type": "extra_attempt", "extra_attempts": "lots"})), Some(1));
        assert_eq!(parse(json!({"effect_type": "cosmetic"})), None);
        assert_eq!(parse(json!({})), None);
    }

    #[test]
    fn test_item_metadata_source() {
        let item = ItemMetadata(json!({"effect_type": "extra_attempt", "extra_attempts": 2}));
        assert_eq!(item.extra_attempt_effect("u").unwrap(), 2);
        assert!(item.consume("u").is_ok());

        let badge = ItemMetadata(json!({"effect_type": "badge"}));
        assert!(matches!(
            badge.extra_attempt_effect("u"),
            Err(ChallengeError::InvalidInput(_))
        ));
    }
}
