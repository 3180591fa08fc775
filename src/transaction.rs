// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Ledger transaction records.
//!
//! A [`Transaction`] is the immutable trace of one signed currency movement.
//! Records are append-only: they are never updated or deleted, and for every
//! (profile, currency) the cached balance equals the running sum of the
//! pair's transaction amounts.

use crate::base::{Currency, ProfileId, TransactionId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// What produced a ledger entry.
///
/// `AchievementUnlock` and `RewardRedemption` are written by the engine's own
/// components; `Event` carries the trigger name of a rule-engine or caller
/// event (`"daily_login"`, `"course_completed"`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionSource {
    AchievementUnlock,
    RewardRedemption,
    #[serde(untagged)]
    Event(String),
}

impl TransactionSource {
    pub fn as_str(&self) -> &str {
        match self {
            TransactionSource::AchievementUnlock => "achievement_unlock",
            TransactionSource::RewardRedemption => "reward_redemption",
            TransactionSource::Event(name) => name,
        }
    }
}

/// Immutable record of a single signed currency movement.
///
/// `previous_balance` and `new_balance` snapshot the cached balance around
/// the write; `base_amount` and `multiplier` preserve how a rule-driven
/// award was computed (`amount = round(base_amount × multiplier)`).
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub profile_id: ProfileId,
    pub currency: Currency,
    pub amount: i64,
    pub previous_balance: i64,
    pub new_balance: i64,
    pub source: TransactionSource,
    pub source_id: Option<String>,
    pub description: Option<String>,
    pub base_amount: i64,
    pub multiplier: Decimal,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// `"earned"` for credits, `"spent"` for debits.
    pub fn kind(&self) -> &'static str {
        if self.amount < 0 { "spent" } else { "earned" }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_serializes_as_plain_strings() {
        let unlock = serde_json::to_string(&TransactionSource::AchievementUnlock).unwrap();
        assert_eq!(unlock, "\"achievement_unlock\"");

        let event = serde_json::to_string(&TransactionSource::Event("daily_login".into())).unwrap();
        assert_eq!(event, "\"daily_login\"");
    }

    #[test]
    fn source_deserializes_engine_sources_as_variants() {
        let source: TransactionSource = serde_json::from_str("\"reward_redemption\"").unwrap();
        assert_eq!(source, TransactionSource::RewardRedemption);

        let source: TransactionSource = serde_json::from_str("\"quiz_passed\"").unwrap();
        assert_eq!(source, TransactionSource::Event("quiz_passed".into()));
    }
}
