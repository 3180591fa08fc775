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

//! Core identifier and currency types shared by every component.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Unique identifier for a gamification profile.
///
/// Supplied by the identity provider; one profile per user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(transparent)]
pub struct ProfileId(pub u64);

/// Unique identifier for a ledger transaction.
///
/// Allocated by the ledger itself, monotonically increasing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(transparent)]
pub struct TransactionId(pub u64);

/// Unique identifier for an achievement catalog entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(transparent)]
pub struct AchievementId(pub u64);

/// Unique identifier for a reward catalog item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct RewardItemId(pub u64);

/// Unique identifier for a redemption record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct RedemptionId(pub u64);

/// Unique identifier for a leaderboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct LeaderboardId(pub u64);

/// Unique identifier for a gamification rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct RuleId(pub u64);

macro_rules! impl_id_display {
    ($($id:ty),* $(,)?) => {
        $(impl fmt::Display for $id {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        })*
    };
}

impl_id_display!(
    ProfileId,
    TransactionId,
    AchievementId,
    RewardItemId,
    RedemptionId,
    LeaderboardId,
    RuleId,
);

/// The closed set of virtual currencies tracked by the engine.
///
/// Every balance, cost, and reward is expressed against one of these four
/// currencies. Amounts are whole points (`i64`), signed in ledger entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Currency {
    Xp,
    Coins,
    Gems,
    Reputation,
}

impl Currency {
    /// All currencies, in canonical order.
    pub const ALL: [Currency; 4] = [
        Currency::Xp,
        Currency::Coins,
        Currency::Gems,
        Currency::Reputation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::Xp => "xp",
            Currency::Coins => "coins",
            Currency::Gems => "gems",
            Currency::Reputation => "reputation",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Currency {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "xp" => Ok(Currency::Xp),
            "coins" => Ok(Currency::Coins),
            "gems" => Ok(Currency::Gems),
            "reputation" => Ok(Currency::Reputation),
            _ => Err(()),
        }
    }
}

/// Profile tier, coarser than level; used by reward items as a gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Bronze,
    Silver,
    Gold,
    Platinum,
    Diamond,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Bronze => "bronze",
            Tier::Silver => "silver",
            Tier::Gold => "gold",
            Tier::Platinum => "platinum",
            Tier::Diamond => "diamond",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bronze" => Ok(Tier::Bronze),
            "silver" => Ok(Tier::Silver),
            "gold" => Ok(Tier::Gold),
            "platinum" => Ok(Tier::Platinum),
            "diamond" => Ok(Tier::Diamond),
            _ => Err(()),
        }
    }
}

/// A dense amount-per-currency map.
///
/// Used for cached balances, reward bundles, item costs, and revenue
/// counters. A field of zero means "no amount in that currency".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct CurrencyAmounts {
    #[serde(default)]
    pub xp: i64,
    #[serde(default)]
    pub coins: i64,
    #[serde(default)]
    pub gems: i64,
    #[serde(default)]
    pub reputation: i64,
}

impl CurrencyAmounts {
    pub const ZERO: CurrencyAmounts = CurrencyAmounts {
        xp: 0,
        coins: 0,
        gems: 0,
        reputation: 0,
    };

    pub fn get(&self, currency: Currency) -> i64 {
        match currency {
            Currency::Xp => self.xp,
            Currency::Coins => self.coins,
            Currency::Gems => self.gems,
            Currency::Reputation => self.reputation,
        }
    }

    pub fn set(&mut self, currency: Currency, amount: i64) {
        match currency {
            Currency::Xp => self.xp = amount,
            Currency::Coins => self.coins = amount,
            Currency::Gems => self.gems = amount,
            Currency::Reputation => self.reputation = amount,
        }
    }

    pub fn add(&mut self, currency: Currency, amount: i64) {
        self.set(currency, self.get(currency) + amount);
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// Iterates the non-zero (currency, amount) pairs in canonical order.
    pub fn iter_non_zero(&self) -> impl Iterator<Item = (Currency, i64)> + '_ {
        Currency::ALL
            .into_iter()
            .map(|c| (c, self.get(c)))
            .filter(|(_, amount)| *amount != 0)
    }

    /// Component-wise `self × quantity`.
    pub fn scaled(&self, quantity: u32) -> CurrencyAmounts {
        let q = i64::from(quantity);
        CurrencyAmounts {
            xp: self.xp * q,
            coins: self.coins * q,
            gems: self.gems * q,
            reputation: self.reputation * q,
        }
    }
}

/// Limit/offset window for paginated queries.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct Page {
    pub limit: usize,
    pub offset: usize,
}

impl Default for Page {
    fn default() -> Self {
        Page {
            limit: 50,
            offset: 0,
        }
    }
}
