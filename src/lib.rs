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

//! # Gamification Economy Engine
//!
//! This library tracks per-user virtual currencies, achievements,
//! redeemable rewards, and competitive rankings under concurrent writes,
//! preserving strict numeric invariants: no negative balances, exactly-once
//! reward issuance, deterministic ranking.
//!
//! ## Core Components
//!
//! - [`Engine`]: facade wiring the components, with an explicit lifecycle
//! - [`Ledger`]: append-only transaction log and cached balances per profile
//! - [`AchievementEngine`]: progress tracking and unlock state machine
//! - [`RedemptionEngine`]: eligibility validation and atomic redemption
//! - [`LeaderboardEngine`]: score submission and debounced re-ranking
//! - [`RuleEngine`]: platform event → reward mapping
//!
//! ## Example
//!
//! ```
//! use economy_engine_rs::{
//!     Currency, CurrencyAmounts, Engine, ProfileId, RewardItem, RewardItemId,
//!     TransactionSource,
//! };
//!
//! let engine = Engine::default();
//!
//! // Award 100 coins for a platform event
//! engine
//!     .record(
//!         ProfileId(1),
//!         Currency::Coins,
//!         100,
//!         TransactionSource::Event("daily_login".into()),
//!         None,
//!         None,
//!     )
//!     .unwrap();
//!
//! // Redeem a catalog item costing 60 coins
//! let badge = RewardItem::new(
//!     RewardItemId(1),
//!     "Profile Badge",
//!     CurrencyAmounts {
//!         coins: 60,
//!         ..CurrencyAmounts::ZERO
//!     },
//! )
//! .with_stock(1);
//! engine.register_reward_item(badge).unwrap();
//! engine.redeem(ProfileId(1), RewardItemId(1), 1).unwrap();
//!
//! assert_eq!(engine.balances(ProfileId(1)).unwrap().balances.coins, 40);
//! engine.shutdown();
//! ```
//!
//! ## Concurrency
//!
//! Each request is handled by an independent worker. Ledger mutations for a
//! given profile are serialized through that profile's lock, so
//! read-validate-write behaves as if single-threaded per profile while
//! different profiles proceed fully in parallel. Deferred leaderboard
//! re-ranking runs on a single dedicated worker thread.

pub mod achievement;
mod base;
mod engine;
pub mod error;
mod ledger;
pub mod leaderboard;
mod profile;
pub mod reward;
pub mod rules;
mod transaction;

pub use achievement::{
    Achievement, AchievementEngine, AchievementFilter, AchievementStatus, ProgressOutcome, Rarity,
    UnlockCriteria, UserAchievement,
};
pub use base::{
    AchievementId, Currency, CurrencyAmounts, LeaderboardId, Page, ProfileId, RedemptionId,
    RewardItemId, RuleId, Tier, TransactionId,
};
pub use engine::{Engine, EngineConfig};
pub use error::EngineError;
pub use leaderboard::{
    LeaderboardDef, LeaderboardEngine, LeaderboardEntry, Period, RankingMethod,
};
pub use ledger::Ledger;
pub use profile::{Profile, ProfileSnapshot, xp_for_level};
pub use reward::{
    Fulfillment, Redemption, RedemptionEngine, RedemptionStatus, RewardFilter, RewardItem,
    RewardItemView,
};
pub use rules::{EventOutcome, GamificationRule, RuleEngine};
pub use transaction::{Transaction, TransactionSource};
