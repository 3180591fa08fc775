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

//! Gamification economy engine.
//!
//! The [`Engine`] wires the components together and owns all engine state
//! with an explicit lifecycle: constructed once at startup from an
//! [`EngineConfig`], shared across request workers, and shut down once at
//! process exit ([`Engine::shutdown`] flushes and joins the ranking worker).
//!
//! # Thread Safety
//!
//! Every method takes `&self`. Profiles are serialized individually (see
//! [`crate::ledger`]), so concurrent callers touching different profiles
//! proceed fully in parallel.

use crate::achievement::{
    Achievement, AchievementEngine, AchievementFilter, AchievementStatus, ProgressOutcome,
};
use crate::base::{
    AchievementId, Currency, LeaderboardId, Page, ProfileId, RedemptionId, RewardItemId, Tier,
};
use crate::error::EngineError;
use crate::ledger::Ledger;
use crate::leaderboard::{LeaderboardDef, LeaderboardEngine, LeaderboardEntry};
use crate::profile::ProfileSnapshot;
use crate::reward::{
    Redemption, RedemptionEngine, RewardFilter, RewardItem, RewardItemView,
};
use crate::rules::{EventOutcome, GamificationRule, RuleEngine};
use crate::transaction::{Transaction, TransactionSource};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Engine tuning knobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Budget for acquiring a profile's serialization lock; operations
    /// exceeding it fail with retryable [`EngineError::Timeout`].
    pub op_budget: Duration,
    /// Coalescing window of the deferred ranking worker.
    pub rank_debounce: Duration,
    /// Boards at or below this participant count re-rank inline on every
    /// submission; larger boards go through the debounced worker.
    pub inline_rank_threshold: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            op_budget: Duration::from_millis(200),
            rank_debounce: Duration::from_millis(50),
            inline_rank_threshold: 100,
        }
    }
}

/// Facade over the ledger, achievement, redemption, leaderboard, and rule
/// components.
pub struct Engine {
    ledger: Arc<Ledger>,
    achievements: Arc<AchievementEngine>,
    rewards: RedemptionEngine,
    leaderboards: LeaderboardEngine,
    rules: RuleEngine,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        info!(
            op_budget_ms = config.op_budget.as_millis() as u64,
            rank_debounce_ms = config.rank_debounce.as_millis() as u64,
            inline_rank_threshold = config.inline_rank_threshold,
            "starting gamification engine"
        );
        let ledger = Arc::new(Ledger::new(config.op_budget));
        let achievements = Arc::new(AchievementEngine::new(Arc::clone(&ledger)));
        let rewards = RedemptionEngine::new(Arc::clone(&ledger));
        let leaderboards =
            LeaderboardEngine::new(config.rank_debounce, config.inline_rank_threshold);
        let rules = RuleEngine::new(Arc::clone(&ledger), Arc::clone(&achievements));
        Self {
            ledger,
            achievements,
            rewards,
            leaderboards,
            rules,
        }
    }

    /// Flushes pending rank recomputations and joins the worker thread.
    pub fn shutdown(&self) {
        self.leaderboards.shutdown();
        info!("gamification engine stopped");
    }

    // === Ledger & balances ===

    pub fn record(
        &self,
        profile_id: ProfileId,
        currency: Currency,
        amount: i64,
        source: TransactionSource,
        source_id: Option<String>,
        description: Option<String>,
    ) -> Result<Transaction, EngineError> {
        self.ledger
            .record(profile_id, currency, amount, source, source_id, description)
    }

    pub fn record_once(
        &self,
        profile_id: ProfileId,
        currency: Currency,
        amount: i64,
        source: TransactionSource,
        source_id: String,
        description: Option<String>,
    ) -> Result<Transaction, EngineError> {
        self.ledger
            .record_once(profile_id, currency, amount, source, source_id, description)
    }

    pub fn balances(&self, profile_id: ProfileId) -> Result<ProfileSnapshot, EngineError> {
        self.ledger.balances(profile_id)
    }

    pub fn transactions(
        &self,
        profile_id: ProfileId,
        currency: Option<Currency>,
        page: Page,
    ) -> Result<(Vec<Transaction>, usize), EngineError> {
        self.ledger.transactions(profile_id, currency, page)
    }

    pub fn snapshots(&self) -> Vec<ProfileSnapshot> {
        self.ledger.snapshots()
    }

    pub fn set_tier(&self, profile_id: ProfileId, tier: Tier) -> Result<(), EngineError> {
        self.ledger.set_tier(profile_id, tier)
    }

    // === Achievements ===

    pub fn register_achievement(&self, achievement: Achievement) -> Result<(), EngineError> {
        self.achievements.register(achievement)
    }

    pub fn progress(
        &self,
        profile_id: ProfileId,
        achievement_id: AchievementId,
        trigger: &str,
        increment: u32,
        context: Option<serde_json::Value>,
    ) -> Result<ProgressOutcome, EngineError> {
        self.achievements
            .progress(profile_id, achievement_id, trigger, increment, context)
    }

    pub fn achievements(
        &self,
        profile_id: Option<ProfileId>,
        filter: &AchievementFilter,
    ) -> Vec<AchievementStatus> {
        self.achievements.achievements(profile_id, filter)
    }

    // === Rewards ===

    pub fn register_reward_item(&self, item: RewardItem) -> Result<(), EngineError> {
        self.rewards.register(item)
    }

    pub fn redeem(
        &self,
        profile_id: ProfileId,
        item_id: RewardItemId,
        quantity: u32,
    ) -> Result<Redemption, EngineError> {
        self.rewards.redeem(profile_id, item_id, quantity)
    }

    pub fn rewards(
        &self,
        profile_id: Option<ProfileId>,
        filter: &RewardFilter,
    ) -> Vec<RewardItemView> {
        self.rewards.rewards(profile_id, filter)
    }

    pub fn redemptions(&self, profile_id: ProfileId) -> Vec<Redemption> {
        self.rewards.redemptions(profile_id)
    }

    pub fn fulfill_redemption(
        &self,
        profile_id: ProfileId,
        redemption_id: RedemptionId,
    ) -> Result<Redemption, EngineError> {
        self.rewards.fulfill(profile_id, redemption_id)
    }

    pub fn fail_redemption(
        &self,
        profile_id: ProfileId,
        redemption_id: RedemptionId,
    ) -> Result<Redemption, EngineError> {
        self.rewards.fail(profile_id, redemption_id)
    }

    // === Leaderboards ===

    pub fn register_leaderboard(&self, def: LeaderboardDef) -> Result<(), EngineError> {
        self.leaderboards.register(def)
    }

    pub fn submit_score(
        &self,
        leaderboard_id: LeaderboardId,
        profile_id: ProfileId,
        score: i64,
    ) -> Result<LeaderboardEntry, EngineError> {
        self.leaderboards
            .submit_score(leaderboard_id, profile_id, score)
    }

    pub fn recalculate_rankings(&self, leaderboard_id: LeaderboardId) -> Result<(), EngineError> {
        self.leaderboards.recalculate_rankings(leaderboard_id)
    }

    pub fn leaderboard_entries(
        &self,
        leaderboard_id: LeaderboardId,
        page: Page,
    ) -> Result<(Vec<LeaderboardEntry>, usize), EngineError> {
        self.leaderboards.entries(leaderboard_id, page)
    }

    pub fn leaderboard_entry(
        &self,
        leaderboard_id: LeaderboardId,
        profile_id: ProfileId,
    ) -> Option<LeaderboardEntry> {
        self.leaderboards.entry(leaderboard_id, profile_id)
    }

    // === Rules ===

    pub fn register_rule(&self, rule: GamificationRule) -> Result<(), EngineError> {
        self.rules.register(rule)
    }

    pub fn rules(&self) -> Vec<GamificationRule> {
        self.rules.rules()
    }

    /// Rule-engine entry point: applies every active rule matching `event`.
    pub fn apply_event(
        &self,
        profile_id: ProfileId,
        event: &str,
        event_id: &str,
        context: Option<serde_json::Value>,
    ) -> Result<EventOutcome, EngineError> {
        self.rules.apply_event(profile_id, event, event_id, context)
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}
