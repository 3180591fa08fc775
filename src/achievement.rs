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

//! Achievement progress tracking and unlocks.
//!
//! Implemented State Machine (per profile and achievement)
//!
//  locked ──progress(n)──► locked            (below threshold)
//  locked ──progress(n)──► unlocked + reward (threshold reached)
//  unlocked ──progress(n)──► unlocked        (non-repeatable: no-op, no reward)
//  unlocked ──progress(n)──► unlocked        (repeatable: new cycle, reward again)
//!
//! Reward issuance happens at most once per unlock event: the `is_unlocked`
//! flag is checked inside the same exclusive critical section that sets it,
//! and all reward currencies are credited under one profile lock.

use crate::base::{AchievementId, CurrencyAmounts, ProfileId};
use crate::error::EngineError;
use crate::ledger::Ledger;
use crate::profile::Posting;
use crate::transaction::TransactionSource;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

/// Catalog rarity band, used for listing filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Rarity {
    Common,
    Uncommon,
    Rare,
    Epic,
    Legendary,
}

/// How progress toward an achievement is driven.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UnlockCriteria {
    /// Only explicit `progress` calls advance this achievement.
    Manual,
    /// Each occurrence of the named platform event advances it by one.
    TriggerEvent { event: String },
}

/// Achievement catalog entry.
///
/// Owned by external admin tooling; read-only to the engine except for the
/// global `unlocked_count`.
#[derive(Debug)]
pub struct Achievement {
    pub id: AchievementId,
    pub name: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub rarity: Rarity,
    pub criteria: UnlockCriteria,
    /// Progress threshold; `None` means a single qualifying event unlocks.
    pub max_progress: Option<u32>,
    pub rewards: CurrencyAmounts,
    pub repeatable: bool,
    pub available_from: Option<DateTime<Utc>>,
    pub available_until: Option<DateTime<Utc>>,
    unlocked_count: AtomicU64,
}

impl Achievement {
    pub fn new(id: AchievementId, name: impl Into<String>, rewards: CurrencyAmounts) -> Self {
        Self {
            id,
            name: name.into(),
            description: None,
            category: None,
            rarity: Rarity::Common,
            criteria: UnlockCriteria::Manual,
            max_progress: None,
            rewards,
            repeatable: false,
            available_from: None,
            available_until: None,
            unlocked_count: AtomicU64::new(0),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_rarity(mut self, rarity: Rarity) -> Self {
        self.rarity = rarity;
        self
    }

    /// Marks the achievement as driven by a platform event; the rule engine
    /// advances it by one on each occurrence of `event`.
    pub fn with_trigger_event(mut self, event: impl Into<String>) -> Self {
        self.criteria = UnlockCriteria::TriggerEvent {
            event: event.into(),
        };
        self
    }

    pub fn with_max_progress(mut self, max_progress: u32) -> Self {
        self.max_progress = Some(max_progress);
        self
    }

    pub fn repeatable(mut self) -> Self {
        self.repeatable = true;
        self
    }

    pub fn with_window(
        mut self,
        from: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Self {
        self.available_from = from;
        self.available_until = until;
        self
    }

    /// How many unlock events this achievement has produced, across all
    /// profiles.
    pub fn unlocked_count(&self) -> u64 {
        self.unlocked_count.load(Ordering::Relaxed)
    }

    fn is_available_at(&self, now: DateTime<Utc>) -> bool {
        if self.available_from.is_some_and(|from| from > now) {
            return false;
        }
        if self.available_until.is_some_and(|until| until < now) {
            return false;
        }
        true
    }
}

/// Per (profile, achievement) progress row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserAchievement {
    pub achievement_id: AchievementId,
    pub current_progress: u32,
    pub is_unlocked: bool,
    pub unlocked_at: Option<DateTime<Utc>>,
    pub unlock_trigger: Option<String>,
    pub unlock_context: Option<serde_json::Value>,
}

impl UserAchievement {
    fn new(achievement_id: AchievementId) -> Self {
        Self {
            achievement_id,
            current_progress: 0,
            is_unlocked: false,
            unlocked_at: None,
            unlock_trigger: None,
            unlock_context: None,
        }
    }
}

/// Result of one `progress` call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressOutcome {
    pub user_achievement: UserAchievement,
    /// Whether this call produced an unlock event.
    pub unlocked: bool,
    /// Rewards credited by this call (zero when nothing unlocked).
    pub rewards_awarded: CurrencyAmounts,
}

/// Read-only listing projection of a catalog entry.
#[derive(Debug, Clone, Serialize)]
pub struct AchievementStatus {
    pub id: AchievementId,
    pub name: String,
    pub category: Option<String>,
    pub rarity: Rarity,
    pub max_progress: Option<u32>,
    pub rewards: CurrencyAmounts,
    pub repeatable: bool,
    pub unlocked_count: u64,
    /// The requesting profile's row, if any.
    pub user_achievement: Option<UserAchievement>,
}

/// Listing filters for [`AchievementEngine::achievements`].
#[derive(Debug, Clone, Default)]
pub struct AchievementFilter {
    pub category: Option<String>,
    pub rarity: Option<Rarity>,
    pub available_only: bool,
    /// Requires a profile id on the query.
    pub unlocked_only: bool,
}

/// Progress tracking and unlock state machine.
pub struct AchievementEngine {
    catalog: DashMap<AchievementId, Arc<Achievement>>,
    /// Progress rows, created on first progress event, never deleted.
    user_achievements: DashMap<(ProfileId, AchievementId), UserAchievement>,
    ledger: Arc<Ledger>,
}

impl AchievementEngine {
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self {
            catalog: DashMap::new(),
            user_achievements: DashMap::new(),
            ledger,
        }
    }

    /// Registers a catalog entry. Fails with [`EngineError::Conflict`] if
    /// the id is already taken.
    pub fn register(&self, achievement: Achievement) -> Result<(), EngineError> {
        match self.catalog.entry(achievement.id) {
            Entry::Occupied(_) => Err(EngineError::Conflict),
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(achievement));
                Ok(())
            }
        }
    }

    /// Advances progress for one (profile, achievement) pair.
    ///
    /// The progress row is fetched-or-created first, then the availability
    /// window is checked. An already-unlocked non-repeatable achievement is
    /// an idempotent no-op. Crossing the threshold unlocks, credits every
    /// non-zero reward currency (source `achievement_unlock`), and bumps the
    /// global unlock counter, all while holding the row exclusively; a
    /// concurrent duplicate call observes `is_unlocked` and cannot re-issue.
    ///
    /// For repeatable achievements a completed cycle consumes the threshold
    /// from the accumulated progress and rewards are issued again per cycle.
    pub fn progress(
        &self,
        profile_id: ProfileId,
        achievement_id: AchievementId,
        trigger: &str,
        increment: u32,
        context: Option<serde_json::Value>,
    ) -> Result<ProgressOutcome, EngineError> {
        let achievement = self
            .catalog
            .get(&achievement_id)
            .map(|a| Arc::clone(a.value()))
            .ok_or(EngineError::NotFound("achievement"))?;
        if increment == 0 {
            return Err(EngineError::InvalidAmount);
        }

        // Exclusive access to the row for the whole check-mutate sequence.
        let mut row = self
            .user_achievements
            .entry((profile_id, achievement_id))
            .or_insert_with(|| UserAchievement::new(achievement_id));

        let now = Utc::now();
        if !achievement.is_available_at(now) {
            return Err(EngineError::NotAvailable);
        }

        if row.is_unlocked && !achievement.repeatable {
            return Ok(ProgressOutcome {
                user_achievement: row.clone(),
                unlocked: false,
                rewards_awarded: CurrencyAmounts::ZERO,
            });
        }

        let new_progress = row.current_progress + increment;
        let threshold = achievement.max_progress.unwrap_or(1);
        let is_completed = new_progress >= threshold;

        if !is_completed {
            row.current_progress = new_progress;
            return Ok(ProgressOutcome {
                user_achievement: row.clone(),
                unlocked: false,
                rewards_awarded: CurrencyAmounts::ZERO,
            });
        }

        // Unlock path. Rewards are credited before the row is mutated, so a
        // timeout mid-issuance leaves the row (and a later retry) intact.
        self.issue_rewards(profile_id, &achievement, now)?;

        row.is_unlocked = true;
        row.unlocked_at = Some(now);
        row.unlock_trigger = Some(trigger.to_owned());
        row.unlock_context = context;
        // Repeatable cycles carry the remainder into the next cycle.
        row.current_progress = if achievement.repeatable {
            new_progress - threshold
        } else {
            new_progress
        };
        achievement.unlocked_count.fetch_add(1, Ordering::Relaxed);

        info!(
            profile = %profile_id,
            achievement = %achievement_id,
            trigger,
            "achievement unlocked"
        );

        Ok(ProgressOutcome {
            user_achievement: row.clone(),
            unlocked: true,
            rewards_awarded: achievement.rewards,
        })
    }

    /// Credits every non-zero reward currency in one atomic unit under the
    /// profile lock.
    fn issue_rewards(
        &self,
        profile_id: ProfileId,
        achievement: &Achievement,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        if achievement.rewards.is_zero() {
            return Ok(());
        }
        let description = format!("Achievement unlocked: {}", achievement.name);
        self.ledger.with_profile(profile_id, |data| {
            for (currency, amount) in achievement.rewards.iter_non_zero() {
                let posting = Posting {
                    currency,
                    amount,
                    base_amount: amount,
                    multiplier: Decimal::ONE,
                    source: TransactionSource::AchievementUnlock,
                    source_id: Some(achievement.id.to_string()),
                    description: Some(description.clone()),
                };
                data.apply(self.ledger.next_transaction_id(), posting, now)?;
            }
            Ok(())
        })?;
        debug!(profile = %profile_id, achievement = %achievement.id, "unlock rewards issued");
        Ok(())
    }

    /// Ids of currently-available achievements whose criteria name `event`.
    pub(crate) fn triggered_by(&self, event: &str) -> Vec<AchievementId> {
        let now = Utc::now();
        let mut ids: Vec<AchievementId> = self
            .catalog
            .iter()
            .filter(|entry| {
                let a = entry.value();
                a.is_available_at(now)
                    && matches!(&a.criteria, UnlockCriteria::TriggerEvent { event: e } if e == event)
            })
            .map(|entry| entry.value().id)
            .collect();
        ids.sort_by_key(|id| id.0);
        ids
    }

    /// Returns the progress row for one (profile, achievement) pair, if it
    /// exists.
    pub fn user_achievement(
        &self,
        profile_id: ProfileId,
        achievement_id: AchievementId,
    ) -> Option<UserAchievement> {
        self.user_achievements
            .get(&(profile_id, achievement_id))
            .map(|row| row.clone())
    }

    /// Lists catalog entries with optional per-profile status.
    pub fn achievements(
        &self,
        profile_id: Option<ProfileId>,
        filter: &AchievementFilter,
    ) -> Vec<AchievementStatus> {
        let now = Utc::now();
        let mut statuses: Vec<AchievementStatus> = self
            .catalog
            .iter()
            .filter(|entry| {
                let a = entry.value();
                if filter.available_only && !a.is_available_at(now) {
                    return false;
                }
                if let Some(category) = &filter.category
                    && a.category.as_deref() != Some(category.as_str())
                {
                    return false;
                }
                if let Some(rarity) = filter.rarity
                    && a.rarity != rarity
                {
                    return false;
                }
                true
            })
            .map(|entry| {
                let a = entry.value();
                let user_achievement =
                    profile_id.and_then(|pid| self.user_achievement(pid, a.id));
                AchievementStatus {
                    id: a.id,
                    name: a.name.clone(),
                    category: a.category.clone(),
                    rarity: a.rarity,
                    max_progress: a.max_progress,
                    rewards: a.rewards,
                    repeatable: a.repeatable,
                    unlocked_count: a.unlocked_count(),
                    user_achievement,
                }
            })
            .collect();

        if filter.unlocked_only {
            statuses.retain(|s| {
                s.user_achievement
                    .as_ref()
                    .is_some_and(|ua| ua.is_unlocked)
            });
        }
        statuses.sort_by_key(|s| s.id.0);
        statuses
    }
}
