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

//! Rule engine: platform event → reward mapping.
//!
//! The rule engine is the external trigger layer. It drives the rest of the
//! engine purely through the ledger and the achievement engine: each
//! matching rule turns one platform event into multiplied point awards
//! (recorded with an idempotency key derived from the caller's event id)
//! and progress on its linked achievements.

use crate::achievement::{AchievementEngine, ProgressOutcome};
use crate::base::{AchievementId, CurrencyAmounts, ProfileId, RuleId};
use crate::error::EngineError;
use crate::ledger::Ledger;
use crate::profile::Posting;
use crate::transaction::TransactionSource;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Event → reward mapping rule. Owned by external admin tooling.
#[derive(Debug, Clone, Serialize)]
pub struct GamificationRule {
    pub id: RuleId,
    pub name: String,
    pub description: Option<String>,
    /// Platform event name this rule reacts to.
    pub trigger_event: String,
    /// Base amounts awarded per matching event, before the multiplier.
    pub point_rewards: CurrencyAmounts,
    pub bonus_multiplier: Decimal,
    /// Achievements advanced by one step per matching event.
    pub achievement_ids: Vec<AchievementId>,
    pub is_active: bool,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    /// Maximum applications per profile; `None` means unlimited.
    pub trigger_limit: Option<u32>,
}

impl GamificationRule {
    pub fn new(
        id: RuleId,
        name: impl Into<String>,
        trigger_event: impl Into<String>,
        point_rewards: CurrencyAmounts,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            description: None,
            trigger_event: trigger_event.into(),
            point_rewards,
            bonus_multiplier: Decimal::ONE,
            achievement_ids: Vec::new(),
            is_active: true,
            valid_from: None,
            valid_until: None,
            trigger_limit: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_multiplier(mut self, multiplier: Decimal) -> Self {
        self.bonus_multiplier = multiplier;
        self
    }

    pub fn with_achievements(mut self, achievement_ids: Vec<AchievementId>) -> Self {
        self.achievement_ids = achievement_ids;
        self
    }

    pub fn with_window(
        mut self,
        from: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Self {
        self.valid_from = from;
        self.valid_until = until;
        self
    }

    pub fn with_trigger_limit(mut self, limit: u32) -> Self {
        self.trigger_limit = Some(limit);
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        if !self.is_active {
            return false;
        }
        if self.valid_from.is_some_and(|from| from > now) {
            return false;
        }
        if self.valid_until.is_some_and(|until| until < now) {
            return false;
        }
        true
    }
}

/// Result of applying one platform event.
#[derive(Debug, Clone, Serialize)]
pub struct EventOutcome {
    /// Points actually recorded by this call (replayed postings excluded).
    pub points_awarded: CurrencyAmounts,
    pub achievements: Vec<ProgressOutcome>,
    pub rules_applied: u32,
}

/// Thin event-driven entry point over the ledger and achievement engine.
pub struct RuleEngine {
    rules: DashMap<RuleId, Arc<GamificationRule>>,
    /// Applications per (profile, rule), for `trigger_limit` enforcement.
    applications: DashMap<(ProfileId, RuleId), u32>,
    ledger: Arc<Ledger>,
    achievements: Arc<AchievementEngine>,
}

impl RuleEngine {
    pub fn new(ledger: Arc<Ledger>, achievements: Arc<AchievementEngine>) -> Self {
        Self {
            rules: DashMap::new(),
            applications: DashMap::new(),
            ledger,
            achievements,
        }
    }

    /// Registers a rule. Fails with [`EngineError::Conflict`] if the id is
    /// already taken.
    pub fn register(&self, rule: GamificationRule) -> Result<(), EngineError> {
        match self.rules.entry(rule.id) {
            Entry::Occupied(_) => Err(EngineError::Conflict),
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(rule));
                Ok(())
            }
        }
    }

    /// Lists all registered rules, ordered by id.
    pub fn rules(&self) -> Vec<GamificationRule> {
        let mut rules: Vec<GamificationRule> =
            self.rules.iter().map(|r| r.value().as_ref().clone()).collect();
        rules.sort_by_key(|r| r.id.0);
        rules
    }

    /// Applies every active rule matching `event` to the profile, then
    /// advances any achievement whose own criteria name the event.
    ///
    /// Point awards are recorded with an idempotency key of
    /// `(event_id, rule, currency)`, so replaying the same `event_id` skips
    /// postings that already went through instead of double-crediting;
    /// `points_awarded` reports only what this call recorded. Achievements
    /// that are missing from the catalog or outside their window are skipped
    /// with a log line rather than failing the whole event.
    pub fn apply_event(
        &self,
        profile_id: ProfileId,
        event: &str,
        event_id: &str,
        context: Option<serde_json::Value>,
    ) -> Result<EventOutcome, EngineError> {
        let now = Utc::now();
        let mut matching: Vec<Arc<GamificationRule>> = self
            .rules
            .iter()
            .filter(|r| r.trigger_event == event && r.is_valid_at(now))
            .map(|r| Arc::clone(r.value()))
            .collect();
        matching.sort_by_key(|r| r.id.0);

        let mut outcome = EventOutcome {
            points_awarded: CurrencyAmounts::ZERO,
            achievements: Vec::new(),
            rules_applied: 0,
        };
        let mut advanced = BTreeSet::new();

        for rule in matching {
            // Check-and-count under the entry so concurrent events cannot
            // both claim the final application of a limited rule.
            let mut applications = self.applications.entry((profile_id, rule.id)).or_insert(0);
            if rule.trigger_limit.is_some_and(|limit| *applications >= limit) {
                debug!(profile = %profile_id, rule = %rule.id, "trigger limit reached");
                continue;
            }

            self.apply_rule(
                profile_id,
                &rule,
                event,
                event_id,
                &context,
                &mut outcome,
                &mut advanced,
            )?;
            *applications += 1;
            outcome.rules_applied += 1;
        }

        // Criteria-driven achievements advance once per event, even when a
        // rule already linked them.
        for achievement_id in self.achievements.triggered_by(event) {
            if advanced.contains(&achievement_id) {
                continue;
            }
            self.progress_achievement(profile_id, achievement_id, event, &context, &mut outcome)?;
        }

        Ok(outcome)
    }

    fn apply_rule(
        &self,
        profile_id: ProfileId,
        rule: &GamificationRule,
        event: &str,
        event_id: &str,
        context: &Option<serde_json::Value>,
        outcome: &mut EventOutcome,
        advanced: &mut BTreeSet<AchievementId>,
    ) -> Result<(), EngineError> {
        for (currency, base_amount) in rule.point_rewards.iter_non_zero() {
            let amount = (Decimal::from(base_amount) * rule.bonus_multiplier)
                .round()
                .to_i64()
                .ok_or(EngineError::InvalidAmount)?;
            if amount == 0 {
                continue;
            }
            let posting = Posting {
                currency,
                amount,
                base_amount,
                multiplier: rule.bonus_multiplier,
                source: TransactionSource::Event(event.to_owned()),
                source_id: Some(event_id.to_owned()),
                description: rule.description.clone(),
            };
            let dedupe_key = format!("{}/{}/{}", event_id, rule.id, currency);
            match self.ledger.post(profile_id, posting, Some(dedupe_key)) {
                Ok(transaction) => outcome.points_awarded.add(currency, transaction.amount),
                Err(EngineError::DuplicateEvent) => {
                    debug!(
                        profile = %profile_id,
                        rule = %rule.id,
                        event_id,
                        "event already applied, skipping posting"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        for achievement_id in &rule.achievement_ids {
            advanced.insert(*achievement_id);
            self.progress_achievement(profile_id, *achievement_id, event, context, outcome)?;
        }
        Ok(())
    }

    fn progress_achievement(
        &self,
        profile_id: ProfileId,
        achievement_id: AchievementId,
        event: &str,
        context: &Option<serde_json::Value>,
        outcome: &mut EventOutcome,
    ) -> Result<(), EngineError> {
        match self
            .achievements
            .progress(profile_id, achievement_id, event, 1, context.clone())
        {
            Ok(progress) => outcome.achievements.push(progress),
            Err(EngineError::NotFound(_)) => {
                warn!(achievement = %achievement_id, "event references unknown achievement");
            }
            Err(EngineError::NotAvailable) => {
                debug!(achievement = %achievement_id, "achievement outside window");
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }
}
