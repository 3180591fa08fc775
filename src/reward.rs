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

//! Reward catalog and redemption processing.
//!
//! A redemption exchanges currency for a catalog item. Validation runs in a
//! fixed order (first failure wins), and on success the debits, the
//! redemption record, and the stock/revenue counters are committed as one
//! atomic unit: the profile lock covers the balance check and the debits,
//! and the item lock covers the stock check and its decrement, so no
//! partial debit or partial stock change is ever observable.

use crate::base::{CurrencyAmounts, ProfileId, RedemptionId, RewardItemId, Tier};
use crate::error::EngineError;
use crate::ledger::Ledger;
use crate::profile::Posting;
use crate::transaction::TransactionSource;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// How a purchased item is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Fulfillment {
    /// Digital goods: the redemption is fulfilled at purchase time.
    Instant,
    /// Physical or manually-processed goods: the redemption stays pending
    /// until an external fulfillment service resolves it.
    Deferred,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RedemptionStatus {
    Pending,
    Fulfilled,
    Failed,
}

/// Mutable counters of a catalog item, touched only by successful
/// redemptions.
#[derive(Debug)]
struct ItemState {
    /// Remaining stock; `None` means unlimited.
    stock: Option<u32>,
    total_purchases: u64,
    total_revenue: CurrencyAmounts,
}

/// Reward catalog entry.
///
/// Definition fields are owned by external admin tooling and read-only to
/// the engine; only the counters in `state` change at runtime.
#[derive(Debug)]
pub struct RewardItem {
    pub id: RewardItemId,
    pub name: String,
    pub category: Option<String>,
    pub fulfillment: Fulfillment,
    /// Unit cost; scaled by quantity at redemption time.
    pub cost: CurrencyAmounts,
    pub max_per_user: Option<u32>,
    pub level_requirement: u32,
    pub tier_requirement: Option<Tier>,
    pub available_from: Option<DateTime<Utc>>,
    pub available_until: Option<DateTime<Utc>>,
    pub is_active: bool,
    state: Mutex<ItemState>,
}

impl RewardItem {
    pub fn new(id: RewardItemId, name: impl Into<String>, cost: CurrencyAmounts) -> Self {
        Self {
            id,
            name: name.into(),
            category: None,
            fulfillment: Fulfillment::Instant,
            cost,
            max_per_user: None,
            level_requirement: 1,
            tier_requirement: None,
            available_from: None,
            available_until: None,
            is_active: true,
            state: Mutex::new(ItemState {
                stock: None,
                total_purchases: 0,
                total_revenue: CurrencyAmounts::ZERO,
            }),
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_fulfillment(mut self, fulfillment: Fulfillment) -> Self {
        self.fulfillment = fulfillment;
        self
    }

    pub fn with_stock(self, stock: u32) -> Self {
        self.state.lock().stock = Some(stock);
        self
    }

    pub fn with_max_per_user(mut self, max_per_user: u32) -> Self {
        self.max_per_user = Some(max_per_user);
        self
    }

    pub fn with_level_requirement(mut self, level: u32) -> Self {
        self.level_requirement = level;
        self
    }

    pub fn with_tier_requirement(mut self, tier: Tier) -> Self {
        self.tier_requirement = Some(tier);
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

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    pub fn stock(&self) -> Option<u32> {
        self.state.lock().stock
    }

    pub fn total_purchases(&self) -> u64 {
        self.state.lock().total_purchases
    }

    pub fn total_revenue(&self) -> CurrencyAmounts {
        self.state.lock().total_revenue
    }

    fn is_available_at(&self, now: DateTime<Utc>) -> bool {
        if !self.is_active {
            return false;
        }
        if self.available_from.is_some_and(|from| from > now) {
            return false;
        }
        if self.available_until.is_some_and(|until| until < now) {
            return false;
        }
        true
    }
}

/// Purchase record, created atomically with its debiting transactions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Redemption {
    pub id: RedemptionId,
    pub profile_id: ProfileId,
    pub item_id: RewardItemId,
    pub quantity: u32,
    /// Cost snapshot at purchase time (unit cost × quantity).
    pub total_cost: CurrencyAmounts,
    pub status: RedemptionStatus,
    pub created_at: DateTime<Utc>,
    pub fulfilled_at: Option<DateTime<Utc>>,
}

/// Listing projection of a catalog item, optionally annotated with the
/// requesting profile's eligibility.
#[derive(Debug, Clone, Serialize)]
pub struct RewardItemView {
    pub id: RewardItemId,
    pub name: String,
    pub category: Option<String>,
    pub fulfillment: Fulfillment,
    pub cost: CurrencyAmounts,
    pub stock: Option<u32>,
    pub max_per_user: Option<u32>,
    pub level_requirement: u32,
    pub tier_requirement: Option<Tier>,
    pub is_active: bool,
    pub total_purchases: u64,
    pub can_purchase: Option<bool>,
    pub purchase_blockers: Vec<String>,
}

/// Listing filters for [`RedemptionEngine::rewards`].
#[derive(Debug, Clone, Default)]
pub struct RewardFilter {
    pub category: Option<String>,
    pub available_only: bool,
}

/// Eligibility validation and atomic currency-debit-plus-fulfillment.
pub struct RedemptionEngine {
    items: DashMap<RewardItemId, Arc<RewardItem>>,
    /// Redemption history per profile. Mutated only under that profile's
    /// ledger lock, so the max-per-user check and the insert are serialized.
    redemptions: DashMap<ProfileId, Vec<Redemption>>,
    next_redemption_id: AtomicU64,
    ledger: Arc<Ledger>,
}

impl RedemptionEngine {
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self {
            items: DashMap::new(),
            redemptions: DashMap::new(),
            next_redemption_id: AtomicU64::new(0),
            ledger,
        }
    }

    /// Registers a catalog item. Fails with [`EngineError::Conflict`] if the
    /// id is already taken.
    pub fn register(&self, item: RewardItem) -> Result<(), EngineError> {
        match self.items.entry(item.id) {
            Entry::Occupied(_) => Err(EngineError::Conflict),
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(item));
                Ok(())
            }
        }
    }

    /// Redeems `quantity` units of an item for a profile.
    ///
    /// Validation order, first failure wins:
    ///
    /// 1. Inactive or outside availability window → [`EngineError::NotAvailable`]
    /// 2. Level below requirement or tier mismatch → [`EngineError::RequirementNotMet`]
    /// 3. Finite stock below quantity → [`EngineError::OutOfStock`]
    /// 4. Per-user limit would be exceeded → [`EngineError::LimitExceeded`]
    /// 5. Any currency balance below cost × quantity → [`EngineError::InsufficientBalance`]
    ///
    /// On success, one atomic unit debits every cost currency (source
    /// `reward_redemption`), creates the redemption record, decrements
    /// stock, and bumps the purchase/revenue counters. Instantly-fulfillable
    /// items transition straight to `Fulfilled`.
    pub fn redeem(
        &self,
        profile_id: ProfileId,
        item_id: RewardItemId,
        quantity: u32,
    ) -> Result<Redemption, EngineError> {
        if quantity == 0 {
            return Err(EngineError::InvalidAmount);
        }
        let item = self
            .items
            .get(&item_id)
            .map(|i| Arc::clone(i.value()))
            .ok_or(EngineError::NotFound("reward item"))?;

        let now = Utc::now();
        if !item.is_available_at(now) {
            return Err(EngineError::NotAvailable);
        }

        let total_cost = item.cost.scaled(quantity);

        let redemption = self.ledger.with_profile(profile_id, |data| {
            if data.level() < item.level_requirement
                || item.tier_requirement.is_some_and(|t| t != data.tier())
            {
                return Err(EngineError::RequirementNotMet);
            }

            // Item lock held through the decrement: concurrent redemptions
            // of the same item from different profiles serialize here, so
            // stock can never be over-consumed.
            let mut state = item.state.lock();
            if state.stock.is_some_and(|stock| stock < quantity) {
                return Err(EngineError::OutOfStock);
            }

            if let Some(max_per_user) = item.max_per_user {
                let prior: u32 = self
                    .redemptions
                    .get(&profile_id)
                    .map(|history| {
                        history
                            .iter()
                            .filter(|r| r.item_id == item_id)
                            .map(|r| r.quantity)
                            .sum()
                    })
                    .unwrap_or(0);
                if prior + quantity > max_per_user {
                    return Err(EngineError::LimitExceeded);
                }
            }

            // All balances are verified before the first debit, under the
            // same profile lock, so the debit loop below cannot fail partway.
            data.check_cost(&total_cost)?;

            let description = format!("Redeemed: {} x{}", item.name, quantity);
            for (currency, amount) in total_cost.iter_non_zero() {
                let posting = Posting {
                    currency,
                    amount: -amount,
                    base_amount: amount,
                    multiplier: Decimal::ONE,
                    source: TransactionSource::RewardRedemption,
                    source_id: Some(item_id.to_string()),
                    description: Some(description.clone()),
                };
                data.apply(self.ledger.next_transaction_id(), posting, now)?;
            }

            if let Some(stock) = state.stock.as_mut() {
                *stock -= quantity;
            }
            state.total_purchases += u64::from(quantity);
            for (currency, amount) in total_cost.iter_non_zero() {
                state.total_revenue.add(currency, amount);
            }

            let status = match item.fulfillment {
                Fulfillment::Instant => RedemptionStatus::Fulfilled,
                Fulfillment::Deferred => RedemptionStatus::Pending,
            };
            let redemption = Redemption {
                id: RedemptionId(self.next_redemption_id.fetch_add(1, Ordering::Relaxed) + 1),
                profile_id,
                item_id,
                quantity,
                total_cost,
                status,
                created_at: now,
                fulfilled_at: (status == RedemptionStatus::Fulfilled).then_some(now),
            };
            self.redemptions
                .entry(profile_id)
                .or_default()
                .push(redemption.clone());
            Ok(redemption)
        })?;

        debug!(
            profile = %profile_id,
            item = %item_id,
            quantity,
            status = ?redemption.status,
            "reward redeemed"
        );
        Ok(redemption)
    }

    /// External-fulfillment hook: transitions a pending redemption to
    /// `Fulfilled`. Terminal redemptions fail with [`EngineError::Conflict`].
    pub fn fulfill(
        &self,
        profile_id: ProfileId,
        redemption_id: RedemptionId,
    ) -> Result<Redemption, EngineError> {
        self.resolve(profile_id, redemption_id, RedemptionStatus::Fulfilled)
    }

    /// External-fulfillment hook: marks a pending redemption as `Failed`.
    /// The debits stand; compensation is an explicit, separate ledger event
    /// owned by the caller.
    pub fn fail(
        &self,
        profile_id: ProfileId,
        redemption_id: RedemptionId,
    ) -> Result<Redemption, EngineError> {
        self.resolve(profile_id, redemption_id, RedemptionStatus::Failed)
    }

    fn resolve(
        &self,
        profile_id: ProfileId,
        redemption_id: RedemptionId,
        status: RedemptionStatus,
    ) -> Result<Redemption, EngineError> {
        let mut history = self
            .redemptions
            .get_mut(&profile_id)
            .ok_or(EngineError::NotFound("redemption"))?;
        let redemption = history
            .iter_mut()
            .find(|r| r.id == redemption_id)
            .ok_or(EngineError::NotFound("redemption"))?;
        if redemption.status != RedemptionStatus::Pending {
            return Err(EngineError::Conflict);
        }
        redemption.status = status;
        if status == RedemptionStatus::Fulfilled {
            redemption.fulfilled_at = Some(Utc::now());
        }
        Ok(redemption.clone())
    }

    /// Returns a profile's redemption history, newest first.
    pub fn redemptions(&self, profile_id: ProfileId) -> Vec<Redemption> {
        self.redemptions
            .get(&profile_id)
            .map(|history| {
                let mut records: Vec<Redemption> = history.clone();
                records.reverse();
                records
            })
            .unwrap_or_default()
    }

    /// Lists catalog items; with a profile id each item is annotated with
    /// purchase eligibility, mirroring the storefront view.
    pub fn rewards(
        &self,
        profile_id: Option<ProfileId>,
        filter: &RewardFilter,
    ) -> Vec<RewardItemView> {
        let now = Utc::now();
        let snapshot = profile_id.and_then(|pid| self.ledger.balances(pid).ok());
        let mut views: Vec<RewardItemView> = self
            .items
            .iter()
            .filter(|entry| {
                let item = entry.value();
                if filter.available_only && !item.is_available_at(now) {
                    return false;
                }
                if let Some(category) = &filter.category
                    && item.category.as_deref() != Some(category.as_str())
                {
                    return false;
                }
                true
            })
            .map(|entry| {
                let item = entry.value();
                let stock = item.stock();
                let mut blockers = Vec::new();
                if let Some(profile) = &snapshot {
                    if profile.level < item.level_requirement {
                        blockers.push(format!("Requires level {}", item.level_requirement));
                    }
                    if let Some(tier) = item.tier_requirement
                        && tier != profile.tier
                    {
                        blockers.push(format!("Requires {} tier", tier));
                    }
                    if stock.is_some_and(|s| s == 0) {
                        blockers.push("Out of stock".to_owned());
                    }
                    for (currency, amount) in item.cost.iter_non_zero() {
                        if profile.balances.get(currency) < amount {
                            blockers.push(format!("Insufficient {}", currency));
                        }
                    }
                }
                RewardItemView {
                    id: item.id,
                    name: item.name.clone(),
                    category: item.category.clone(),
                    fulfillment: item.fulfillment,
                    cost: item.cost,
                    stock,
                    max_per_user: item.max_per_user,
                    level_requirement: item.level_requirement,
                    tier_requirement: item.tier_requirement,
                    is_active: item.is_active,
                    total_purchases: item.total_purchases(),
                    can_purchase: snapshot.as_ref().map(|_| blockers.is_empty()),
                    purchase_blockers: blockers,
                }
            })
            .collect();
        views.sort_by_key(|v| v.id.0);
        views
    }
}
