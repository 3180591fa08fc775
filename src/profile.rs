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

//! Profile state management.
//!
//! A [`Profile`] holds one user's gamification account: cached per-currency
//! balances, level progression, tier, and the profile's append-only
//! transaction log. All mutation goes through `ProfileData::apply` under
//! the profile's mutex, so read-validate-write is single-threaded per
//! profile while distinct profiles proceed in parallel.
//!
//! # Example
//!
//! ```
//! use economy_engine_rs::{Profile, ProfileId, Currency};
//!
//! let profile = Profile::new(ProfileId(1));
//! assert_eq!(profile.balance(Currency::Coins), 0);
//! ```

use crate::base::{Currency, CurrencyAmounts, Page, ProfileId, Tier, TransactionId};
use crate::error::EngineError;
use crate::transaction::{Transaction, TransactionSource};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use rust_decimal::Decimal;
use serde::ser::{Serialize, SerializeStruct, Serializer};
use std::time::Duration;

/// XP threshold a profile must reach to hold `level`.
///
/// Exponential curve: `floor(100 · level^1.5)`.
pub fn xp_for_level(level: u32) -> i64 {
    (100.0 * f64::from(level).powf(1.5)).floor() as i64
}

/// One pending ledger write, not yet applied to a profile.
#[derive(Debug, Clone)]
pub(crate) struct Posting {
    pub currency: Currency,
    pub amount: i64,
    pub base_amount: i64,
    pub multiplier: Decimal,
    pub source: TransactionSource,
    pub source_id: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug)]
pub(crate) struct ProfileData {
    profile_id: ProfileId,
    balances: CurrencyAmounts,
    level: u32,
    next_level_xp: i64,
    level_up_count: u32,
    total_xp_earned: i64,
    tier: Tier,
    created_at: DateTime<Utc>,
    /// Append-only transaction log, oldest first.
    transactions: Vec<Transaction>,
}

impl ProfileData {
    fn new(profile_id: ProfileId) -> Self {
        Self {
            profile_id,
            balances: CurrencyAmounts::ZERO,
            level: 1,
            next_level_xp: xp_for_level(2),
            level_up_count: 0,
            total_xp_earned: 0,
            tier: Tier::Bronze,
            created_at: Utc::now(),
            transactions: Vec::new(),
        }
    }

    fn assert_invariants(&self) {
        for currency in Currency::ALL {
            let balance = self.balances.get(currency);
            debug_assert!(
                balance >= 0,
                "Invariant violated: {} balance went negative: {}",
                currency,
                balance
            );
            #[cfg(debug_assertions)]
            {
                let sum: i64 = self
                    .transactions
                    .iter()
                    .filter(|t| t.currency == currency)
                    .map(|t| t.amount)
                    .sum();
                debug_assert_eq!(
                    balance, sum,
                    "Invariant violated: cached {} balance diverged from transaction sum",
                    currency
                );
            }
        }
    }

    /// Applies one signed movement: validates, appends the transaction, and
    /// updates the cached balance (plus level progression for XP credits).
    ///
    /// `previous_balance` is taken from the cached balance, never recomputed
    /// from the log, so the cache stays authoritative.
    pub(crate) fn apply(
        &mut self,
        id: TransactionId,
        posting: Posting,
        now: DateTime<Utc>,
    ) -> Result<Transaction, EngineError> {
        if posting.amount == 0 {
            return Err(EngineError::InvalidAmount);
        }

        let previous_balance = self.balances.get(posting.currency);
        let new_balance = previous_balance + posting.amount;
        if posting.amount < 0 && new_balance < 0 {
            return Err(EngineError::InsufficientBalance {
                currency: posting.currency,
            });
        }

        let transaction = Transaction {
            id,
            profile_id: self.profile_id,
            currency: posting.currency,
            amount: posting.amount,
            previous_balance,
            new_balance,
            source: posting.source,
            source_id: posting.source_id,
            description: posting.description,
            base_amount: posting.base_amount,
            multiplier: posting.multiplier,
            created_at: now,
        };

        self.balances.set(posting.currency, new_balance);
        if posting.currency == Currency::Xp && posting.amount > 0 {
            self.total_xp_earned += posting.amount;
            self.advance_level();
        }
        self.transactions.push(transaction.clone());

        self.assert_invariants();
        Ok(transaction)
    }

    /// Validates that every non-zero component of `cost` is covered by the
    /// current balances. Performs no write.
    pub(crate) fn check_cost(&self, cost: &CurrencyAmounts) -> Result<(), EngineError> {
        for (currency, amount) in cost.iter_non_zero() {
            if self.balances.get(currency) < amount {
                return Err(EngineError::InsufficientBalance { currency });
            }
        }
        Ok(())
    }

    fn advance_level(&mut self) {
        // A large credit can cross several thresholds at once.
        while self.balances.xp >= self.next_level_xp {
            self.level += 1;
            self.level_up_count += 1;
            self.next_level_xp = xp_for_level(self.level + 1);
        }
    }

    pub(crate) fn level(&self) -> u32 {
        self.level
    }

    pub(crate) fn tier(&self) -> Tier {
        self.tier
    }

    pub(crate) fn set_tier(&mut self, tier: Tier) {
        self.tier = tier;
    }

    fn snapshot(&self) -> ProfileSnapshot {
        ProfileSnapshot {
            profile_id: self.profile_id,
            balances: self.balances,
            level: self.level,
            next_level_xp: self.next_level_xp,
            level_up_count: self.level_up_count,
            total_xp_earned: self.total_xp_earned,
            tier: self.tier,
            created_at: self.created_at,
        }
    }
}

/// A user's gamification account.
///
/// Thin thread-safe wrapper; all state sits behind one mutex so that every
/// balance used for validation is read under the same lock as the write it
/// guards.
#[derive(Debug)]
pub struct Profile {
    inner: Mutex<ProfileData>,
}

impl Profile {
    pub fn new(profile_id: ProfileId) -> Self {
        Self {
            inner: Mutex::new(ProfileData::new(profile_id)),
        }
    }

    /// Acquires the profile's serialization lock within `budget`.
    ///
    /// Ledger and redemption operations occupy this lock for their whole
    /// atomic unit; exceeding the budget fails with retryable
    /// [`EngineError::Timeout`] instead of queueing indefinitely.
    pub(crate) fn lock_for(
        &self,
        budget: Duration,
    ) -> Result<MutexGuard<'_, ProfileData>, EngineError> {
        self.inner.try_lock_for(budget).ok_or(EngineError::Timeout)
    }

    pub fn balance(&self, currency: Currency) -> i64 {
        self.inner.lock().balances.get(currency)
    }

    pub fn level(&self) -> u32 {
        self.inner.lock().level
    }

    pub fn tier(&self) -> Tier {
        self.inner.lock().tier
    }

    pub fn snapshot(&self) -> ProfileSnapshot {
        self.inner.lock().snapshot()
    }

    /// Returns one page of the profile's transactions, newest first, plus
    /// the total number of matching records.
    pub fn transactions(
        &self,
        currency: Option<Currency>,
        page: Page,
    ) -> (Vec<Transaction>, usize) {
        let data = self.inner.lock();
        let matching: Vec<&Transaction> = data
            .transactions
            .iter()
            .rev()
            .filter(|t| currency.is_none_or(|c| t.currency == c))
            .collect();
        let total = matching.len();
        let records = matching
            .into_iter()
            .skip(page.offset)
            .take(page.limit)
            .cloned()
            .collect();
        (records, total)
    }
}

/// Point-in-time copy of a profile's account state.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileSnapshot {
    pub profile_id: ProfileId,
    pub balances: CurrencyAmounts,
    pub level: u32,
    pub next_level_xp: i64,
    pub level_up_count: u32,
    pub total_xp_earned: i64,
    pub tier: Tier,
    pub created_at: DateTime<Utc>,
}

impl Serialize for ProfileSnapshot {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        // Flat layout so the snapshot serializes cleanly to CSV rows.
        let mut state = serializer.serialize_struct("ProfileSnapshot", 8)?;
        state.serialize_field("profile", &self.profile_id)?;
        state.serialize_field("xp", &self.balances.xp)?;
        state.serialize_field("coins", &self.balances.coins)?;
        state.serialize_field("gems", &self.balances.gems)?;
        state.serialize_field("reputation", &self.balances.reputation)?;
        state.serialize_field("level", &self.level)?;
        state.serialize_field("next_level_xp", &self.next_level_xp)?;
        state.serialize_field("tier", &self.tier)?;
        state.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn posting(currency: Currency, amount: i64) -> Posting {
        Posting {
            currency,
            amount,
            base_amount: amount.abs(),
            multiplier: Decimal::ONE,
            source: TransactionSource::Event("test".into()),
            source_id: None,
            description: None,
        }
    }

    fn apply(data: &mut ProfileData, id: u64, currency: Currency, amount: i64) -> Result<Transaction, EngineError> {
        data.apply(TransactionId(id), posting(currency, amount), Utc::now())
    }

    // === Level curve ===

    #[test]
    fn xp_curve_matches_exponential_formula() {
        assert_eq!(xp_for_level(1), 100);
        assert_eq!(xp_for_level(2), 282);
        assert_eq!(xp_for_level(3), 519);
        assert_eq!(xp_for_level(4), 800);
    }

    #[test]
    fn xp_credit_advances_level() {
        let mut data = ProfileData::new(ProfileId(1));
        apply(&mut data, 1, Currency::Xp, 300).unwrap();
        assert_eq!(data.level, 2);
        assert_eq!(data.next_level_xp, xp_for_level(3));
        assert_eq!(data.level_up_count, 1);
    }

    #[test]
    fn large_xp_credit_crosses_multiple_levels() {
        let mut data = ProfileData::new(ProfileId(1));
        // 800 XP reaches both the level-2 (282) and level-3 (519) thresholds,
        // and exactly the level-4 (800) threshold.
        apply(&mut data, 1, Currency::Xp, 800).unwrap();
        assert_eq!(data.level, 4);
        assert_eq!(data.level_up_count, 3);
    }

    #[test]
    fn xp_debit_does_not_regress_level() {
        let mut data = ProfileData::new(ProfileId(1));
        apply(&mut data, 1, Currency::Xp, 300).unwrap();
        apply(&mut data, 2, Currency::Xp, -250).unwrap();
        assert_eq!(data.level, 2);
        assert_eq!(data.total_xp_earned, 300);
    }

    // === Balance mutation ===

    #[test]
    fn debit_below_zero_is_rejected_without_write() {
        let mut data = ProfileData::new(ProfileId(1));
        apply(&mut data, 1, Currency::Coins, 50).unwrap();

        let result = apply(&mut data, 2, Currency::Coins, -80);
        assert_eq!(
            result,
            Err(EngineError::InsufficientBalance {
                currency: Currency::Coins
            })
        );
        assert_eq!(data.balances.coins, 50);
        assert_eq!(data.transactions.len(), 1);
    }

    #[test]
    fn zero_amount_is_rejected() {
        let mut data = ProfileData::new(ProfileId(1));
        assert_eq!(
            apply(&mut data, 1, Currency::Gems, 0),
            Err(EngineError::InvalidAmount)
        );
    }

    #[test]
    fn transaction_snapshots_surrounding_balances() {
        let mut data = ProfileData::new(ProfileId(1));
        apply(&mut data, 1, Currency::Coins, 100).unwrap();
        let tx = apply(&mut data, 2, Currency::Coins, -30).unwrap();

        assert_eq!(tx.previous_balance, 100);
        assert_eq!(tx.new_balance, 70);
        assert_eq!(tx.kind(), "spent");
    }

    #[test]
    fn check_cost_reports_first_uncovered_currency() {
        let mut data = ProfileData::new(ProfileId(1));
        apply(&mut data, 1, Currency::Coins, 100).unwrap();

        let cost = CurrencyAmounts {
            coins: 60,
            gems: 1,
            ..CurrencyAmounts::ZERO
        };
        assert_eq!(
            data.check_cost(&cost),
            Err(EngineError::InsufficientBalance {
                currency: Currency::Gems
            })
        );
    }

    // === Pagination ===

    #[test]
    fn transactions_paginate_newest_first() {
        let profile = Profile::new(ProfileId(1));
        {
            let mut data = profile.inner.lock();
            for i in 0..5 {
                apply(&mut data, i, Currency::Coins, 10 + i as i64).unwrap();
            }
        }

        let (records, total) = profile.transactions(
            None,
            Page {
                limit: 2,
                offset: 1,
            },
        );
        assert_eq!(total, 5);
        assert_eq!(records.len(), 2);
        // Newest first: amounts were 10..14, so offset 1 starts at 13.
        assert_eq!(records[0].amount, 13);
        assert_eq!(records[1].amount, 12);
    }

    #[test]
    fn transactions_filter_by_currency() {
        let profile = Profile::new(ProfileId(1));
        {
            let mut data = profile.inner.lock();
            apply(&mut data, 1, Currency::Coins, 10).unwrap();
            apply(&mut data, 2, Currency::Xp, 20).unwrap();
            apply(&mut data, 3, Currency::Coins, 30).unwrap();
        }

        let (records, total) = profile.transactions(Some(Currency::Coins), Page::default());
        assert_eq!(total, 2);
        assert!(records.iter().all(|t| t.currency == Currency::Coins));
    }

    // === Serialization ===

    #[test]
    fn snapshot_serializes_flat_for_csv() {
        let profile = Profile::new(ProfileId(42));
        {
            let mut data = profile.inner.lock();
            apply(&mut data, 1, Currency::Coins, 250).unwrap();
        }

        let json = serde_json::to_value(profile.snapshot()).unwrap();
        assert_eq!(json["profile"], 42);
        assert_eq!(json["coins"], 250);
        assert_eq!(json["xp"], 0);
        assert_eq!(json["level"], 1);
        assert_eq!(json["tier"], "bronze");
    }
}
