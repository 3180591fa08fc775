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

//! Ledger and balance accessor.
//!
//! The [`Ledger`] owns every profile and is the single write path for
//! currency movements. Profiles live in a [`DashMap`] so operations on
//! different profiles run fully in parallel, while each profile's mutex
//! serializes its own read-validate-write cycles (no global lock).
//!
//! # Idempotency
//!
//! `record` is deliberately not idempotent: each call is a distinct economic
//! event. Callers that need at-most-once semantics use [`Ledger::record_once`]
//! with a `(profile, source, source_id)` key; the key registry performs an
//! atomic check-and-insert so a replay fails with
//! [`EngineError::DuplicateEvent`] instead of double-crediting.

use crate::base::{Currency, Page, ProfileId, Tier, TransactionId};
use crate::error::EngineError;
use crate::profile::{Posting, Profile, ProfileData, ProfileSnapshot};
use crate::transaction::{Transaction, TransactionSource};
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

/// Append-only ledger over all profiles.
///
/// # Invariants
///
/// - For every (profile, currency), the cached balance equals the running
///   sum of that pair's transaction amounts at every observable point.
/// - A debit never drives a balance below zero.
/// - Writes are never auto-retried; retry is the caller's responsibility,
///   guarded by the `record_once` key.
pub struct Ledger {
    /// Profiles indexed by id, created lazily on first interaction.
    profiles: DashMap<ProfileId, Profile>,
    /// Consumed `(profile, source, source_id)` idempotency keys.
    event_keys: DashMap<(ProfileId, String, String), TransactionId>,
    next_transaction_id: AtomicU64,
    /// Budget for acquiring a profile's serialization lock.
    op_budget: Duration,
}

impl Ledger {
    pub fn new(op_budget: Duration) -> Self {
        Self {
            profiles: DashMap::new(),
            event_keys: DashMap::new(),
            next_transaction_id: AtomicU64::new(0),
            op_budget,
        }
    }

    pub(crate) fn next_transaction_id(&self) -> TransactionId {
        TransactionId(self.next_transaction_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Runs `f` with exclusive access to the profile's data, creating the
    /// profile if this is its first gamification interaction.
    ///
    /// This is the per-profile serialization point: everything `f` does is
    /// one atomic unit with respect to other writers of the same profile.
    /// Lock acquisition is bounded by the operation budget and fails with
    /// retryable [`EngineError::Timeout`], leaving no partial state.
    pub(crate) fn with_profile<T>(
        &self,
        profile_id: ProfileId,
        f: impl FnOnce(&mut ProfileData) -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        let profile = self
            .profiles
            .entry(profile_id)
            .or_insert_with(|| Profile::new(profile_id));
        let mut data = profile.lock_for(self.op_budget)?;
        f(&mut data)
    }

    /// Applies a single posting, optionally consuming an idempotency key.
    ///
    /// The key is registered only after the write succeeds, so a failed
    /// posting (insufficient balance, timeout) leaves the key available for
    /// the caller's retry.
    pub(crate) fn post(
        &self,
        profile_id: ProfileId,
        posting: Posting,
        dedupe_key: Option<String>,
    ) -> Result<Transaction, EngineError> {
        match dedupe_key {
            Some(key) => {
                let registry_key = (profile_id, posting.source.as_str().to_owned(), key);
                // Entry API makes check-and-insert atomic across workers.
                match self.event_keys.entry(registry_key) {
                    Entry::Occupied(_) => Err(EngineError::DuplicateEvent),
                    Entry::Vacant(slot) => {
                        let transaction = self.post_unchecked(profile_id, posting)?;
                        slot.insert(transaction.id);
                        Ok(transaction)
                    }
                }
            }
            None => self.post_unchecked(profile_id, posting),
        }
    }

    fn post_unchecked(
        &self,
        profile_id: ProfileId,
        posting: Posting,
    ) -> Result<Transaction, EngineError> {
        let id = self.next_transaction_id();
        let transaction = self.with_profile(profile_id, |data| data.apply(id, posting, Utc::now()))?;
        debug!(
            profile = %profile_id,
            currency = %transaction.currency,
            amount = transaction.amount,
            source = transaction.source.as_str(),
            "ledger record"
        );
        Ok(transaction)
    }

    /// Records one signed currency movement.
    ///
    /// # Errors
    ///
    /// - [`EngineError::InvalidAmount`] - `amount` is zero.
    /// - [`EngineError::InsufficientBalance`] - a debit would drive the
    ///   balance below zero; nothing is written.
    /// - [`EngineError::Timeout`] - the profile lock could not be acquired
    ///   within budget; nothing is written.
    pub fn record(
        &self,
        profile_id: ProfileId,
        currency: Currency,
        amount: i64,
        source: TransactionSource,
        source_id: Option<String>,
        description: Option<String>,
    ) -> Result<Transaction, EngineError> {
        let posting = Posting {
            currency,
            amount,
            base_amount: amount,
            multiplier: Decimal::ONE,
            source,
            source_id,
            description,
        };
        self.post(profile_id, posting, None)
    }

    /// Like [`Ledger::record`], but enforces the `(profile, source,
    /// source_id)` uniqueness constraint: a repeated key fails with
    /// [`EngineError::DuplicateEvent`] and performs no write.
    pub fn record_once(
        &self,
        profile_id: ProfileId,
        currency: Currency,
        amount: i64,
        source: TransactionSource,
        source_id: String,
        description: Option<String>,
    ) -> Result<Transaction, EngineError> {
        let posting = Posting {
            currency,
            amount,
            base_amount: amount,
            multiplier: Decimal::ONE,
            source,
            source_id: Some(source_id.clone()),
            description,
        };
        self.post(profile_id, posting, Some(source_id))
    }

    /// Returns the profile's account snapshot.
    pub fn balances(&self, profile_id: ProfileId) -> Result<ProfileSnapshot, EngineError> {
        self.profiles
            .get(&profile_id)
            .map(|p| p.snapshot())
            .ok_or(EngineError::NotFound("profile"))
    }

    /// Returns one page of the profile's transactions, newest first, plus
    /// the total matching count.
    pub fn transactions(
        &self,
        profile_id: ProfileId,
        currency: Option<Currency>,
        page: Page,
    ) -> Result<(Vec<Transaction>, usize), EngineError> {
        self.profiles
            .get(&profile_id)
            .map(|p| p.transactions(currency, page))
            .ok_or(EngineError::NotFound("profile"))
    }

    /// Snapshots every profile. Useful for report output.
    pub fn snapshots(&self) -> Vec<ProfileSnapshot> {
        self.profiles.iter().map(|p| p.snapshot()).collect()
    }

    /// Admin hook: tier assignment is owned by external tooling; the engine
    /// only stores the tier and gates redemptions on it.
    pub fn set_tier(&self, profile_id: ProfileId, tier: Tier) -> Result<(), EngineError> {
        self.with_profile(profile_id, |data| {
            data.set_tier(tier);
            Ok(())
        })
    }
}
