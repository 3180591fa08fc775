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

//! Concurrency tests: double-spend prevention, exactly-once issuance,
//! stock races, and ranking consistency under parallel writers.
//!
//! Workers synchronize on a barrier before hitting the engine so the races
//! actually overlap instead of serializing on thread startup.

use economy_engine_rs::{
    Achievement, AchievementId, Currency, CurrencyAmounts, Engine, EngineError, LeaderboardDef,
    LeaderboardId, Page, ProfileId, RewardItem, RewardItemId, TransactionSource,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

fn coins(amount: i64) -> CurrencyAmounts {
    CurrencyAmounts {
        coins: amount,
        ..CurrencyAmounts::ZERO
    }
}

fn fund(engine: &Engine, profile: u64, amount: i64) {
    engine
        .record(
            ProfileId(profile),
            Currency::Coins,
            amount,
            TransactionSource::Event("seed".into()),
            None,
            None,
        )
        .unwrap();
}

/// N concurrent redemptions against stock N−1: exactly N−1 succeed.
#[test]
fn stock_race_yields_exactly_stock_successes() {
    const WORKERS: u32 = 8;

    let engine = Arc::new(Engine::default());
    engine
        .register_reward_item(
            RewardItem::new(RewardItemId(1), "Scarce", coins(10)).with_stock(WORKERS - 1),
        )
        .unwrap();
    for profile in 0..WORKERS {
        fund(&engine, u64::from(profile), 100);
    }

    let barrier = Arc::new(Barrier::new(WORKERS as usize));
    let successes = Arc::new(AtomicU32::new(0));
    let out_of_stock = Arc::new(AtomicU32::new(0));

    let handles: Vec<_> = (0..WORKERS)
        .map(|profile| {
            let engine = Arc::clone(&engine);
            let barrier = Arc::clone(&barrier);
            let successes = Arc::clone(&successes);
            let out_of_stock = Arc::clone(&out_of_stock);
            thread::spawn(move || {
                barrier.wait();
                match engine.redeem(ProfileId(u64::from(profile)), RewardItemId(1), 1) {
                    Ok(_) => {
                        successes.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(EngineError::OutOfStock) => {
                        out_of_stock.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(e) => panic!("unexpected error: {e}"),
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(successes.load(Ordering::SeqCst), WORKERS - 1);
    assert_eq!(out_of_stock.load(Ordering::SeqCst), 1);

    // Exactly stock-many debits happened.
    let debited = (0..WORKERS)
        .filter(|p| {
            engine
                .balances(ProfileId(u64::from(*p)))
                .unwrap()
                .balances
                .coins
                == 90
        })
        .count() as u32;
    assert_eq!(debited, WORKERS - 1);
}

/// Concurrent credits to one profile: the balance is the exact sum and the
/// per-transaction balance chain has no lost updates.
#[test]
fn concurrent_credits_sum_exactly() {
    const WORKERS: usize = 8;
    const RECORDS_PER_WORKER: usize = 100;

    let engine = Arc::new(Engine::default());
    let barrier = Arc::new(Barrier::new(WORKERS));

    let handles: Vec<_> = (0..WORKERS)
        .map(|_| {
            let engine = Arc::clone(&engine);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..RECORDS_PER_WORKER {
                    engine
                        .record(
                            ProfileId(1),
                            Currency::Coins,
                            3,
                            TransactionSource::Event("award".into()),
                            None,
                            None,
                        )
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let expected = (WORKERS * RECORDS_PER_WORKER * 3) as i64;
    assert_eq!(
        engine.balances(ProfileId(1)).unwrap().balances.coins,
        expected
    );

    // The serialized log carries a gap-free balance chain.
    let (transactions, total) = engine
        .transactions(
            ProfileId(1),
            None,
            Page {
                limit: usize::MAX,
                offset: 0,
            },
        )
        .unwrap();
    assert_eq!(total, WORKERS * RECORDS_PER_WORKER);
    let sum: i64 = transactions.iter().map(|t| t.amount).sum();
    assert_eq!(sum, expected);
    for window in transactions.windows(2) {
        // Newest first: the next-older record's new_balance feeds this one.
        assert_eq!(window[0].previous_balance, window[1].new_balance);
    }
}

/// Concurrent debits cannot interleave stale reads: the balance never goes
/// negative and every successful debit is accounted for.
#[test]
fn concurrent_debits_never_overdraw() {
    const WORKERS: usize = 8;
    const ATTEMPTS_PER_WORKER: usize = 60;
    const SEED: i64 = 1000;
    const DEBIT: i64 = 3;

    let engine = Arc::new(Engine::default());
    fund(&engine, 1, SEED);

    let barrier = Arc::new(Barrier::new(WORKERS));
    let successes = Arc::new(AtomicU32::new(0));

    let handles: Vec<_> = (0..WORKERS)
        .map(|_| {
            let engine = Arc::clone(&engine);
            let barrier = Arc::clone(&barrier);
            let successes = Arc::clone(&successes);
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..ATTEMPTS_PER_WORKER {
                    match engine.record(
                        ProfileId(1),
                        Currency::Coins,
                        -DEBIT,
                        TransactionSource::Event("spend".into()),
                        None,
                        None,
                    ) {
                        Ok(_) => {
                            successes.fetch_add(1, Ordering::SeqCst);
                        }
                        Err(EngineError::InsufficientBalance { .. }) => {}
                        Err(e) => panic!("unexpected error: {e}"),
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let balance = engine.balances(ProfileId(1)).unwrap().balances.coins;
    assert!(balance >= 0);
    assert_eq!(
        balance,
        SEED - i64::from(successes.load(Ordering::SeqCst)) * DEBIT
    );
}

/// Racing the same idempotency key: exactly one write goes through.
#[test]
fn record_once_race_credits_exactly_once() {
    const WORKERS: usize = 8;

    let engine = Arc::new(Engine::default());
    let barrier = Arc::new(Barrier::new(WORKERS));
    let successes = Arc::new(AtomicU32::new(0));
    let duplicates = Arc::new(AtomicU32::new(0));

    let handles: Vec<_> = (0..WORKERS)
        .map(|_| {
            let engine = Arc::clone(&engine);
            let barrier = Arc::clone(&barrier);
            let successes = Arc::clone(&successes);
            let duplicates = Arc::clone(&duplicates);
            thread::spawn(move || {
                barrier.wait();
                match engine.record_once(
                    ProfileId(1),
                    Currency::Coins,
                    500,
                    TransactionSource::Event("referral".into()),
                    "ref-1".into(),
                    None,
                ) {
                    Ok(_) => {
                        successes.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(EngineError::DuplicateEvent) => {
                        duplicates.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(e) => panic!("unexpected error: {e}"),
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(successes.load(Ordering::SeqCst), 1);
    assert_eq!(duplicates.load(Ordering::SeqCst), WORKERS as u32 - 1);
    assert_eq!(engine.balances(ProfileId(1)).unwrap().balances.coins, 500);
}

/// Racing a non-repeatable unlock: rewards are issued exactly once.
#[test]
fn unlock_race_issues_rewards_exactly_once() {
    const WORKERS: usize = 8;

    let engine = Arc::new(Engine::default());
    engine
        .register_achievement(
            Achievement::new(AchievementId(1), "Milestone", coins(100)).with_max_progress(1),
        )
        .unwrap();

    let barrier = Arc::new(Barrier::new(WORKERS));
    let handles: Vec<_> = (0..WORKERS)
        .map(|_| {
            let engine = Arc::clone(&engine);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                engine
                    .progress(ProfileId(1), AchievementId(1), "race", 1, None)
                    .unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    // One unlock event, one reward credit, regardless of the race winner.
    assert_eq!(engine.balances(ProfileId(1)).unwrap().balances.coins, 100);
    let (transactions, _) = engine
        .transactions(ProfileId(1), None, Page::default())
        .unwrap();
    assert_eq!(transactions.len(), 1);
}

/// Operations on distinct profiles do not contend on any global lock.
#[test]
fn distinct_profiles_proceed_in_parallel() {
    const WORKERS: usize = 8;
    const RECORDS_PER_WORKER: usize = 200;

    let engine = Arc::new(Engine::default());
    let barrier = Arc::new(Barrier::new(WORKERS));

    let handles: Vec<_> = (0..WORKERS)
        .map(|profile| {
            let engine = Arc::clone(&engine);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..RECORDS_PER_WORKER {
                    engine
                        .record(
                            ProfileId(profile as u64),
                            Currency::Xp,
                            5,
                            TransactionSource::Event("grind".into()),
                            None,
                            None,
                        )
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    for profile in 0..WORKERS {
        assert_eq!(
            engine
                .balances(ProfileId(profile as u64))
                .unwrap()
                .balances
                .xp,
            (RECORDS_PER_WORKER * 5) as i64
        );
    }
}

/// Parallel submissions with a final recalculation produce one internally
/// consistent dense assignment, never a blend of two passes.
#[test]
fn parallel_submissions_rank_consistently() {
    const WORKERS: usize = 8;
    const SUBMISSIONS_PER_WORKER: usize = 50;

    let engine = Arc::new(Engine::default());
    engine
        .register_leaderboard(LeaderboardDef {
            id: LeaderboardId(1),
            name: "Race".to_string(),
            metric: "score".to_string(),
            period: economy_engine_rs::Period::AllTime,
            ranking_method: economy_engine_rs::RankingMethod::Points,
        })
        .unwrap();

    let barrier = Arc::new(Barrier::new(WORKERS));
    let handles: Vec<_> = (0..WORKERS)
        .map(|worker| {
            let engine = Arc::clone(&engine);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for i in 0..SUBMISSIONS_PER_WORKER {
                    let profile = (worker * SUBMISSIONS_PER_WORKER + i) as u64;
                    engine
                        .submit_score(LeaderboardId(1), ProfileId(profile), (profile * 13 % 997) as i64)
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    engine.shutdown();
    engine.recalculate_rankings(LeaderboardId(1)).unwrap();

    let (entries, total) = engine
        .leaderboard_entries(
            LeaderboardId(1),
            Page {
                limit: usize::MAX,
                offset: 0,
            },
        )
        .unwrap();
    assert_eq!(total, WORKERS * SUBMISSIONS_PER_WORKER);

    // Dense permutation 1..N.
    let mut ranks: Vec<u32> = entries.iter().map(|e| e.current_rank.unwrap()).collect();
    ranks.sort_unstable();
    let expected: Vec<u32> = (1..=total as u32).collect();
    assert_eq!(ranks, expected);

    // Scores are non-increasing when walking the board by rank.
    for window in entries.windows(2) {
        assert!(window[0].score >= window[1].score);
    }
}
