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

//! Benchmarks for the gamification engine.
//!
//! Run with: cargo bench
//!
//! Benchmarks include:
//! - Single-threaded ledger records
//! - Concurrent records across profiles (parallel path)
//! - Concurrent records against one profile (serialization point)
//! - Redemption throughput
//! - Ranking recomputation scaling with participant count

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use economy_engine_rs::{
    Currency, CurrencyAmounts, Engine, LeaderboardDef, LeaderboardId, Page, Period, ProfileId,
    RankingMethod, RewardItem, RewardItemId, TransactionSource,
};
use rayon::prelude::*;

// =============================================================================
// Helper Functions
// =============================================================================

fn source() -> TransactionSource {
    TransactionSource::Event("bench".to_string())
}

fn coins(amount: i64) -> CurrencyAmounts {
    CurrencyAmounts {
        coins: amount,
        ..CurrencyAmounts::ZERO
    }
}

fn board(id: u64) -> LeaderboardDef {
    LeaderboardDef {
        id: LeaderboardId(id),
        name: "Bench".to_string(),
        metric: "score".to_string(),
        period: Period::AllTime,
        ranking_method: RankingMethod::Points,
    }
}

// =============================================================================
// Ledger Benchmarks
// =============================================================================

fn bench_single_record(c: &mut Criterion) {
    let engine = Engine::default();

    c.bench_function("record/single_profile", |b| {
        b.iter(|| {
            engine
                .record(
                    black_box(ProfileId(1)),
                    Currency::Coins,
                    black_box(10),
                    source(),
                    None,
                    None,
                )
                .unwrap()
        })
    });
    engine.shutdown();
}

fn bench_parallel_profiles(c: &mut Criterion) {
    let mut group = c.benchmark_group("record/parallel");
    group.throughput(Throughput::Elements(1000));

    group.bench_function("distinct_profiles", |b| {
        b.iter(|| {
            let engine = Engine::default();
            (0u64..1000).into_par_iter().for_each(|i| {
                engine
                    .record(ProfileId(i), Currency::Xp, 10, source(), None, None)
                    .unwrap();
            });
            engine.shutdown();
        })
    });

    group.bench_function("single_profile_contended", |b| {
        b.iter(|| {
            let engine = Engine::default();
            (0u64..1000).into_par_iter().for_each(|_| {
                engine
                    .record(ProfileId(1), Currency::Xp, 10, source(), None, None)
                    .unwrap();
            });
            engine.shutdown();
        })
    });

    group.finish();
}

// =============================================================================
// Redemption Benchmarks
// =============================================================================

fn bench_redemption(c: &mut Criterion) {
    let engine = Engine::default();
    engine
        .register_reward_item(RewardItem::new(RewardItemId(1), "Bench Item", coins(1)))
        .unwrap();
    engine
        .record(
            ProfileId(1),
            Currency::Coins,
            1_000_000_000,
            source(),
            None,
            None,
        )
        .unwrap();

    c.bench_function("redeem/instant_item", |b| {
        b.iter(|| {
            engine
                .redeem(black_box(ProfileId(1)), RewardItemId(1), 1)
                .unwrap()
        })
    });
    engine.shutdown();
}

// =============================================================================
// Ranking Benchmarks
// =============================================================================

fn bench_rank_recalculation(c: &mut Criterion) {
    let mut group = c.benchmark_group("leaderboard/recalculate");

    for participants in [100u64, 1_000, 10_000] {
        let engine = Engine::default();
        engine.register_leaderboard(board(1)).unwrap();
        for i in 0..participants {
            engine
                .submit_score(LeaderboardId(1), ProfileId(i), (i * 7 % 1000) as i64)
                .unwrap();
        }

        group.throughput(Throughput::Elements(participants));
        group.bench_with_input(
            BenchmarkId::from_parameter(participants),
            &participants,
            |b, _| {
                b.iter(|| engine.recalculate_rankings(black_box(LeaderboardId(1))).unwrap())
            },
        );
        engine.shutdown();
    }

    group.finish();
}

fn bench_entries_page(c: &mut Criterion) {
    let engine = Engine::default();
    engine.register_leaderboard(board(1)).unwrap();
    for i in 0..1_000u64 {
        engine
            .submit_score(LeaderboardId(1), ProfileId(i), i as i64)
            .unwrap();
    }
    engine.recalculate_rankings(LeaderboardId(1)).unwrap();

    c.bench_function("leaderboard/entries_page", |b| {
        b.iter(|| {
            engine
                .leaderboard_entries(black_box(LeaderboardId(1)), Page::default())
                .unwrap()
        })
    });
    engine.shutdown();
}

criterion_group!(
    benches,
    bench_single_record,
    bench_parallel_profiles,
    bench_redemption,
    bench_rank_recalculation,
    bench_entries_page
);
criterion_main!(benches);
