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

//! Leaderboard integration tests: submission, determinism, deferred
//! re-ranking.

use economy_engine_rs::{
    Engine, EngineConfig, EngineError, LeaderboardDef, LeaderboardId, Page, Period, ProfileId,
    RankingMethod,
};
use std::time::Duration;

fn board(id: u64) -> LeaderboardDef {
    LeaderboardDef {
        id: LeaderboardId(id),
        name: format!("Board {}", id),
        metric: "score".to_string(),
        period: Period::AllTime,
        ranking_method: RankingMethod::Points,
    }
}

/// Engine where every board re-ranks inline.
fn inline_engine() -> Engine {
    Engine::new(EngineConfig {
        inline_rank_threshold: usize::MAX,
        ..EngineConfig::default()
    })
}

/// Engine where every board defers to the ranking worker.
fn deferred_engine(debounce: Duration) -> Engine {
    Engine::new(EngineConfig {
        inline_rank_threshold: 0,
        rank_debounce: debounce,
        ..EngineConfig::default()
    })
}

#[test]
fn unknown_board_is_not_found() {
    let engine = inline_engine();
    assert_eq!(
        engine.submit_score(LeaderboardId(9), ProfileId(1), 10),
        Err(EngineError::NotFound("leaderboard"))
    );
    assert_eq!(
        engine.leaderboard_entries(LeaderboardId(9), Page::default()).map(|_| ()),
        Err(EngineError::NotFound("leaderboard"))
    );
}

#[test]
fn duplicate_board_registration_conflicts() {
    let engine = inline_engine();
    engine.register_leaderboard(board(1)).unwrap();
    assert_eq!(
        engine.register_leaderboard(board(1)),
        Err(EngineError::Conflict)
    );
}

#[test]
fn submission_upserts_and_tracks_changes() {
    let engine = inline_engine();
    engine.register_leaderboard(board(1)).unwrap();

    let first = engine.submit_score(LeaderboardId(1), ProfileId(1), 100).unwrap();
    assert_eq!(first.score, 100);
    assert_eq!(first.previous_score, 0);
    assert_eq!(first.score_change, 100);
    assert_eq!(first.total_activities, 1);

    let second = engine.submit_score(LeaderboardId(1), ProfileId(1), 80).unwrap();
    assert_eq!(second.score, 80);
    assert_eq!(second.previous_score, 100);
    assert_eq!(second.score_change, -20);
    assert_eq!(second.total_activities, 2);
}

#[test]
fn inline_ranking_is_dense_and_immediate() {
    let engine = inline_engine();
    engine.register_leaderboard(board(1)).unwrap();

    engine.submit_score(LeaderboardId(1), ProfileId(1), 50).unwrap();
    engine.submit_score(LeaderboardId(1), ProfileId(2), 200).unwrap();
    let entry = engine.submit_score(LeaderboardId(1), ProfileId(3), 100).unwrap();

    // Small boards re-rank before returning.
    assert_eq!(entry.current_rank, Some(2));

    let (entries, total) = engine
        .leaderboard_entries(LeaderboardId(1), Page::default())
        .unwrap();
    assert_eq!(total, 3);
    let ranks: Vec<_> = entries.iter().map(|e| e.current_rank).collect();
    assert_eq!(ranks, vec![Some(1), Some(2), Some(3)]);
    assert_eq!(entries[0].profile_id, ProfileId(2));
}

#[test]
fn ranking_is_deterministic_across_submission_orders() {
    let scores = [(1u64, 500i64), (2, 300), (3, 800), (4, 300), (5, 100)];

    let forward = inline_engine();
    forward.register_leaderboard(board(1)).unwrap();
    for (profile, score) in scores {
        forward.submit_score(LeaderboardId(1), ProfileId(profile), score).unwrap();
    }

    let reverse = inline_engine();
    reverse.register_leaderboard(board(1)).unwrap();
    // Join order must match for determinism; only the score updates are
    // reordered.
    for (profile, _) in scores {
        reverse.submit_score(LeaderboardId(1), ProfileId(profile), 0).unwrap();
    }
    for (profile, score) in scores.iter().rev() {
        reverse
            .submit_score(LeaderboardId(1), ProfileId(*profile), *score)
            .unwrap();
    }

    let ranks = |engine: &Engine| -> Vec<(ProfileId, Option<u32>)> {
        let (entries, _) = engine
            .leaderboard_entries(LeaderboardId(1), Page::default())
            .unwrap();
        entries.iter().map(|e| (e.profile_id, e.current_rank)).collect()
    };
    assert_eq!(ranks(&forward), ranks(&reverse));
}

#[test]
fn ties_break_by_entry_creation_order() {
    let engine = inline_engine();
    engine.register_leaderboard(board(1)).unwrap();

    engine.submit_score(LeaderboardId(1), ProfileId(10), 100).unwrap();
    engine.submit_score(LeaderboardId(1), ProfileId(20), 100).unwrap();
    engine.submit_score(LeaderboardId(1), ProfileId(30), 100).unwrap();

    let (entries, _) = engine
        .leaderboard_entries(LeaderboardId(1), Page::default())
        .unwrap();
    // All tied at 100: earlier joiners rank higher.
    assert_eq!(entries[0].profile_id, ProfileId(10));
    assert_eq!(entries[1].profile_id, ProfileId(20));
    assert_eq!(entries[2].profile_id, ProfileId(30));
    assert_eq!(
        entries.iter().map(|e| e.current_rank).collect::<Vec<_>>(),
        vec![Some(1), Some(2), Some(3)]
    );
}

#[test]
fn rank_change_records_movement() {
    let engine = inline_engine();
    engine.register_leaderboard(board(1)).unwrap();

    engine.submit_score(LeaderboardId(1), ProfileId(1), 100).unwrap();
    engine.submit_score(LeaderboardId(1), ProfileId(2), 50).unwrap();

    // Profile 2 overtakes.
    let entry = engine.submit_score(LeaderboardId(1), ProfileId(2), 150).unwrap();
    assert_eq!(entry.current_rank, Some(1));
    assert_eq!(entry.previous_rank, Some(2));
    assert_eq!(entry.rank_change, -1);

    let overtaken = engine.leaderboard_entry(LeaderboardId(1), ProfileId(1)).unwrap();
    assert_eq!(overtaken.current_rank, Some(2));
    assert_eq!(overtaken.rank_change, 1);
}

#[test]
fn deferred_ranking_lags_then_converges() {
    let engine = deferred_engine(Duration::from_millis(20));
    engine.register_leaderboard(board(1)).unwrap();

    let entry = engine.submit_score(LeaderboardId(1), ProfileId(1), 100).unwrap();
    // Deferred boards return before any ranking pass covers the entry.
    assert_eq!(entry.current_rank, None);

    // Give the worker its debounce window plus margin.
    std::thread::sleep(Duration::from_millis(200));

    let ranked = engine.leaderboard_entry(LeaderboardId(1), ProfileId(1)).unwrap();
    assert_eq!(ranked.current_rank, Some(1));
    engine.shutdown();
}

#[test]
fn shutdown_flushes_pending_recomputation() {
    let engine = deferred_engine(Duration::from_secs(30));
    engine.register_leaderboard(board(1)).unwrap();

    engine.submit_score(LeaderboardId(1), ProfileId(1), 100).unwrap();
    engine.submit_score(LeaderboardId(1), ProfileId(2), 200).unwrap();

    // The debounce window is far away; shutdown must not wait for it.
    engine.shutdown();

    let (entries, _) = engine
        .leaderboard_entries(LeaderboardId(1), Page::default())
        .unwrap();
    assert_eq!(
        entries.iter().map(|e| e.current_rank).collect::<Vec<_>>(),
        vec![Some(1), Some(2)]
    );
}

#[test]
fn explicit_recalculation_ranks_deferred_board() {
    let engine = deferred_engine(Duration::from_secs(30));
    engine.register_leaderboard(board(1)).unwrap();

    engine.submit_score(LeaderboardId(1), ProfileId(1), 10).unwrap();
    engine.submit_score(LeaderboardId(1), ProfileId(2), 30).unwrap();

    engine.recalculate_rankings(LeaderboardId(1)).unwrap();

    let top = engine.leaderboard_entry(LeaderboardId(1), ProfileId(2)).unwrap();
    assert_eq!(top.current_rank, Some(1));
    engine.shutdown();
}

#[test]
fn recalculation_is_idempotent_for_fixed_scores() {
    let engine = inline_engine();
    engine.register_leaderboard(board(1)).unwrap();
    for (profile, score) in [(1u64, 40i64), (2, 90), (3, 70)] {
        engine.submit_score(LeaderboardId(1), ProfileId(profile), score).unwrap();
    }

    let before: Vec<_> = engine
        .leaderboard_entries(LeaderboardId(1), Page::default())
        .unwrap()
        .0
        .iter()
        .map(|e| (e.profile_id, e.current_rank))
        .collect();

    for _ in 0..3 {
        engine.recalculate_rankings(LeaderboardId(1)).unwrap();
    }

    let after: Vec<_> = engine
        .leaderboard_entries(LeaderboardId(1), Page::default())
        .unwrap()
        .0
        .iter()
        .map(|e| (e.profile_id, e.current_rank))
        .collect();
    assert_eq!(before, after);
}

#[test]
fn activities_ranking_method_orders_by_submissions() {
    let engine = inline_engine();
    engine
        .register_leaderboard(LeaderboardDef {
            ranking_method: RankingMethod::Activities,
            ..board(1)
        })
        .unwrap();

    // Profile 1 submits once with a huge score; profile 2 submits thrice.
    engine.submit_score(LeaderboardId(1), ProfileId(1), 9000).unwrap();
    for score in [10, 20, 30] {
        engine.submit_score(LeaderboardId(1), ProfileId(2), score).unwrap();
    }

    let (entries, _) = engine
        .leaderboard_entries(LeaderboardId(1), Page::default())
        .unwrap();
    assert_eq!(entries[0].profile_id, ProfileId(2));
    assert_eq!(entries[0].total_activities, 3);
}

#[test]
fn entries_paginate_by_rank() {
    let engine = inline_engine();
    engine.register_leaderboard(board(1)).unwrap();
    for i in 1..=10u64 {
        engine
            .submit_score(LeaderboardId(1), ProfileId(i), (i * 10) as i64)
            .unwrap();
    }

    let (page2, total) = engine
        .leaderboard_entries(
            LeaderboardId(1),
            Page {
                limit: 3,
                offset: 3,
            },
        )
        .unwrap();
    assert_eq!(total, 10);
    assert_eq!(page2.len(), 3);
    assert_eq!(
        page2.iter().map(|e| e.current_rank).collect::<Vec<_>>(),
        vec![Some(4), Some(5), Some(6)]
    );
}
