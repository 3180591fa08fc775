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

//! Leaderboard score submission and deterministic ranking.
//!
//! Score submissions upsert entries; ranking assigns dense ranks 1..N by
//! score descending, ties broken by entry-creation order (`joined_seq`), so
//! a fixed score set always produces identical assignments.
//!
//! Small boards re-rank synchronously after each submission. Larger boards
//! are marked dirty on a channel consumed by one dedicated worker thread,
//! which coalesces marks inside a debounce window before recomputing:
//! rank data may lag submissions by that window, but every published
//! assignment is produced under the board lock by a single writer, never a
//! mix of two passes.

use crate::base::{LeaderboardId, Page, ProfileId};
use crate::error::EngineError;
use chrono::{DateTime, Utc};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Competition window of a leaderboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Daily,
    Weekly,
    Monthly,
    #[serde(rename = "all_time")]
    AllTime,
}

/// Which entry field the ranking orders by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RankingMethod {
    /// Order by submitted score.
    Points,
    /// Order by number of score submissions.
    Activities,
}

/// Competition definition. Owned by external admin tooling.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LeaderboardDef {
    pub id: LeaderboardId,
    pub name: String,
    /// What the score measures (`"xp_earned"`, `"sales_closed"`, ...).
    pub metric: String,
    pub period: Period,
    pub ranking_method: RankingMethod,
}

/// Per (leaderboard, profile) standing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeaderboardEntry {
    pub profile_id: ProfileId,
    pub score: i64,
    pub previous_score: i64,
    pub score_change: i64,
    pub total_activities: u64,
    /// `None` until the first ranking pass covers this entry.
    pub current_rank: Option<u32>,
    pub previous_rank: Option<u32>,
    /// `new_rank − previous_rank`; negative means the entry moved up.
    pub rank_change: i64,
    /// Entry-creation sequence, the deterministic tie-break key.
    pub joined_seq: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug)]
struct BoardState {
    entries: HashMap<ProfileId, LeaderboardEntry>,
    next_seq: u64,
}

#[derive(Debug)]
struct Board {
    def: LeaderboardDef,
    state: Mutex<BoardState>,
}

/// Board map shared between the engine and the ranking worker.
struct Boards {
    map: DashMap<LeaderboardId, Arc<Board>>,
}

/// Assigns dense ranks 1..N under the caller-held board lock.
///
/// Sorting is total (key descending, then `joined_seq` ascending), so the
/// assignment depends only on the entry set, never on submission order.
fn rank_assign(state: &mut BoardState, method: RankingMethod) {
    let mut order: Vec<(ProfileId, i64, u64)> = state
        .entries
        .values()
        .map(|e| {
            let key = match method {
                RankingMethod::Points => e.score,
                RankingMethod::Activities => e.total_activities as i64,
            };
            (e.profile_id, key, e.joined_seq)
        })
        .collect();
    order.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));

    for (position, (profile_id, _, _)) in order.iter().enumerate() {
        let entry = state.entries.get_mut(profile_id).unwrap();
        let new_rank = (position + 1) as u32;
        entry.previous_rank = entry.current_rank;
        entry.rank_change = entry
            .current_rank
            .map(|prev| i64::from(new_rank) - i64::from(prev))
            .unwrap_or(0);
        entry.current_rank = Some(new_rank);
    }
}

enum RankMessage {
    Dirty(LeaderboardId),
    Shutdown,
}

/// Single-writer, debounced recomputation worker.
///
/// All deferred re-ranking funnels through one thread, closing the window
/// where two overlapping recomputations could interleave their writes.
struct RankScheduler {
    sender: Sender<RankMessage>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl RankScheduler {
    fn spawn(boards: Arc<Boards>, debounce: Duration) -> Self {
        let (sender, receiver) = channel::unbounded();
        let worker = thread::Builder::new()
            .name("rank-scheduler".into())
            .spawn(move || Self::run(boards, receiver, debounce))
            .expect("failed to spawn ranking worker");
        Self {
            sender,
            worker: Mutex::new(Some(worker)),
        }
    }

    fn mark_dirty(&self, id: LeaderboardId) {
        // A closed channel means shutdown is in flight; the final flush
        // covers whatever was already queued.
        let _ = self.sender.send(RankMessage::Dirty(id));
    }

    fn run(boards: Arc<Boards>, receiver: Receiver<RankMessage>, debounce: Duration) {
        loop {
            let mut dirty = HashSet::new();
            let mut shutting_down = false;

            match receiver.recv() {
                Ok(RankMessage::Dirty(id)) => {
                    dirty.insert(id);
                }
                Ok(RankMessage::Shutdown) | Err(_) => shutting_down = true,
            }

            // Coalesce marks arriving within the debounce window.
            if !shutting_down {
                let deadline = Instant::now() + debounce;
                loop {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        break;
                    }
                    match receiver.recv_timeout(remaining) {
                        Ok(RankMessage::Dirty(id)) => {
                            dirty.insert(id);
                        }
                        Ok(RankMessage::Shutdown) | Err(RecvTimeoutError::Disconnected) => {
                            shutting_down = true;
                            break;
                        }
                        Err(RecvTimeoutError::Timeout) => break,
                    }
                }
            }

            // Shutdown flushes everything still queued before exiting.
            if shutting_down {
                while let Ok(message) = receiver.try_recv() {
                    if let RankMessage::Dirty(id) = message {
                        dirty.insert(id);
                    }
                }
            }

            for id in dirty {
                if let Some(board) = boards.map.get(&id).map(|b| Arc::clone(b.value())) {
                    let mut state = board.state.lock();
                    rank_assign(&mut state, board.def.ranking_method);
                    debug!(
                        leaderboard = %id,
                        participants = state.entries.len(),
                        "rankings recalculated"
                    );
                }
            }

            if shutting_down {
                return;
            }
        }
    }

    fn shutdown(&self) {
        let _ = self.sender.send(RankMessage::Shutdown);
        if let Some(worker) = self.worker.lock().take() {
            let _ = worker.join();
        }
    }
}

/// Score submission and deterministic re-ranking over a scored population.
pub struct LeaderboardEngine {
    boards: Arc<Boards>,
    scheduler: RankScheduler,
    /// Boards at or below this participant count re-rank inline.
    inline_threshold: usize,
}

impl LeaderboardEngine {
    pub fn new(debounce: Duration, inline_threshold: usize) -> Self {
        let boards = Arc::new(Boards {
            map: DashMap::new(),
        });
        let scheduler = RankScheduler::spawn(Arc::clone(&boards), debounce);
        Self {
            boards,
            scheduler,
            inline_threshold,
        }
    }

    /// Registers a leaderboard definition. Fails with
    /// [`EngineError::Conflict`] if the id is already taken.
    pub fn register(&self, def: LeaderboardDef) -> Result<(), EngineError> {
        match self.boards.map.entry(def.id) {
            Entry::Occupied(_) => Err(EngineError::Conflict),
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(Board {
                    def,
                    state: Mutex::new(BoardState {
                        entries: HashMap::new(),
                        next_seq: 0,
                    }),
                }));
                Ok(())
            }
        }
    }

    pub fn definition(&self, id: LeaderboardId) -> Option<LeaderboardDef> {
        self.boards.map.get(&id).map(|b| b.def.clone())
    }

    /// Upserts the profile's entry with a new score.
    ///
    /// Records `previous_score` and `score_change` and bumps
    /// `total_activities`. Small boards re-rank before returning; larger
    /// boards are marked dirty for the debounced worker, so the returned
    /// entry may carry a rank from before this submission.
    pub fn submit_score(
        &self,
        leaderboard_id: LeaderboardId,
        profile_id: ProfileId,
        score: i64,
    ) -> Result<LeaderboardEntry, EngineError> {
        let board = self
            .boards
            .map
            .get(&leaderboard_id)
            .map(|b| Arc::clone(b.value()))
            .ok_or(EngineError::NotFound("leaderboard"))?;

        let (entry, deferred) = {
            let mut state = board.state.lock();
            if let Some(entry) = state.entries.get_mut(&profile_id) {
                entry.previous_score = entry.score;
                entry.score_change = score - entry.score;
                entry.score = score;
                entry.total_activities += 1;
            } else {
                let seq = state.next_seq;
                state.next_seq += 1;
                state.entries.insert(
                    profile_id,
                    LeaderboardEntry {
                        profile_id,
                        score,
                        previous_score: 0,
                        score_change: score,
                        total_activities: 1,
                        current_rank: None,
                        previous_rank: None,
                        rank_change: 0,
                        joined_seq: seq,
                        created_at: Utc::now(),
                    },
                );
            }

            let deferred = state.entries.len() > self.inline_threshold;
            if !deferred {
                rank_assign(&mut state, board.def.ranking_method);
            }
            (state.entries[&profile_id].clone(), deferred)
        };

        if deferred {
            self.scheduler.mark_dirty(leaderboard_id);
        }
        debug!(
            leaderboard = %leaderboard_id,
            profile = %profile_id,
            score,
            deferred,
            "score submitted"
        );
        Ok(entry)
    }

    /// Synchronously recomputes the board's ranking.
    pub fn recalculate_rankings(&self, leaderboard_id: LeaderboardId) -> Result<(), EngineError> {
        let board = self
            .boards
            .map
            .get(&leaderboard_id)
            .map(|b| Arc::clone(b.value()))
            .ok_or(EngineError::NotFound("leaderboard"))?;
        let mut state = board.state.lock();
        rank_assign(&mut state, board.def.ranking_method);
        Ok(())
    }

    /// Returns one page of entries ordered by current rank (unranked
    /// entries last), plus the total participant count.
    pub fn entries(
        &self,
        leaderboard_id: LeaderboardId,
        page: Page,
    ) -> Result<(Vec<LeaderboardEntry>, usize), EngineError> {
        let board = self
            .boards
            .map
            .get(&leaderboard_id)
            .map(|b| Arc::clone(b.value()))
            .ok_or(EngineError::NotFound("leaderboard"))?;
        let state = board.state.lock();
        let total = state.entries.len();
        let mut records: Vec<LeaderboardEntry> = state.entries.values().cloned().collect();
        drop(state);
        records.sort_by_key(|e| (e.current_rank.unwrap_or(u32::MAX), e.joined_seq));
        let records = records
            .into_iter()
            .skip(page.offset)
            .take(page.limit)
            .collect();
        Ok((records, total))
    }

    /// Returns one profile's entry on a board, if present.
    pub fn entry(
        &self,
        leaderboard_id: LeaderboardId,
        profile_id: ProfileId,
    ) -> Option<LeaderboardEntry> {
        self.boards
            .map
            .get(&leaderboard_id)
            .and_then(|b| b.state.lock().entries.get(&profile_id).cloned())
    }

    /// Flushes pending recomputations and joins the worker thread.
    pub fn shutdown(&self) {
        info!("stopping ranking worker");
        self.scheduler.shutdown();
    }
}
