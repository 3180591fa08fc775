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

//! Demo HTTP server exposing the gamification engine.
//!
//! The engine itself is transport-agnostic; this example shows the exposed
//! surface over JSON. Run with: cargo run --example server
//!
//! ```bash
//! # Award points
//! curl -X POST http://localhost:3000/ledger/record \
//!   -H "Content-Type: application/json" \
//!   -d '{"profile_id": 1, "currency": "coins", "amount": 100, "source": "daily_login"}'
//!
//! # Get balances
//! curl http://localhost:3000/profiles/1/balances
//!
//! # Redeem the seeded demo item
//! curl -X POST http://localhost:3000/rewards/1/redeem \
//!   -H "Content-Type: application/json" \
//!   -d '{"profile_id": 1, "quantity": 1}'
//!
//! # Submit a score and read the board
//! curl -X POST http://localhost:3000/leaderboards/1/scores \
//!   -H "Content-Type: application/json" \
//!   -d '{"profile_id": 1, "score": 1500}'
//! curl http://localhost:3000/leaderboards/1/entries
//! ```

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use economy_engine_rs::{
    Achievement, AchievementFilter, AchievementId, Currency, CurrencyAmounts, Engine, EngineError,
    LeaderboardDef, LeaderboardId, Page, Period, ProfileId, RankingMethod, RewardFilter,
    RewardItem, RewardItemId, TransactionSource,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;

// === Request/Response DTOs ===

/// Request body for recording a currency movement.
#[derive(Debug, Deserialize)]
pub struct RecordRequest {
    pub profile_id: u64,
    pub currency: Currency,
    pub amount: i64,
    pub source: String,
    pub source_id: Option<String>,
    pub description: Option<String>,
    /// When set, the `(profile, source, source_id)` key is enforced
    /// at-most-once.
    #[serde(default)]
    pub idempotent: bool,
}

/// Request body for advancing achievement progress.
#[derive(Debug, Deserialize)]
pub struct ProgressRequest {
    pub profile_id: u64,
    pub trigger: String,
    #[serde(default = "one")]
    pub increment: u32,
    pub context: Option<serde_json::Value>,
}

/// Request body for redeeming a reward item.
#[derive(Debug, Deserialize)]
pub struct RedeemRequest {
    pub profile_id: u64,
    #[serde(default = "one")]
    pub quantity: u32,
}

/// Request body for submitting a leaderboard score.
#[derive(Debug, Deserialize)]
pub struct ScoreRequest {
    pub profile_id: u64,
    pub score: i64,
}

fn one() -> u32 {
    1
}

/// Pagination query parameters.
#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub currency: Option<Currency>,
}

impl PageQuery {
    fn page(&self) -> Page {
        let default = Page::default();
        Page {
            limit: self.limit.unwrap_or(default.limit),
            offset: self.offset.unwrap_or(default.offset),
        }
    }
}

/// Response body for paginated listings.
#[derive(Debug, Serialize)]
pub struct PageResponse<T> {
    pub records: Vec<T>,
    pub total: usize,
}

/// Response body for errors.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

// === Application State ===

/// Shared application state containing the engine.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
}

// === Error Handling ===

/// Wrapper for converting `EngineError` into HTTP responses.
pub struct AppError(EngineError);

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        AppError(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            EngineError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            EngineError::NotAvailable => (StatusCode::UNPROCESSABLE_ENTITY, "NOT_AVAILABLE"),
            EngineError::RequirementNotMet => {
                (StatusCode::UNPROCESSABLE_ENTITY, "REQUIREMENT_NOT_MET")
            }
            EngineError::OutOfStock => (StatusCode::UNPROCESSABLE_ENTITY, "OUT_OF_STOCK"),
            EngineError::LimitExceeded => (StatusCode::UNPROCESSABLE_ENTITY, "LIMIT_EXCEEDED"),
            EngineError::InsufficientBalance { .. } => {
                (StatusCode::UNPROCESSABLE_ENTITY, "INSUFFICIENT_BALANCE")
            }
            EngineError::Timeout => (StatusCode::SERVICE_UNAVAILABLE, "TIMEOUT"),
            EngineError::Conflict => (StatusCode::CONFLICT, "CONFLICT"),
            EngineError::DuplicateEvent => (StatusCode::CONFLICT, "DUPLICATE_EVENT"),
            EngineError::InvalidAmount => (StatusCode::BAD_REQUEST, "INVALID_AMOUNT"),
        };

        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
                code: code.to_string(),
            }),
        )
            .into_response()
    }
}

// === Handlers ===

/// POST /ledger/record - Record a currency movement.
async fn record(
    State(state): State<AppState>,
    Json(request): Json<RecordRequest>,
) -> Result<impl IntoResponse, AppError> {
    let profile_id = ProfileId(request.profile_id);
    let source = TransactionSource::Event(request.source);
    let transaction = if request.idempotent {
        let source_id = request.source_id.ok_or(EngineError::InvalidAmount)?;
        state.engine.record_once(
            profile_id,
            request.currency,
            request.amount,
            source,
            source_id,
            request.description,
        )?
    } else {
        state.engine.record(
            profile_id,
            request.currency,
            request.amount,
            source,
            request.source_id,
            request.description,
        )?
    };
    Ok((StatusCode::CREATED, Json(transaction)))
}

/// GET /profiles/{id}/balances - Get a profile's balance snapshot.
async fn balances(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<impl IntoResponse, AppError> {
    let snapshot = state.engine.balances(ProfileId(id))?;
    Ok(Json(snapshot))
}

/// GET /profiles/{id}/transactions - List a profile's transactions.
async fn transactions(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Query(query): Query<PageQuery>,
) -> Result<impl IntoResponse, AppError> {
    let (records, total) =
        state
            .engine
            .transactions(ProfileId(id), query.currency, query.page())?;
    Ok(Json(PageResponse { records, total }))
}

/// POST /achievements/{id}/progress - Advance achievement progress.
async fn progress(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(request): Json<ProgressRequest>,
) -> Result<impl IntoResponse, AppError> {
    let outcome = state.engine.progress(
        ProfileId(request.profile_id),
        AchievementId(id),
        &request.trigger,
        request.increment,
        request.context,
    )?;
    Ok(Json(outcome))
}

/// GET /achievements - List the achievement catalog.
async fn achievements(
    State(state): State<AppState>,
    Query(query): Query<AchievementQuery>,
) -> impl IntoResponse {
    let filter = AchievementFilter {
        category: query.category,
        rarity: None,
        available_only: query.available_only.unwrap_or(false),
        unlocked_only: query.unlocked_only.unwrap_or(false),
    };
    let statuses = state
        .engine
        .achievements(query.profile_id.map(ProfileId), &filter);
    Json(statuses)
}

#[derive(Debug, Deserialize)]
pub struct AchievementQuery {
    pub profile_id: Option<u64>,
    pub category: Option<String>,
    pub available_only: Option<bool>,
    pub unlocked_only: Option<bool>,
}

/// POST /rewards/{id}/redeem - Redeem a reward item.
async fn redeem(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(request): Json<RedeemRequest>,
) -> Result<impl IntoResponse, AppError> {
    let redemption = state.engine.redeem(
        ProfileId(request.profile_id),
        RewardItemId(id),
        request.quantity,
    )?;
    Ok((StatusCode::CREATED, Json(redemption)))
}

/// GET /rewards - List the reward catalog.
async fn rewards(
    State(state): State<AppState>,
    Query(query): Query<RewardQuery>,
) -> impl IntoResponse {
    let filter = RewardFilter {
        category: query.category,
        available_only: query.available_only.unwrap_or(false),
    };
    let views = state.engine.rewards(query.profile_id.map(ProfileId), &filter);
    Json(views)
}

#[derive(Debug, Deserialize)]
pub struct RewardQuery {
    pub profile_id: Option<u64>,
    pub category: Option<String>,
    pub available_only: Option<bool>,
}

/// POST /leaderboards/{id}/scores - Submit a score.
async fn submit_score(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(request): Json<ScoreRequest>,
) -> Result<impl IntoResponse, AppError> {
    let entry = state.engine.submit_score(
        LeaderboardId(id),
        ProfileId(request.profile_id),
        request.score,
    )?;
    Ok((StatusCode::CREATED, Json(entry)))
}

/// GET /leaderboards/{id}/entries - List entries by rank.
async fn leaderboard_entries(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Query(query): Query<PageQuery>,
) -> Result<impl IntoResponse, AppError> {
    let (records, total) = state
        .engine
        .leaderboard_entries(LeaderboardId(id), query.page())?;
    Ok(Json(PageResponse { records, total }))
}

// === Router ===

fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/ledger/record", post(record))
        .route("/profiles/{id}/balances", get(balances))
        .route("/profiles/{id}/transactions", get(transactions))
        .route("/achievements", get(achievements))
        .route("/achievements/{id}/progress", post(progress))
        .route("/rewards", get(rewards))
        .route("/rewards/{id}/redeem", post(redeem))
        .route("/leaderboards/{id}/scores", post(submit_score))
        .route("/leaderboards/{id}/entries", get(leaderboard_entries))
        .with_state(state)
}

/// Seeds a small demo catalog so the endpoints have something to serve.
fn seed_demo_catalog(engine: &Engine) {
    engine
        .register_achievement(
            Achievement::new(
                AchievementId(1),
                "First Steps",
                CurrencyAmounts {
                    xp: 100,
                    coins: 25,
                    ..CurrencyAmounts::ZERO
                },
            )
            .with_max_progress(5),
        )
        .expect("demo achievement");
    engine
        .register_reward_item(
            RewardItem::new(
                RewardItemId(1),
                "Profile Badge",
                CurrencyAmounts {
                    coins: 60,
                    ..CurrencyAmounts::ZERO
                },
            )
            .with_stock(100),
        )
        .expect("demo reward item");
    engine
        .register_leaderboard(LeaderboardDef {
            id: LeaderboardId(1),
            name: "Weekly XP".to_string(),
            metric: "xp_earned".to_string(),
            period: Period::Weekly,
            ranking_method: RankingMethod::Points,
        })
        .expect("demo leaderboard");
}

// === Main ===

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let engine = Arc::new(Engine::default());
    seed_demo_catalog(&engine);

    let state = AppState {
        engine: Arc::clone(&engine),
    };
    let app = create_router(state);

    let listener = TcpListener::bind("127.0.0.1:3000").await.unwrap();
    println!("Gamification API server running on http://127.0.0.1:3000");
    println!();
    println!("Endpoints:");
    println!("  POST /ledger/record               - Record a currency movement");
    println!("  GET  /profiles/:id/balances       - Balance snapshot");
    println!("  GET  /profiles/:id/transactions   - Transaction history");
    println!("  GET  /achievements                - Achievement catalog");
    println!("  POST /achievements/:id/progress   - Advance progress");
    println!("  GET  /rewards                     - Reward catalog");
    println!("  POST /rewards/:id/redeem          - Redeem an item");
    println!("  POST /leaderboards/:id/scores     - Submit a score");
    println!("  GET  /leaderboards/:id/entries    - Entries by rank");

    axum::serve(listener, app).await.unwrap();
}
