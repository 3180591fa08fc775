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

use clap::Parser;
use csv::{ReaderBuilder, Trim, Writer};
use economy_engine_rs::{
    Achievement, AchievementId, Currency, CurrencyAmounts, Engine, EngineConfig, EngineError,
    Fulfillment, GamificationRule, LeaderboardDef, LeaderboardId, ProfileId, Rarity, RewardItem,
    RewardItemId, RuleId, Tier, TransactionSource,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::PathBuf;
use std::process;
use std::time::Duration;

/// Gamification Economy Engine - Process event CSV files
///
/// Reads gamification events from a CSV file, runs them through the engine,
/// and outputs per-profile balance snapshots to stdout. Supports point
/// records, achievement progress, reward redemptions, score submissions,
/// and rule-driven events.
#[derive(Parser, Debug)]
#[command(name = "economy-engine-rs")]
#[command(about = "A gamification engine that processes event CSVs", long_about = None)]
struct Args {
    /// Path to CSV file with events
    ///
    /// Expected format: op,profile,currency,target,amount,source,description
    /// Example: cargo run -- events.csv > balances.csv
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Optional JSON file defining achievements, reward items,
    /// leaderboards, and rules (the catalogs owned by admin tooling)
    #[arg(long, value_name = "FILE")]
    catalog: Option<PathBuf>,

    /// Profile lock acquisition budget in milliseconds
    #[arg(long, default_value_t = 200)]
    op_budget_ms: u64,

    /// Debounce window of the deferred ranking worker in milliseconds
    #[arg(long, default_value_t = 50)]
    rank_debounce_ms: u64,

    /// Participant count above which boards re-rank via the worker
    #[arg(long, default_value_t = 100)]
    inline_rank_threshold: usize,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let engine = Engine::new(EngineConfig {
        op_budget: Duration::from_millis(args.op_budget_ms),
        rank_debounce: Duration::from_millis(args.rank_debounce_ms),
        inline_rank_threshold: args.inline_rank_threshold,
    });

    if let Some(path) = &args.catalog {
        if let Err(e) = load_catalog(&engine, path) {
            eprintln!("Error loading catalog '{}': {}", path.display(), e);
            process::exit(1);
        }
    }

    let file = match File::open(&args.input) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Error opening file '{}': {}", args.input.display(), e);
            process::exit(1);
        }
    };

    if let Err(e) = process_events(&engine, BufReader::new(file)) {
        eprintln!("Error processing events: {}", e);
        process::exit(1);
    }

    // Flush pending rank recomputations before reporting.
    engine.shutdown();

    if let Err(e) = write_balances(&engine, std::io::stdout()) {
        eprintln!("Error writing output: {}", e);
        process::exit(1);
    }
}

// === Catalog file ===

/// Admin-tooling catalog definitions, deserialized from JSON.
///
/// The specs below are input DTOs; they convert into engine catalog types
/// through the builder APIs.
#[derive(Debug, Default, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    achievements: Vec<AchievementSpec>,
    #[serde(default)]
    reward_items: Vec<RewardItemSpec>,
    #[serde(default)]
    leaderboards: Vec<LeaderboardDef>,
    #[serde(default)]
    rules: Vec<RuleSpec>,
}

#[derive(Debug, Deserialize)]
struct AchievementSpec {
    id: u64,
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    rarity: Option<Rarity>,
    #[serde(default)]
    max_progress: Option<u32>,
    #[serde(default)]
    rewards: CurrencyAmounts,
    #[serde(default)]
    repeatable: bool,
    #[serde(default)]
    trigger_event: Option<String>,
}

impl AchievementSpec {
    fn into_achievement(self) -> Achievement {
        let mut achievement = Achievement::new(AchievementId(self.id), self.name, self.rewards);
        if let Some(description) = self.description {
            achievement = achievement.with_description(description);
        }
        if let Some(category) = self.category {
            achievement = achievement.with_category(category);
        }
        if let Some(rarity) = self.rarity {
            achievement = achievement.with_rarity(rarity);
        }
        if let Some(max_progress) = self.max_progress {
            achievement = achievement.with_max_progress(max_progress);
        }
        if self.repeatable {
            achievement = achievement.repeatable();
        }
        if let Some(event) = self.trigger_event {
            achievement = achievement.with_trigger_event(event);
        }
        achievement
    }
}

#[derive(Debug, Deserialize)]
struct RewardItemSpec {
    id: u64,
    name: String,
    #[serde(default)]
    category: Option<String>,
    cost: CurrencyAmounts,
    #[serde(default)]
    fulfillment: Option<Fulfillment>,
    #[serde(default)]
    stock: Option<u32>,
    #[serde(default)]
    max_per_user: Option<u32>,
    #[serde(default)]
    level_requirement: Option<u32>,
    #[serde(default)]
    tier_requirement: Option<Tier>,
}

impl RewardItemSpec {
    fn into_item(self) -> RewardItem {
        let mut item = RewardItem::new(RewardItemId(self.id), self.name, self.cost);
        if let Some(category) = self.category {
            item = item.with_category(category);
        }
        if let Some(fulfillment) = self.fulfillment {
            item = item.with_fulfillment(fulfillment);
        }
        if let Some(stock) = self.stock {
            item = item.with_stock(stock);
        }
        if let Some(max_per_user) = self.max_per_user {
            item = item.with_max_per_user(max_per_user);
        }
        if let Some(level) = self.level_requirement {
            item = item.with_level_requirement(level);
        }
        if let Some(tier) = self.tier_requirement {
            item = item.with_tier_requirement(tier);
        }
        item
    }
}

#[derive(Debug, Deserialize)]
struct RuleSpec {
    id: u64,
    name: String,
    trigger_event: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    point_rewards: CurrencyAmounts,
    #[serde(default)]
    bonus_multiplier: Option<Decimal>,
    #[serde(default)]
    achievement_ids: Vec<u64>,
    #[serde(default)]
    trigger_limit: Option<u32>,
}

impl RuleSpec {
    fn into_rule(self) -> GamificationRule {
        let mut rule = GamificationRule::new(
            RuleId(self.id),
            self.name,
            self.trigger_event,
            self.point_rewards,
        );
        if let Some(description) = self.description {
            rule = rule.with_description(description);
        }
        if let Some(multiplier) = self.bonus_multiplier {
            rule = rule.with_multiplier(multiplier);
        }
        if !self.achievement_ids.is_empty() {
            rule = rule.with_achievements(
                self.achievement_ids.into_iter().map(AchievementId).collect(),
            );
        }
        if let Some(limit) = self.trigger_limit {
            rule = rule.with_trigger_limit(limit);
        }
        rule
    }
}

/// Loads catalog definitions into the engine.
///
/// # Errors
///
/// Returns an error string on I/O failure, malformed JSON, or a duplicate
/// catalog id.
fn load_catalog(engine: &Engine, path: &PathBuf) -> Result<(), String> {
    let file = File::open(path).map_err(|e| e.to_string())?;
    let catalog: CatalogFile =
        serde_json::from_reader(BufReader::new(file)).map_err(|e| e.to_string())?;

    for spec in catalog.achievements {
        engine
            .register_achievement(spec.into_achievement())
            .map_err(|e| format!("achievement: {}", e))?;
    }
    for spec in catalog.reward_items {
        engine
            .register_reward_item(spec.into_item())
            .map_err(|e| format!("reward item: {}", e))?;
    }
    for def in catalog.leaderboards {
        engine
            .register_leaderboard(def)
            .map_err(|e| format!("leaderboard: {}", e))?;
    }
    for spec in catalog.rules {
        engine
            .register_rule(spec.into_rule())
            .map_err(|e| format!("rule: {}", e))?;
    }
    Ok(())
}

// === Event CSV ===

/// Raw CSV record matching the input format.
///
/// Fields: `op, profile, currency, target, amount, source, description`
#[derive(Debug, Deserialize)]
struct CsvRecord {
    op: String,
    profile: u64,
    #[serde(deserialize_with = "csv::invalid_option", default)]
    currency: Option<String>,
    #[serde(deserialize_with = "csv::invalid_option", default)]
    target: Option<u64>,
    #[serde(deserialize_with = "csv::invalid_option", default)]
    amount: Option<i64>,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

/// One parsed engine operation.
#[derive(Debug)]
enum EngineOp {
    Record {
        profile: ProfileId,
        currency: Currency,
        amount: i64,
        source: String,
        description: Option<String>,
    },
    Progress {
        profile: ProfileId,
        achievement: AchievementId,
        increment: u32,
        trigger: String,
    },
    Redeem {
        profile: ProfileId,
        item: RewardItemId,
        quantity: u32,
    },
    Score {
        profile: ProfileId,
        leaderboard: LeaderboardId,
        score: i64,
    },
    Event {
        profile: ProfileId,
        event: String,
    },
}

impl CsvRecord {
    /// Converts a CSV record to an engine operation.
    ///
    /// Returns `None` for unknown ops or missing required fields.
    fn into_op(self) -> Option<EngineOp> {
        let profile = ProfileId(self.profile);
        let source = self.source.filter(|s| !s.is_empty());

        match self.op.to_lowercase().as_str() {
            "record" => {
                let currency: Currency = self.currency?.parse().ok()?;
                let amount = self.amount?;
                Some(EngineOp::Record {
                    profile,
                    currency,
                    amount,
                    source: source.unwrap_or_else(|| "csv_import".to_owned()),
                    description: self.description,
                })
            }
            "progress" => Some(EngineOp::Progress {
                profile,
                achievement: AchievementId(self.target?),
                increment: u32::try_from(self.amount.unwrap_or(1)).ok()?,
                trigger: source.unwrap_or_else(|| "csv_import".to_owned()),
            }),
            "redeem" => Some(EngineOp::Redeem {
                profile,
                item: RewardItemId(self.target?),
                quantity: u32::try_from(self.amount.unwrap_or(1)).ok()?,
            }),
            "score" => Some(EngineOp::Score {
                profile,
                leaderboard: LeaderboardId(self.target?),
                score: self.amount?,
            }),
            "event" => Some(EngineOp::Event {
                profile,
                event: source?,
            }),
            _ => None,
        }
    }
}

/// Process gamification events from a CSV reader.
///
/// Streams rows through the engine without loading the whole file.
/// Malformed rows and failed operations are skipped; failures are economic
/// outcomes (insufficient balance, out of stock, ...) rather than processing
/// errors.
///
/// # CSV Format
///
/// Expected columns: `op, profile, currency, target, amount, source, description`
/// - `op`: record | progress | redeem | score | event
/// - `profile`: profile ID (u64)
/// - `currency`: xp | coins | gems | reputation (record only)
/// - `target`: achievement / reward item / leaderboard ID
/// - `amount`: signed amount, increment, quantity, or score
/// - `source`: event or trigger name
///
/// # Example
///
/// ```csv
/// op,profile,currency,target,amount,source,description
/// record,1,coins,,100,daily_login,
/// progress,1,,3,1,quiz_passed,
/// redeem,1,,7,1,,
/// score,1,,2,1500,,
/// ```
///
/// # Errors
///
/// Returns a CSV error if the reader fails or the CSV structure is invalid.
pub fn process_events<R: Read>(engine: &Engine, reader: R) -> Result<(), csv::Error> {
    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .has_headers(true)
        .from_reader(reader);

    for (index, result) in rdr.deserialize::<CsvRecord>().enumerate() {
        match result {
            Ok(record) => {
                let Some(op) = record.into_op() else {
                    #[cfg(debug_assertions)]
                    eprintln!("Skipping invalid event record at row {}", index + 1);
                    continue;
                };

                if let Err(e) = apply_op(engine, op, index) {
                    #[cfg(debug_assertions)]
                    eprintln!("Skipping row {}: {}", index + 1, e);
                    #[cfg(not(debug_assertions))]
                    let _ = e;
                }
            }
            Err(e) => {
                #[cfg(debug_assertions)]
                eprintln!("Skipping malformed row: {}", e);
                #[cfg(not(debug_assertions))]
                let _ = e;
                continue;
            }
        }
    }

    Ok(())
}

fn apply_op(engine: &Engine, op: EngineOp, row_index: usize) -> Result<(), EngineError> {
    match op {
        EngineOp::Record {
            profile,
            currency,
            amount,
            source,
            description,
        } => {
            engine.record(
                profile,
                currency,
                amount,
                TransactionSource::Event(source),
                None,
                description,
            )?;
        }
        EngineOp::Progress {
            profile,
            achievement,
            increment,
            trigger,
        } => {
            engine.progress(profile, achievement, &trigger, increment, None)?;
        }
        EngineOp::Redeem {
            profile,
            item,
            quantity,
        } => {
            engine.redeem(profile, item, quantity)?;
        }
        EngineOp::Score {
            profile,
            leaderboard,
            score,
        } => {
            engine.submit_score(leaderboard, profile, score)?;
        }
        EngineOp::Event { profile, event } => {
            // Each CSV row is a distinct platform event; the row number
            // doubles as its idempotency key within this import.
            engine.apply_event(profile, &event, &format!("row{}", row_index), None)?;
        }
    }
    Ok(())
}

/// Write profile balance snapshots to a CSV writer.
///
/// Outputs all profiles ordered by id.
///
/// # CSV Format
///
/// Columns: `profile, xp, coins, gems, reputation, level, next_level_xp, tier`
///
/// # Errors
///
/// Returns a CSV error if writing fails.
pub fn write_balances<W: Write>(engine: &Engine, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);

    let mut snapshots = engine.snapshots();
    snapshots.sort_by_key(|s| s.profile_id);
    for snapshot in snapshots {
        wtr.serialize(&snapshot)?;
    }

    wtr.flush()?;
    Ok(())
}
