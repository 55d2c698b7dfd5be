use clap::{Parser, ValueEnum};
use multiplatformer_server::constants::{
    DEFAULT_BLOCK_SIZE, KEY_JUMP, KEY_LEFT, KEY_RESPAWN, KEY_RIGHT, KEY_TRIGGER_SPECIALS, TICK_MS,
};
use multiplatformer_server::engine::{Transport, World};
use multiplatformer_server::level::{FirstLevel, Level, PlaygroundLevel};
use multiplatformer_server::protocol::{parse_server_message, ClientMessage, ServerMessage};
use multiplatformer_server::rng::Rng;
use multiplatformer_server::types::{Category, Extent, PlayerId, TileId};
use rand::Rng as _;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Ticks a bot keeps its current input before choosing again.
const BOT_DECISION_TICKS: u64 = 15;
/// How far below the level a bot may fall before it respawns itself.
const FALL_LIMIT_BLOCKS: f64 = 20.0;

#[derive(Parser, Debug)]
#[command(author, version, about = "Headless bot run against the game world")]
struct Cli {
    #[arg(long, default_value_t = 4)]
    bots: usize,
    #[arg(long, default_value_t = 3_000)]
    ticks: u64,
    #[arg(long)]
    seed: Option<u32>,
    #[arg(long, value_enum, default_value_t = SimLevel::Playground)]
    level: SimLevel,
    #[arg(long)]
    run_id: Option<String>,
    #[arg(long)]
    summary_out: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
enum SimLevel {
    First,
    Playground,
}

#[derive(Clone, Debug, Serialize)]
struct AnomalyRecord {
    tick: u64,
    message: String,
}

/// Every sighting with its tick, plus each distinct message once.
#[derive(Debug, Default)]
struct AnomalyLog {
    distinct: Vec<String>,
    records: Vec<AnomalyRecord>,
}

impl AnomalyLog {
    fn record(&mut self, tick: u64, message: String) {
        if !self.distinct.contains(&message) {
            self.distinct.push(message.clone());
        }
        self.records.push(AnomalyRecord { tick, message });
    }

    fn absorb(&mut self, tick: u64, audit: &mut WireAudit, world: &World) {
        for message in audit.problems.drain(..) {
            self.record(tick, message);
        }
        for message in collect_world_anomalies(world) {
            self.record(tick, message);
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
struct RunStats {
    #[serde(rename = "messageCounts")]
    message_counts: BTreeMap<String, usize>,
    #[serde(rename = "pointsScored")]
    points_scored: i64,
    kills: usize,
    falls: usize,
    reconnects: usize,
    #[serde(rename = "bestScore")]
    best_score: i64,
}

#[derive(Clone, Debug, Serialize)]
struct RunResult {
    seed: u32,
    bots: usize,
    ticks: u64,
    level: SimLevel,
    extent: Extent,
    #[serde(rename = "simulatedMs")]
    simulated_ms: u64,
    #[serde(flatten)]
    stats: RunStats,
    anomalies: Vec<String>,
    #[serde(skip)]
    anomaly_records: Vec<AnomalyRecord>,
}

#[derive(Clone, Debug, Serialize)]
struct RunSummary {
    #[serde(rename = "runId")]
    run_id: String,
    #[serde(rename = "startedAtMs")]
    started_at_ms: u64,
    #[serde(rename = "finishedAtMs")]
    finished_at_ms: u64,
    #[serde(rename = "anomalyCount")]
    anomaly_count: usize,
    result: RunResult,
}

#[derive(Clone, Debug, Serialize)]
struct StructuredLogLine {
    #[serde(rename = "timestampMs")]
    timestamp_ms: u64,
    level: String,
    event: String,
    #[serde(rename = "runId")]
    run_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tick: Option<u64>,
    details: Value,
}

/// One client's view of the wire: what it has been told exists.
#[derive(Default)]
struct ClientView {
    tiles: BTreeSet<TileId>,
    players: BTreeSet<PlayerId>,
}

/// Decodes every outbound payload and checks it against each client's view.
#[derive(Default)]
struct WireAudit {
    views: BTreeMap<PlayerId, ClientView>,
    counts: BTreeMap<String, usize>,
    scores: Vec<(PlayerId, i64)>,
    kills: Vec<PlayerId>,
    problems: Vec<String>,
}

impl WireAudit {
    fn open(&mut self, player: PlayerId) {
        self.views.insert(player, ClientView::default());
    }

    fn deliver(&mut self, player: PlayerId, payload: &str) {
        let message = match parse_server_message(payload) {
            Ok(message) => message,
            Err(error) => {
                self.problems
                    .push(format!("undecodable payload `{payload}`: {error}"));
                return;
            }
        };
        let Some(view) = self.views.get_mut(&player) else {
            return;
        };
        match &message {
            ServerMessage::NewTile { id, .. } => {
                view.tiles.insert(*id);
            }
            ServerMessage::TileUpdate(id, _) if !view.tiles.contains(id) => {
                self.problems
                    .push(format!("client {player} got BU for unannounced tile {id}"));
            }
            ServerMessage::RemoveTile(id) => {
                if !view.tiles.remove(id) {
                    self.problems
                        .push(format!("client {player} got RB for unannounced tile {id}"));
                }
            }
            ServerMessage::NewPlayer(id) => {
                view.players.insert(*id);
            }
            ServerMessage::PlayerUpdate(id, _) if !view.players.contains(id) => {
                self.problems
                    .push(format!("client {player} got PU for unannounced player {id}"));
            }
            ServerMessage::KillPlayer(id) => {
                view.players.remove(id);
            }
            _ => {}
        }
    }

    fn count(&mut self, payload: &str) {
        let tag = payload.split_ascii_whitespace().next().unwrap_or_default();
        *self.counts.entry(tag.to_string()).or_insert(0) += 1;
    }
}

impl Transport for WireAudit {
    fn send_to(&mut self, player: PlayerId, payload: &str) {
        self.count(payload);
        self.deliver(player, payload);
    }

    fn send_to_all(&mut self, payload: &str) {
        self.count(payload);
        match parse_server_message(payload) {
            Ok(ServerMessage::Score(player, score)) => self.scores.push((player, score)),
            Ok(ServerMessage::KillPlayer(player)) => self.kills.push(player),
            _ => {}
        }
        let players: Vec<PlayerId> = self.views.keys().copied().collect();
        for player in players {
            self.deliver(player, payload);
        }
    }

    fn close(&mut self, player: PlayerId) {
        self.views.remove(&player);
    }
}

#[derive(Clone, Debug)]
struct Bot {
    player: PlayerId,
    held: Option<u32>,
}

fn main() {
    let cli = Cli::parse();
    let seed = cli.seed.unwrap_or_else(|| rand::rng().random());
    let started_at_ms = now_ms();
    let run_id = cli
        .run_id
        .clone()
        .unwrap_or_else(|| default_run_id(seed, started_at_ms));

    emit_log(
        "info",
        "run_started",
        &run_id,
        None,
        json!({
            "seed": seed,
            "bots": cli.bots,
            "ticks": cli.ticks,
            "level": cli.level,
        }),
    );

    let result = run(seed, cli.bots, cli.ticks, cli.level);
    for anomaly in &result.anomaly_records {
        emit_log(
            "warn",
            "anomaly_detected",
            &run_id,
            Some(anomaly.tick),
            json!({ "message": anomaly.message }),
        );
    }
    println!(
        "{}",
        serde_json::to_string(&result).unwrap_or_else(|error| format!("{{\"error\":\"{error}\"}}"))
    );

    let summary = RunSummary {
        run_id: run_id.clone(),
        started_at_ms,
        finished_at_ms: now_ms(),
        anomaly_count: result.anomaly_records.len(),
        result,
    };

    let mut summary_out_written: Option<String> = None;
    if let Some(path) = cli.summary_out.as_ref() {
        if let Err(error) = write_summary(path, &summary) {
            emit_log(
                "error",
                "summary_write_failed",
                &run_id,
                None,
                json!({
                    "path": path.to_string_lossy(),
                    "error": error.to_string(),
                }),
            );
            std::process::exit(2);
        }
        summary_out_written = Some(path.to_string_lossy().to_string());
    }

    emit_log(
        "info",
        "run_finished",
        &run_id,
        Some(summary.result.ticks),
        json!({
            "anomalyCount": summary.anomaly_count,
            "pointsScored": summary.result.stats.points_scored,
            "kills": summary.result.stats.kills,
            "summaryOut": summary_out_written,
        }),
    );

    if summary.anomaly_count > 0 {
        std::process::exit(1);
    }
}

fn run(seed: u32, bots: usize, ticks: u64, level_kind: SimLevel) -> RunResult {
    let mut world = World::new(DEFAULT_BLOCK_SIZE, DEFAULT_BLOCK_SIZE);
    let mut level: Box<dyn Level> = match level_kind {
        SimLevel::First => Box::new(FirstLevel::new(seed)),
        SimLevel::Playground => Box::new(PlaygroundLevel::new(seed)),
    };
    level.build(&mut world);

    let mut rng = Rng::new(seed ^ 0x9e37_79b9);
    let mut audit = WireAudit::default();
    let mut stats = RunStats::default();
    let mut log = AnomalyLog::default();

    let mut roster: Vec<Bot> = (0..bots).map(|_| join(&mut world, &mut audit)).collect();

    for tick in 1..=ticks {
        for bot in roster.iter_mut() {
            drive(&mut world, &mut rng, bot, tick);
        }
        world.flush(&mut audit);

        world.step(level.as_mut());
        world.flush(&mut audit);

        log.absorb(tick, &mut audit, &world);

        stats.kills += audit.kills.len();
        for bot in roster.iter_mut() {
            if audit.kills.contains(&bot.player) {
                *bot = join(&mut world, &mut audit);
                stats.reconnects += 1;
            } else if fell_out(&world, bot.player) {
                world.handle_message(bot.player, ClientMessage::KeyUp(KEY_RESPAWN));
                stats.falls += 1;
            }
        }
        audit.kills.clear();
        world.flush(&mut audit);
    }

    let mut last_scores: BTreeMap<PlayerId, i64> = BTreeMap::new();
    for (player, score) in &audit.scores {
        let previous = last_scores.insert(*player, *score).unwrap_or(0);
        stats.points_scored += score - previous;
    }
    stats.best_score = last_scores.values().copied().max().unwrap_or(0);
    stats.message_counts = std::mem::take(&mut audit.counts);

    RunResult {
        seed,
        bots,
        ticks,
        level: level_kind,
        extent: world.bounds(),
        simulated_ms: ticks * TICK_MS,
        stats,
        anomalies: log.distinct,
        anomaly_records: log.records,
    }
}

fn join(world: &mut World, audit: &mut WireAudit) -> Bot {
    let player = world.connect_player();
    audit.open(player);
    world.flush(audit);
    Bot { player, held: None }
}

/// Releases the held key and presses a new one every few ticks.
fn drive(world: &mut World, rng: &mut Rng, bot: &mut Bot, tick: u64) {
    if tick % BOT_DECISION_TICKS != 0 {
        return;
    }
    if let Some(key) = bot.held.take() {
        world.handle_message(bot.player, ClientMessage::KeyUp(key));
    }
    let choices = [
        KEY_LEFT[0],
        KEY_RIGHT[0],
        KEY_JUMP[0],
        KEY_LEFT[1],
        KEY_RIGHT[1],
        KEY_JUMP[1],
    ];
    let key = choices[rng.pick_index(choices.len())];
    world.handle_message(bot.player, ClientMessage::KeyDown(key));
    bot.held = Some(key);

    if rng.chance(0.01) {
        world.handle_message(bot.player, ClientMessage::KeyDown(KEY_TRIGGER_SPECIALS));
        world.handle_message(bot.player, ClientMessage::KeyUp(KEY_TRIGGER_SPECIALS));
    }
}

fn fell_out(world: &World, player: PlayerId) -> bool {
    let Some(player) = world.player(player) else {
        return false;
    };
    let (_, block_height) = world.block_size();
    player.rect().y > (world.bounds().y2 + FALL_LIMIT_BLOCKS) * block_height
}

fn collect_world_anomalies(world: &World) -> Vec<String> {
    let mut anomalies = Vec::new();
    for player in world.players() {
        let rect = player.rect();
        if !(rect.x.is_finite() && rect.y.is_finite()) {
            anomalies.push(format!("player {} has non-finite position", player.id));
            continue;
        }
        let embedded = world.tiles().any(|tile| {
            tile.category == Category::Solid
                && !tile.movable.is_dynamic()
                && tile.rect().overlaps(rect)
        });
        if embedded {
            anomalies.push(format!("player {} overlaps a static solid", player.id));
        }
    }
    for tile in world.tiles() {
        let rect = tile.rect();
        if !(rect.x.is_finite() && rect.y.is_finite()) {
            anomalies.push(format!("tile {} has non-finite position", tile.id));
        }
    }
    anomalies
}

fn default_run_id(seed: u32, timestamp_ms: u64) -> String {
    format!("sim-{seed}-{timestamp_ms}")
}

fn emit_log(level: &str, event: &str, run_id: &str, tick: Option<u64>, details: Value) {
    let line = StructuredLogLine {
        timestamp_ms: now_ms(),
        level: level.to_string(),
        event: event.to_string(),
        run_id: run_id.to_string(),
        tick,
        details,
    };
    match serde_json::to_string(&line) {
        Ok(line) => eprintln!("{line}"),
        Err(error) => eprintln!("{{\"event\":\"log_failed\",\"error\":\"{error}\"}}"),
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn write_summary(path: &Path, summary: &RunSummary) -> io::Result<()> {
    let mut text = serde_json::to_string_pretty(summary)?;
    text.push('\n');
    std::fs::write(path, text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_run_id_contains_seed_and_timestamp() {
        assert_eq!(default_run_id(42, 123456789), "sim-42-123456789");
    }

    #[test]
    fn short_run_is_clean_and_replays() {
        let first = run(7, 3, 600, SimLevel::First);
        assert!(first.anomalies.is_empty(), "{:?}", first.anomalies);
        assert!(first.stats.message_counts.get("PU").copied().unwrap_or(0) > 0);
        assert_eq!(first.stats.message_counts.get("RP").copied(), Some(3));

        let second = run(7, 3, 600, SimLevel::First);
        assert_eq!(first.stats, second.stats);
    }

    #[test]
    fn playground_run_has_no_wire_anomalies() {
        let result = run(11, 4, 800, SimLevel::Playground);
        assert!(
            result
                .anomalies
                .iter()
                .all(|message| !message.contains("unannounced") && !message.contains("undecodable")),
            "{:?}",
            result.anomalies
        );
    }

    #[test]
    fn audit_flags_update_before_announce() {
        let mut audit = WireAudit::default();
        audit.open(PlayerId(1));
        audit.send_to_all("BU 5 0 0 50 50");
        audit.send_to_all("NB 6 coin tencoin");
        audit.send_to_all("BU 6 0 0 50 50");
        audit.send_to_all("RB 6");
        audit.send_to_all("RB 6");
        assert_eq!(audit.problems.len(), 2);
        assert_eq!(audit.counts.get("BU"), Some(&2));
    }

    #[test]
    fn summary_file_carries_run_and_extent() {
        let result = run(5, 1, 120, SimLevel::First);
        let summary = RunSummary {
            run_id: default_run_id(5, 0),
            started_at_ms: 0,
            finished_at_ms: 1,
            anomaly_count: result.anomaly_records.len(),
            result,
        };
        let target = std::env::temp_dir().join(format!("{}-{}.json", summary.run_id, now_ms()));
        write_summary(&target, &summary).expect("temp dir is writable");

        let text = std::fs::read_to_string(&target).expect("summary was written");
        std::fs::remove_file(&target).ok();
        let written: Value = serde_json::from_str(&text).expect("summary is json");
        assert_eq!(written["runId"], "sim-5-0");
        assert_eq!(written["result"]["level"], "first");
        assert_eq!(written["result"]["extent"]["x1"], -2.0);
        assert_eq!(written["result"]["extent"]["x2"], 16.0);
        assert!(written["result"]["messageCounts"]["NB"].as_u64().unwrap_or(0) >= 8);
    }

    #[test]
    fn summary_write_into_missing_directory_fails() {
        let summary = RunSummary {
            run_id: "sim-1-1".to_string(),
            started_at_ms: 1,
            finished_at_ms: 2,
            anomaly_count: 0,
            result: run(1, 1, 10, SimLevel::First),
        };
        let target = std::env::temp_dir()
            .join(format!("multiplatformer-absent-{}", now_ms()))
            .join("summary.json");
        assert!(write_summary(&target, &summary).is_err());
    }

    #[test]
    fn repeated_wire_problems_are_listed_once_with_every_tick() {
        let world = World::new(DEFAULT_BLOCK_SIZE, DEFAULT_BLOCK_SIZE);
        let mut audit = WireAudit::default();
        let mut log = AnomalyLog::default();
        audit.open(PlayerId(3));

        audit.send_to(PlayerId(3), "PU 9 0 0 50 100");
        log.absorb(10, &mut audit, &world);
        audit.send_to(PlayerId(3), "PU 9 0 0 50 100");
        audit.send_to(PlayerId(3), "ZZ 1");
        log.absorb(11, &mut audit, &world);

        assert_eq!(log.distinct.len(), 2);
        assert!(log.distinct[0].contains("unannounced player 9"));
        assert!(log.distinct[1].starts_with("undecodable payload `ZZ 1`"));
        let ticks: Vec<u64> = log.records.iter().map(|record| record.tick).collect();
        assert_eq!(ticks, vec![10, 11, 11]);
        assert!(audit.problems.is_empty());
    }
}
