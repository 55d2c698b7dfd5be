use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use clap::{Parser, ValueEnum};
use futures_util::{SinkExt, StreamExt};
use multiplatformer_server::constants::{DEFAULT_BLOCK_SIZE, DEFAULT_PORT, TICK_MS};
use multiplatformer_server::engine::{Transport, World};
use multiplatformer_server::level::{FirstLevel, Level, PlaygroundLevel};
use multiplatformer_server::protocol::{parse_client_message, ClientMessage};
use multiplatformer_server::types::PlayerId;
use rand::Rng as _;
use serde_json::json;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tower_http::services::ServeDir;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Per-connection outbound buffer. A full resync of a busy level has to fit.
const OUTBOUND_QUEUE_CAPACITY: usize = 1024;
const EVENT_QUEUE_CAPACITY: usize = 1024;

#[derive(Parser, Debug)]
#[command(author, version, about = "Authoritative server for the multiplayer platformer")]
struct Cli {
    #[arg(long, env = "PORT", default_value_t = DEFAULT_PORT)]
    port: u16,
    #[arg(long, env = "STATIC_DIR", default_value = "pub")]
    static_dir: PathBuf,
    #[arg(long, env = "TICK_MS", default_value_t = TICK_MS, value_parser = clap::value_parser!(u64).range(1..))]
    tick_ms: u64,
    #[arg(long, env = "BLOCK_SIZE", default_value_t = DEFAULT_BLOCK_SIZE, value_parser = parse_block_size)]
    block_size: f64,
    #[arg(long, env = "SEED")]
    seed: Option<u32>,
    #[arg(long, env = "LEVEL", value_enum, default_value_t = LevelKind::First)]
    level: LevelKind,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LevelKind {
    First,
    Playground,
}

impl LevelKind {
    fn instantiate(self, seed: u32) -> Box<dyn Level> {
        match self {
            LevelKind::First => Box::new(FirstLevel::new(seed)),
            LevelKind::Playground => Box::new(PlaygroundLevel::new(seed)),
        }
    }
}

#[derive(Debug, Error)]
enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server runtime failed: {0}")]
    Serve(#[source] std::io::Error),
}

/// What socket tasks tell the tick task.
#[derive(Debug)]
enum ClientEvent {
    Connected {
        outbound: mpsc::Sender<Outbound>,
        reply: oneshot::Sender<PlayerId>,
    },
    Message {
        player: PlayerId,
        message: ClientMessage,
    },
    Closed {
        player: PlayerId,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Outbound {
    Text(String),
    Close,
}

/// Live connections keyed by player. Sends never block; a client whose
/// queue is full (or gone) is remembered and dropped after the flush.
#[derive(Default)]
struct Connections {
    clients: HashMap<PlayerId, mpsc::Sender<Outbound>>,
    overflowed: Vec<PlayerId>,
}

impl Connections {
    fn push(&mut self, player: PlayerId, payload: &str) {
        let Some(client) = self.clients.get(&player) else {
            return;
        };
        if client
            .try_send(Outbound::Text(payload.to_string()))
            .is_err()
            && !self.overflowed.contains(&player)
        {
            self.overflowed.push(player);
        }
    }
}

impl Transport for Connections {
    fn send_to(&mut self, player: PlayerId, payload: &str) {
        self.push(player, payload);
    }

    fn send_to_all(&mut self, payload: &str) {
        let players: Vec<PlayerId> = self.clients.keys().copied().collect();
        for player in players {
            self.push(player, payload);
        }
    }

    fn close(&mut self, player: PlayerId) {
        if let Some(client) = self.clients.remove(&player) {
            let _ = client.try_send(Outbound::Close);
        }
    }
}

/// Everything the tick task owns.
struct Game {
    world: World,
    level: Box<dyn Level>,
    connections: Connections,
}

impl Game {
    fn new(world: World, level: Box<dyn Level>) -> Self {
        Self {
            world,
            level,
            connections: Connections::default(),
        }
    }

    fn handle_event(&mut self, event: ClientEvent) {
        match event {
            ClientEvent::Connected { outbound, reply } => {
                let player = self.world.connect_player();
                self.connections.clients.insert(player, outbound);
                if reply.send(player).is_err() {
                    self.world.disconnect_player(player);
                }
            }
            ClientEvent::Message { player, message } => {
                self.world.handle_message(player, message);
            }
            ClientEvent::Closed { player } => {
                self.world.disconnect_player(player);
                self.connections.clients.remove(&player);
            }
        }
        self.flush();
    }

    fn step(&mut self) {
        self.world.step(self.level.as_mut());
        self.flush();
    }

    fn flush(&mut self) {
        loop {
            self.world.flush(&mut self.connections);
            let dropped = std::mem::take(&mut self.connections.overflowed);
            if dropped.is_empty() {
                return;
            }
            for player in dropped {
                warn!(player = %player, "outbound queue full; dropping client");
                self.world.disconnect_player(player);
                self.connections.clients.remove(&player);
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), ServerError> {
    init_tracing();
    let cli = Cli::parse();

    let seed = cli.seed.unwrap_or_else(|| rand::rng().random());
    let mut world = World::new(cli.block_size, cli.block_size);
    let mut level = cli.level.instantiate(seed);
    level.build(&mut world);
    info!(
        seed,
        level = ?cli.level,
        tiles = world.tiles().count(),
        "level built"
    );

    let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
    start_tick_loop(
        Game::new(world, level),
        events_rx,
        Duration::from_millis(cli.tick_ms),
    );

    let app = router(events_tx, &cli.static_dir);
    let addr = format!("0.0.0.0:{}", cli.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|source| ServerError::Bind {
            addr: addr.clone(),
            source,
        })?;

    info!(%addr, tick_ms = cli.tick_ms, "listening");
    axum::serve(listener, app).await.map_err(ServerError::Serve)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn parse_block_size(raw: &str) -> Result<f64, String> {
    let value: f64 = raw
        .parse()
        .map_err(|_| format!("`{raw}` is not a number"))?;
    if !value.is_finite() || value <= 0.0 {
        return Err(format!("block size must be positive, got {raw}"));
    }
    Ok(value)
}

fn router(events: mpsc::Sender<ClientEvent>, static_dir: &Path) -> Router {
    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/game", get(ws_handler))
        .with_state(events);

    if static_dir.is_dir() {
        info!(path = %static_dir.display(), "serving static files");
        app.fallback_service(ServeDir::new(static_dir))
    } else {
        warn!(path = %static_dir.display(), "static directory not found");
        app
    }
}

async fn healthz() -> impl IntoResponse {
    Json(json!({ "ok": true }))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(events): State<mpsc::Sender<ClientEvent>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(events, socket))
}

async fn handle_socket(events: mpsc::Sender<ClientEvent>, socket: WebSocket) {
    let (tx, mut rx) = mpsc::channel::<Outbound>(OUTBOUND_QUEUE_CAPACITY);
    let (reply_tx, reply_rx) = oneshot::channel();
    let connected = ClientEvent::Connected {
        outbound: tx,
        reply: reply_tx,
    };
    if events.send(connected).await.is_err() {
        return;
    }
    let Ok(player) = reply_rx.await else {
        return;
    };

    let (mut ws_sender, mut ws_receiver) = socket.split();
    let writer = tokio::spawn(async move {
        while let Some(outbound) = rx.recv().await {
            let result = match outbound {
                Outbound::Text(payload) => ws_sender.send(Message::Text(payload.into())).await,
                Outbound::Close => {
                    let _ = ws_sender.send(Message::Close(None)).await;
                    break;
                }
            };
            if result.is_err() {
                break;
            }
        }
    });

    while let Some(received) = ws_receiver.next().await {
        let Ok(message) = received else {
            break;
        };
        let raw = match message {
            Message::Text(raw) => raw.to_string(),
            Message::Binary(raw) => match String::from_utf8(raw.to_vec()) {
                Ok(text) => text,
                Err(_) => {
                    debug!(player = %player, "non-utf8 frame ignored");
                    continue;
                }
            },
            Message::Close(_) => break,
            _ => continue,
        };

        match parse_client_message(&raw) {
            Ok(message) => {
                if events
                    .send(ClientEvent::Message { player, message })
                    .await
                    .is_err()
                {
                    break;
                }
            }
            Err(error) => debug!(player = %player, %error, "malformed message ignored"),
        }
    }

    let _ = events.send(ClientEvent::Closed { player }).await;
    let _ = writer.await;
}

fn start_tick_loop(mut game: Game, mut events: mpsc::Receiver<ClientEvent>, period: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            while let Ok(event) = events.try_recv() {
                game.handle_event(event);
            }
            game.step();
        }
    });
}
