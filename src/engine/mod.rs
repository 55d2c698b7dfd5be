use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::constants::{KEY_RESPAWN, KEY_TRIGGER_SPECIALS};
use crate::level::Level;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::types::{Axis, Category, EntityRef, Extent, PlayerId, Rect, TileId, Vec2};

mod behavior;
mod collision;
mod entities;
mod physics;

pub use self::collision::{CollisionSet, Contact, Overlap};
pub use self::entities::{
    BombConfig, Body, DiverConfig, Movable, PatrolConfig, Player, Special, StopWhenHit, Tile,
    TileBehavior,
};

/// Where queued messages go. Implemented by the socket layer and by tests.
pub trait Transport {
    fn send_to(&mut self, player: PlayerId, payload: &str);
    fn send_to_all(&mut self, payload: &str);
    /// Releases the connection owned by `player`; later sends skip it.
    fn close(&mut self, player: PlayerId);
}

#[derive(Clone, Debug, PartialEq)]
pub enum Outbound {
    ToPlayer(PlayerId, ServerMessage),
    ToAll(ServerMessage),
    Close(PlayerId),
}

/// Which coordinates count when looking for the nearest player.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reach {
    Horizontal,
    Both,
}

/// The single authoritative world: every tile and player lives here.
#[derive(Clone, Debug)]
pub struct World {
    block_width: f64,
    block_height: f64,

    tiles: BTreeMap<TileId, Tile>,
    players: BTreeMap<PlayerId, Player>,
    specials: Vec<TileId>,
    outbox: Vec<Outbound>,

    next_tile_id: u64,
    next_player_id: u64,
    bounds: Extent,
    spawn_point: Vec2,
    tick: u64,
}

impl World {
    pub fn new(block_width: f64, block_height: f64) -> Self {
        Self {
            block_width,
            block_height,
            tiles: BTreeMap::new(),
            players: BTreeMap::new(),
            specials: Vec::new(),
            outbox: Vec::new(),
            next_tile_id: 0,
            next_player_id: 0,
            bounds: Extent::default(),
            spawn_point: Vec2::default(),
            tick: 0,
        }
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn block_size(&self) -> (f64, f64) {
        (self.block_width, self.block_height)
    }

    pub fn bounds(&self) -> Extent {
        self.bounds
    }

    pub fn spawn_point(&self) -> Vec2 {
        self.spawn_point
    }

    pub fn tile(&self, id: TileId) -> Option<&Tile> {
        self.tiles.get(&id)
    }

    pub fn tiles(&self) -> impl Iterator<Item = &Tile> {
        self.tiles.values()
    }

    pub fn player(&self, id: PlayerId) -> Option<&Player> {
        self.players.get(&id)
    }

    pub fn players(&self) -> impl Iterator<Item = &Player> {
        self.players.values()
    }

    pub fn has_player(&self, id: PlayerId) -> bool {
        self.players.contains_key(&id)
    }

    pub(crate) fn movable(&self, who: EntityRef) -> Option<&Movable> {
        match who {
            EntityRef::Tile(id) => self.tiles.get(&id).map(|tile| &tile.movable),
            EntityRef::Player(id) => self.players.get(&id).map(|player| &player.movable),
        }
    }

    pub(crate) fn movable_mut(&mut self, who: EntityRef) -> Option<&mut Movable> {
        match who {
            EntityRef::Tile(id) => self.tiles.get_mut(&id).map(|tile| &mut tile.movable),
            EntityRef::Player(id) => self
                .players
                .get_mut(&id)
                .map(|player| &mut player.movable),
        }
    }

    fn grid_rect(&mut self, x: f64, y: f64, width: f64, height: f64) -> Rect {
        self.bounds.include(x, y, width, height);
        Rect::new(
            x * self.block_width,
            y * self.block_height,
            width * self.block_width,
            height * self.block_height,
        )
    }

    fn insert_tile(
        &mut self,
        rect: Rect,
        render_class: &str,
        category: Category,
        special: Option<Special>,
    ) -> TileId {
        self.next_tile_id += 1;
        let id = TileId(self.next_tile_id);
        let (body, behavior) = match special {
            Some(special) => special.instantiate(),
            None => (None, TileBehavior::Static),
        };
        self.tiles.insert(
            id,
            Tile::new(id, render_class, category, rect, body, behavior),
        );
        id
    }

    /// Places a static tile on the grid. It is announced on the next apply.
    pub fn create(
        &mut self,
        x: f64,
        y: f64,
        width: f64,
        height: f64,
        render_class: &str,
        category: Category,
    ) -> TileId {
        let rect = self.grid_rect(x, y, width, height);
        self.insert_tile(rect, render_class, category, None)
    }

    pub fn create_normal(&mut self, x: f64, y: f64, width: f64, height: f64) -> TileId {
        self.create(x, y, width, height, "normal", Category::Solid)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn create_special(
        &mut self,
        x: f64,
        y: f64,
        width: f64,
        height: f64,
        render_class: &str,
        category: Category,
        special: Special,
    ) -> TileId {
        let rect = self.grid_rect(x, y, width, height);
        self.insert_tile(rect, render_class, category, Some(special))
    }

    /// Creates a static tile and announces it to every client right away.
    pub fn spawn(
        &mut self,
        x: f64,
        y: f64,
        width: f64,
        height: f64,
        render_class: &str,
        category: Category,
    ) -> TileId {
        let id = self.create(x, y, width, height, render_class, category);
        self.announce_tile(id);
        id
    }

    pub fn set_spawn_point(&mut self, x: f64, y: f64) {
        self.spawn_point = Vec2::new(x * self.block_width, y * self.block_height);
    }

    /// Adds a tile to the set run by the trigger-specials key.
    pub fn register_special(&mut self, id: TileId) {
        if self.tiles.contains_key(&id) && !self.specials.contains(&id) {
            self.specials.push(id);
        }
    }

    pub fn delete_tile(&mut self, id: TileId) -> bool {
        let Some(tile) = self.tiles.remove(&id) else {
            return false;
        };
        self.specials.retain(|special| *special != id);
        if tile.announced {
            self.outbox
                .push(Outbound::ToAll(ServerMessage::RemoveTile(tile.id)));
        }
        true
    }

    fn announce_tile(&mut self, id: TileId) {
        let Some(tile) = self.tiles.get_mut(&id) else {
            return;
        };
        tile.announced = true;
        tile.movable.take_dirty();
        self.outbox.push(Outbound::ToAll(ServerMessage::NewTile {
            id,
            render_class: tile.render_class.clone(),
            category: tile.category,
        }));
        self.outbox.push(Outbound::ToAll(ServerMessage::TileUpdate(
            id,
            *tile.rect(),
        )));
    }

    pub fn connect_player(&mut self) -> PlayerId {
        self.next_player_id += 1;
        let id = PlayerId(self.next_player_id);
        let rect = Rect::new(
            self.spawn_point.x,
            self.spawn_point.y,
            self.block_width,
            self.block_height * 2.0,
        );
        self.players.insert(id, Player::new(id, rect));
        info!(player = %id, players = self.players.len(), "player connected");
        self.reload_all();
        id
    }

    pub fn disconnect_player(&mut self, id: PlayerId) -> bool {
        let removed = self.remove_player(id);
        if removed {
            info!(player = %id, players = self.players.len(), "player disconnected");
        }
        removed
    }

    pub fn kill_player(&mut self, id: PlayerId) -> bool {
        let removed = self.remove_player(id);
        if removed {
            info!(player = %id, tick = self.tick, "player killed");
        }
        removed
    }

    fn remove_player(&mut self, id: PlayerId) -> bool {
        if !self.players.contains_key(&id) {
            return false;
        }
        self.outbox
            .push(Outbound::ToAll(ServerMessage::KillPlayer(id)));
        self.players.remove(&id);
        self.outbox.push(Outbound::Close(id));
        true
    }

    pub fn add_score(&mut self, id: PlayerId, delta: i64) {
        let Some(player) = self.players.get_mut(&id) else {
            return;
        };
        let score = player.score() + delta;
        player.set_score(score);
        self.outbox
            .push(Outbound::ToAll(ServerMessage::Score(id, score)));
    }

    pub fn respawn_player(&mut self, id: PlayerId) {
        let spawn = self.spawn_point;
        let Some(player) = self.players.get_mut(&id) else {
            return;
        };
        let rect = *player.rect();
        player
            .movable
            .set_rect(Rect::new(spawn.x, spawn.y, rect.width, rect.height));
        if let Some(body) = player.movable.body.as_mut() {
            body.velocity = Vec2::default();
        }
    }

    /// Applies one client message. Messages for unknown players are dropped.
    pub fn handle_message(&mut self, id: PlayerId, message: ClientMessage) {
        let Some(player) = self.players.get_mut(&id) else {
            debug!(player = %id, ?message, "message for unknown player");
            return;
        };
        match message {
            ClientMessage::KeyDown(key) => {
                player.keys_down.insert(key);
                if key == KEY_TRIGGER_SPECIALS {
                    self.trigger_specials(id);
                }
            }
            ClientMessage::KeyUp(key) => {
                player.keys_down.remove(&key);
                if key == KEY_RESPAWN {
                    self.respawn_player(id);
                }
            }
        }
    }

    fn trigger_specials(&mut self, target: PlayerId) {
        self.specials.retain(|id| self.tiles.contains_key(id));
        let specials = self.specials.clone();
        for id in specials {
            self.trigger_special(id, target);
        }
    }

    pub fn nearest_player(&self, from: &Rect, reach: Reach) -> Option<(PlayerId, Rect)> {
        let mut nearest: Option<(PlayerId, Rect)> = None;
        let mut nearest_dist = f64::INFINITY;
        for player in self.players.values() {
            let rect = player.rect();
            let dx = (from.x - rect.x).abs();
            let dy = (from.y - rect.y).abs();
            let dist = match reach {
                Reach::Horizontal => dx,
                Reach::Both => (dx * dx + dy * dy).sqrt(),
            };
            if dist < nearest_dist {
                nearest_dist = dist;
                nearest = Some((player.id, *rect));
            }
        }
        nearest
    }

    pub fn step(&mut self, level: &mut dyn Level) {
        self.tick += 1;

        let player_ids: Vec<PlayerId> = self.players.keys().copied().collect();
        for id in player_ids {
            self.update_player(id);
        }
        let tile_ids: Vec<TileId> = self.tiles.keys().copied().collect();
        for id in tile_ids {
            self.update_tile(id);
        }

        self.apply();
        level.run(self);
    }

    /// Emits a delta for every entity whose visible state changed.
    fn apply(&mut self) {
        for player in self.players.values_mut() {
            if !player.initialized {
                player.initialized = true;
                self.outbox
                    .push(Outbound::ToPlayer(player.id, ServerMessage::YouAre(player.id)));
            }
            if player.movable.take_dirty() {
                self.outbox.push(Outbound::ToAll(ServerMessage::PlayerUpdate(
                    player.id,
                    *player.rect(),
                )));
            }
        }
        for tile in self.tiles.values_mut() {
            if !tile.announced {
                tile.announced = true;
                tile.movable.mark_dirty();
                self.outbox.push(Outbound::ToAll(ServerMessage::NewTile {
                    id: tile.id,
                    render_class: tile.render_class.clone(),
                    category: tile.category,
                }));
            }
            if tile.movable.take_dirty() {
                self.outbox
                    .push(Outbound::ToAll(ServerMessage::TileUpdate(tile.id, *tile.rect())));
            }
        }
    }

    /// Re-announces everything; the only full-state path.
    fn reload_all(&mut self) {
        for player in self.players.values_mut() {
            player.movable.take_dirty();
            self.outbox
                .push(Outbound::ToAll(ServerMessage::NewPlayer(player.id)));
            self.outbox.push(Outbound::ToAll(ServerMessage::PlayerUpdate(
                player.id,
                *player.rect(),
            )));
        }
        let tile_ids: Vec<TileId> = self.tiles.keys().copied().collect();
        for id in tile_ids {
            self.announce_tile(id);
        }
    }

    pub fn flush(&mut self, transport: &mut dyn Transport) {
        for outbound in self.outbox.drain(..) {
            match outbound {
                Outbound::ToPlayer(id, message) => transport.send_to(id, &message.to_string()),
                Outbound::ToAll(message) => transport.send_to_all(&message.to_string()),
                Outbound::Close(id) => transport.close(id),
            }
        }
    }

    pub fn take_outbox(&mut self) -> Vec<Outbound> {
        std::mem::take(&mut self.outbox)
    }
}
