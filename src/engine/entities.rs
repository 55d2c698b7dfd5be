use std::collections::HashSet;

use crate::constants::{
    BOMB_DEFAULT_EXPLOSION_SIZE, BOMB_DEFAULT_TICKS, DEFAULT_FRICTION, DEFAULT_GRAVITY,
    DIVER_DEFAULT_FRICTION, DIVER_DEFAULT_SPEED, PATROL_DEFAULT_FOLLOWER_FRICTION,
    PATROL_DEFAULT_FOLLOWER_SPEED, PATROL_DEFAULT_SPEED,
};
use crate::types::{Axis, Category, PlayerId, Rect, TileId, Touching, Vec2};

/// Per-axis "zero the velocity on contact" policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StopWhenHit {
    pub x: bool,
    pub y: bool,
}

impl StopWhenHit {
    pub fn get(&self, axis: Axis) -> bool {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
        }
    }
}

/// Physics state; only dynamic entities carry one.
#[derive(Clone, Debug, PartialEq)]
pub struct Body {
    pub velocity: Vec2,
    pub gravity: Vec2,
    pub friction: Vec2,
    pub touching: Touching,
    pub stop_when_hit: StopWhenHit,
    pub collisions: Vec<Category>,
    pub special_collisions: Vec<Category>,
}

impl Default for Body {
    fn default() -> Self {
        Self {
            velocity: Vec2::default(),
            gravity: Vec2::new(DEFAULT_GRAVITY.0, DEFAULT_GRAVITY.1),
            friction: Vec2::new(DEFAULT_FRICTION.0, DEFAULT_FRICTION.1),
            touching: Touching::default(),
            stop_when_hit: StopWhenHit { x: true, y: true },
            collisions: vec![Category::Solid],
            special_collisions: Vec::new(),
        }
    }
}

impl Body {
    pub fn integrate(&mut self) {
        self.velocity.x += self.gravity.x;
        self.velocity.y += self.gravity.y;
        self.velocity.x *= self.friction.x;
        self.velocity.y *= self.friction.y;
    }
}

/// Position, size and optional physics shared by tiles and players.
#[derive(Clone, Debug)]
pub struct Movable {
    rect: Rect,
    pub body: Option<Body>,
    dirty: bool,
}

impl Movable {
    pub fn new(rect: Rect, body: Option<Body>) -> Self {
        Self {
            rect,
            body,
            dirty: true,
        }
    }

    pub fn rect(&self) -> &Rect {
        &self.rect
    }

    pub fn is_dynamic(&self) -> bool {
        self.body.is_some()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub(crate) fn take_dirty(&mut self) -> bool {
        std::mem::replace(&mut self.dirty, false)
    }

    /// Physics moves leave the dirty flag alone; the step compares the
    /// rect before and after instead.
    pub(crate) fn translate(&mut self, dx: f64, dy: f64) {
        self.rect.x += dx;
        self.rect.y += dy;
    }

    pub(crate) fn set_start(&mut self, axis: Axis, value: f64) {
        match axis {
            Axis::X => self.rect.x = value,
            Axis::Y => self.rect.y = value,
        }
    }

    pub fn set_rect(&mut self, rect: Rect) {
        if self.rect != rect {
            self.rect = rect;
            self.dirty = true;
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PatrolConfig {
    pub x_speed: f64,
    pub follow_player: bool,
    pub follower_friction: f64,
    pub follower_speed: f64,
}

impl Default for PatrolConfig {
    fn default() -> Self {
        Self {
            x_speed: PATROL_DEFAULT_SPEED,
            follow_player: false,
            follower_friction: PATROL_DEFAULT_FOLLOWER_FRICTION,
            follower_speed: PATROL_DEFAULT_FOLLOWER_SPEED,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DiverConfig {
    pub initial_yv: f64,
    pub friction: f64,
    pub speed: f64,
}

impl Default for DiverConfig {
    fn default() -> Self {
        Self {
            initial_yv: 0.0,
            friction: DIVER_DEFAULT_FRICTION,
            speed: DIVER_DEFAULT_SPEED,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct BombConfig {
    pub ticks: u32,
    pub explosion_size: f64,
}

impl Default for BombConfig {
    fn default() -> Self {
        Self {
            ticks: BOMB_DEFAULT_TICKS,
            explosion_size: BOMB_DEFAULT_EXPLOSION_SIZE,
        }
    }
}

/// What a level asks for when placing a non-static tile.
#[derive(Clone, Debug, PartialEq)]
pub enum Special {
    Patrol(PatrolConfig),
    Diver(DiverConfig),
    Bomb(BombConfig),
}

/// Live per-variant state of a tile.
#[derive(Clone, Debug, PartialEq)]
pub enum TileBehavior {
    Static,
    Patrol {
        follow_player: bool,
        follower_friction: f64,
        follower_speed: f64,
    },
    Diver {
        speed: f64,
    },
    Bomb {
        ticks_left: u32,
        explosion_size: f64,
    },
}

impl Special {
    /// Builds the physics body and behavior state for this variant.
    pub(crate) fn instantiate(self) -> (Option<Body>, TileBehavior) {
        match self {
            Special::Patrol(config) => {
                let mut body = Body::default();
                body.velocity.x = config.x_speed;
                if !config.follow_player {
                    body.friction.x = 1.0;
                    body.stop_when_hit.x = false;
                }
                body.collisions.push(Category::Player);
                body.special_collisions.extend([
                    Category::Player,
                    Category::TenCoin,
                    Category::FiftyCoin,
                ]);
                (
                    Some(body),
                    TileBehavior::Patrol {
                        follow_player: config.follow_player,
                        follower_friction: config.follower_friction,
                        follower_speed: config.follower_speed,
                    },
                )
            }
            Special::Diver(config) => {
                let body = Body {
                    velocity: Vec2::new(0.0, config.initial_yv),
                    gravity: Vec2::default(),
                    friction: Vec2::new(config.friction, config.friction),
                    special_collisions: vec![Category::Player],
                    ..Body::default()
                };
                (
                    Some(body),
                    TileBehavior::Diver {
                        speed: config.speed,
                    },
                )
            }
            Special::Bomb(config) => (
                None,
                TileBehavior::Bomb {
                    ticks_left: config.ticks,
                    explosion_size: config.explosion_size,
                },
            ),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Tile {
    pub id: TileId,
    pub render_class: String,
    pub category: Category,
    pub movable: Movable,
    pub behavior: TileBehavior,
    pub(crate) announced: bool,
}

impl Tile {
    pub(crate) fn new(
        id: TileId,
        render_class: &str,
        category: Category,
        rect: Rect,
        body: Option<Body>,
        behavior: TileBehavior,
    ) -> Self {
        Self {
            id,
            render_class: sanitize_render_class(render_class),
            category,
            movable: Movable::new(rect, body),
            behavior,
            announced: false,
        }
    }

    pub fn rect(&self) -> &Rect {
        self.movable.rect()
    }
}

#[derive(Clone, Debug)]
pub struct Player {
    pub id: PlayerId,
    pub movable: Movable,
    pub(crate) keys_down: HashSet<u32>,
    score: i64,
    pub(crate) grace_frames: i32,
    pub(crate) initialized: bool,
}

impl Player {
    pub(crate) fn new(id: PlayerId, rect: Rect) -> Self {
        let mut body = Body::default();
        body.special_collisions.extend([
            Category::TenCoin,
            Category::FiftyCoin,
            Category::JumpThrough,
            Category::Hazard,
        ]);
        Self {
            id,
            movable: Movable::new(rect, Some(body)),
            keys_down: HashSet::new(),
            score: 0,
            grace_frames: 0,
            initialized: false,
        }
    }

    pub fn rect(&self) -> &Rect {
        self.movable.rect()
    }

    pub fn score(&self) -> i64 {
        self.score
    }

    /// Only the registry may assign, because every assignment must broadcast.
    pub(crate) fn set_score(&mut self, score: i64) {
        self.score = score;
    }

    pub fn is_pressed(&self, keys: &[u32]) -> bool {
        keys.iter().any(|key| self.keys_down.contains(key))
    }
}

/// Render classes travel as a single protocol token.
fn sanitize_render_class(value: &str) -> String {
    let joined = value.split_whitespace().collect::<Vec<_>>().join("-");
    if joined.is_empty() {
        return "normal".to_string();
    }
    joined
}
