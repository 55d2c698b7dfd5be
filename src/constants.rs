pub const TICK_MS: u64 = 20;

pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_BLOCK_SIZE: f64 = 50.0;

pub const DEFAULT_GRAVITY: (f64, f64) = (0.0, 1.0);
pub const DEFAULT_FRICTION: (f64, f64) = (0.8, 1.0);

pub const PLAYER_RUN_IMPULSE: f64 = 3.0;
pub const PLAYER_JUMP_VELOCITY: f64 = -20.0;
pub const PLAYER_GRACE_TICKS: i32 = 10;
pub const TEN_COIN_VALUE: i64 = 10;
pub const FIFTY_COIN_VALUE: i64 = 50;

pub const KEY_LEFT: [u32; 2] = [37, 65];
pub const KEY_RIGHT: [u32; 2] = [39, 68];
pub const KEY_JUMP: [u32; 2] = [38, 87];
pub const KEY_TRIGGER_SPECIALS: u32 = 83;
pub const KEY_RESPAWN: u32 = 67;

pub const PATROL_DEFAULT_SPEED: f64 = 5.0;
pub const PATROL_DEFAULT_FOLLOWER_FRICTION: f64 = 0.9;
pub const PATROL_DEFAULT_FOLLOWER_SPEED: f64 = 1.0;

pub const DIVER_DEFAULT_FRICTION: f64 = 0.9;
pub const DIVER_DEFAULT_SPEED: f64 = 0.65;
pub const DIVER_TRIGGER_VELOCITY: f64 = -5.0;

pub const BOMB_DEFAULT_TICKS: u32 = 100;
pub const BOMB_DEFAULT_EXPLOSION_SIZE: f64 = 400.0;
pub const BOMB_GROW_AT_TICKS_LEFT: u32 = 2;

pub const COIN_SPAWN_CHANCE: f64 = 0.1;
pub const FIFTY_COIN_CHANCE: f64 = 0.1;
