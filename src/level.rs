//! Level content: builds the initial layout and runs once per tick after
//! the world has applied its deltas.

use tracing::debug;

use crate::constants::{COIN_SPAWN_CHANCE, FIFTY_COIN_CHANCE};
use crate::engine::{BombConfig, DiverConfig, PatrolConfig, Special, World};
use crate::rng::Rng;
use crate::types::{Category, Rect};

pub trait Level: Send {
    fn build(&mut self, world: &mut World);
    fn run(&mut self, world: &mut World);
}

/// No layout and no per-tick behavior.
#[derive(Clone, Copy, Debug, Default)]
pub struct EmptyLevel;

impl Level for EmptyLevel {
    fn build(&mut self, _world: &mut World) {}

    fn run(&mut self, _world: &mut World) {}
}

/// Walled floor with a few ledges; coins keep appearing in free cells.
#[derive(Clone, Debug)]
pub struct FirstLevel {
    rng: Rng,
}

impl FirstLevel {
    pub fn new(seed: u32) -> Self {
        Self {
            rng: Rng::new(seed),
        }
    }

    fn layout(world: &mut World) {
        world.create_normal(-2.0, 0.0, 1.0, 4.0);
        world.create_normal(-2.0, 4.0, 16.0, 1.0);
        world.create_normal(13.0, 2.0, 1.0, 1.0);
        world.create_normal(-1.0, 2.0, 1.0, 1.0);
        world.create_normal(12.0, -3.0, 4.0, 1.0);
        world.create_normal(2.0, -3.0, 1.0, 3.0);
        world.create_normal(4.0, -4.0, 1.0, 3.0);
        world.create_normal(14.0, 0.0, 1.0, 5.0);
        world.set_spawn_point(-2.0, -4.0);
    }

    fn spawn_coin(&mut self, world: &mut World) {
        if !self.rng.chance(COIN_SPAWN_CHANCE) {
            return;
        }
        let bounds = world.bounds();
        let x = self.rng.grid(bounds.x1, bounds.x2 - bounds.x1 - 1.0);
        let y = self.rng.grid(bounds.y1, bounds.y2 - bounds.y1 - 1.0);
        let category = if self.rng.chance(FIFTY_COIN_CHANCE) {
            Category::FiftyCoin
        } else {
            Category::TenCoin
        };

        let (block_width, block_height) = world.block_size();
        let cell = Rect::new(x * block_width, y * block_height, block_width, block_height);
        if world.overlaps_anything(&cell) {
            return;
        }
        let id = world.spawn(x, y, 1.0, 1.0, "coin", category);
        debug!(tile = %id, x, y, %category, "coin spawned");
    }
}

impl Level for FirstLevel {
    fn build(&mut self, world: &mut World) {
        Self::layout(world);
    }

    fn run(&mut self, world: &mut World) {
        self.spawn_coin(world);
    }
}

/// The first level plus one of every enemy and a pass-through ledge.
#[derive(Clone, Debug)]
pub struct PlaygroundLevel {
    inner: FirstLevel,
}

impl PlaygroundLevel {
    pub fn new(seed: u32) -> Self {
        Self {
            inner: FirstLevel::new(seed),
        }
    }
}

impl Level for PlaygroundLevel {
    fn build(&mut self, world: &mut World) {
        FirstLevel::layout(world);
        world.create(0.0, -2.0, 2.0, 1.0, "jumpthrough", Category::JumpThrough);
        world.create_special(
            3.0,
            1.0,
            1.0,
            1.0,
            "lava",
            Category::Hazard,
            Special::Patrol(PatrolConfig {
                x_speed: 10.0,
                ..PatrolConfig::default()
            }),
        );
        let diver = world.create_special(
            12.0,
            -5.0,
            0.5,
            0.5,
            "lava",
            Category::Hazard,
            Special::Diver(DiverConfig::default()),
        );
        world.register_special(diver);
        world.create_special(
            5.0,
            -5.0,
            1.0,
            1.0,
            "bomb",
            Category::Bomb,
            Special::Bomb(BombConfig {
                ticks: 500,
                ..BombConfig::default()
            }),
        );
    }

    fn run(&mut self, world: &mut World) {
        self.inner.run(world);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_level_layout_and_spawn() {
        let mut world = World::new(50.0, 50.0);
        FirstLevel::new(1).build(&mut world);
        assert_eq!(world.tiles().count(), 8);
        assert!(world
            .tiles()
            .all(|tile| tile.category == Category::Solid && tile.render_class == "normal"));
        assert_eq!((world.spawn_point().x, world.spawn_point().y), (-100.0, -200.0));
        let bounds = world.bounds();
        assert_eq!(
            (bounds.x1, bounds.y1, bounds.x2, bounds.y2),
            (-2.0, -4.0, 16.0, 5.0)
        );
    }

    #[test]
    fn coins_only_appear_in_free_cells() {
        let mut world = World::new(50.0, 50.0);
        let mut level = FirstLevel::new(2024);
        level.build(&mut world);
        for _ in 0..2_000 {
            level.run(&mut world);
        }

        let coins: Vec<_> = world
            .tiles()
            .filter(|tile| tile.category.coin_value().is_some())
            .collect();
        assert!(!coins.is_empty());
        for coin in &coins {
            let set = world.check_collision(coin.rect(), Some(crate::types::EntityRef::Tile(coin.id)));
            assert!(set.all().is_empty(), "coin {} overlaps something", coin.id);
            let bounds = world.bounds();
            assert!(coin.rect().x >= bounds.x1 * 50.0 && coin.rect().x < bounds.x2 * 50.0);
        }
    }

    #[test]
    fn coins_follow_a_fractional_left_edge() {
        let mut world = World::new(50.0, 50.0);
        let mut level = FirstLevel::new(31);
        level.build(&mut world);
        world.create(-2.5, -6.0, 0.5, 0.5, "lava", Category::Hazard);
        for _ in 0..3_000 {
            level.run(&mut world);
        }

        let columns: Vec<f64> = world
            .tiles()
            .filter(|tile| tile.category.coin_value().is_some())
            .map(|tile| tile.rect().x / 50.0)
            .collect();
        assert!(!columns.is_empty());
        assert!(columns.iter().all(|x| (x + 2.5).fract() == 0.0));
        assert!(columns.iter().all(|x| (-2.5..16.0).contains(x)));
    }

    #[test]
    fn coin_spawning_replays_with_the_same_seed() {
        let positions = |seed| {
            let mut world = World::new(50.0, 50.0);
            let mut level = FirstLevel::new(seed);
            level.build(&mut world);
            for _ in 0..500 {
                level.run(&mut world);
            }
            world.tiles().map(|tile| *tile.rect()).collect::<Vec<_>>()
        };
        assert_eq!(positions(9), positions(9));
    }

    #[test]
    fn playground_registers_its_diver() {
        let mut world = World::new(50.0, 50.0);
        PlaygroundLevel::new(3).build(&mut world);
        assert_eq!(world.tiles().count(), 12);
        assert!(world
            .tiles()
            .any(|tile| tile.category == Category::JumpThrough));
    }
}
