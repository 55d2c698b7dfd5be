use super::*;

use crate::constants::{
    BOMB_GROW_AT_TICKS_LEFT, DIVER_TRIGGER_VELOCITY, KEY_JUMP, KEY_LEFT, KEY_RIGHT,
    PLAYER_GRACE_TICKS, PLAYER_JUMP_VELOCITY, PLAYER_RUN_IMPULSE,
};

/// -1, 0 or 1. Unlike `f64::signum`, zero stays zero.
fn direction(delta: f64) -> f64 {
    if delta > 0.0 {
        1.0
    } else if delta < 0.0 {
        -1.0
    } else {
        0.0
    }
}

impl World {
    pub(crate) fn update_player(&mut self, id: PlayerId) {
        self.step_physics(EntityRef::Player(id));

        let Some(player) = self.players.get_mut(&id) else {
            return;
        };
        let left = player.is_pressed(&KEY_LEFT);
        let right = player.is_pressed(&KEY_RIGHT);
        let jump = player.is_pressed(&KEY_JUMP);
        let Some(body) = player.movable.body.as_mut() else {
            return;
        };

        if left {
            body.velocity.x -= PLAYER_RUN_IMPULSE;
        }
        if right {
            body.velocity.x += PLAYER_RUN_IMPULSE;
        }
        if body.touching.bottom {
            player.grace_frames = PLAYER_GRACE_TICKS;
        }
        if jump && (body.touching.bottom || player.grace_frames > 0) {
            body.velocity.y = PLAYER_JUMP_VELOCITY;
            player.grace_frames = -1;
        }
        player.grace_frames -= 1;
    }

    pub(crate) fn update_tile(&mut self, id: TileId) {
        let Some(behavior) = self.tiles.get(&id).map(|tile| tile.behavior.clone()) else {
            return;
        };
        match behavior {
            TileBehavior::Static => {}
            TileBehavior::Patrol {
                follow_player,
                follower_friction,
                follower_speed,
            } => {
                self.step_physics(EntityRef::Tile(id));
                if follow_player {
                    self.pursue(id, follower_speed, follower_friction);
                }
            }
            TileBehavior::Diver { speed } => {
                self.step_physics(EntityRef::Tile(id));
                self.swoop(id, speed);
            }
            TileBehavior::Bomb {
                ticks_left,
                explosion_size,
            } => self.count_down(id, ticks_left, explosion_size),
        }
    }

    fn tile_body_mut(&mut self, id: TileId) -> Option<&mut Body> {
        self.tiles.get_mut(&id)?.movable.body.as_mut()
    }

    fn pursue(&mut self, id: TileId, speed: f64, friction: f64) {
        let Some(rect) = self.tile(id).map(|tile| *tile.rect()) else {
            return;
        };
        let Some((_, target)) = self.nearest_player(&rect, Reach::Horizontal) else {
            return;
        };
        let Some(body) = self.tile_body_mut(id) else {
            return;
        };
        body.velocity.x += speed * direction(target.x - rect.x);
        body.velocity.x *= friction;
    }

    fn swoop(&mut self, id: TileId, speed: f64) {
        let Some(rect) = self.tile(id).map(|tile| *tile.rect()) else {
            return;
        };
        let Some((_, target)) = self.nearest_player(&rect, Reach::Both) else {
            return;
        };
        let Some(body) = self.tile_body_mut(id) else {
            return;
        };

        let dist_x = (target.center_x() - rect.center_x()).abs();
        let pull = speed * 2.0 * (dist_x / 100.0);
        if target.x > rect.x {
            body.velocity.x += pull;
        } else {
            body.velocity.x -= pull;
        }
        if dist_x != 0.0 {
            body.velocity.y += (100.0 - dist_x) / (50.0 / speed) * direction(target.y - rect.y);
        }
    }

    fn count_down(&mut self, id: TileId, ticks_left: u32, explosion_size: f64) {
        let ticks_left = ticks_left.saturating_sub(1);
        let Some(tile) = self.tiles.get_mut(&id) else {
            return;
        };
        tile.behavior = TileBehavior::Bomb {
            ticks_left,
            explosion_size,
        };

        if ticks_left == BOMB_GROW_AT_TICKS_LEFT {
            let rect = *tile.rect();
            tile.movable.set_rect(Rect::new(
                rect.center_x() - explosion_size / 2.0,
                rect.center_y() - explosion_size / 2.0,
                explosion_size,
                explosion_size,
            ));
        }
        if ticks_left == 0 {
            let hits = self
                .check_entity(EntityRef::Tile(id))
                .map(|set| set.all().count())
                .unwrap_or_default();
            debug!(tile = %id, hits, tick = self.tick, "bomb exploded");
            self.delete_tile(id);
        }
    }

    /// Reaction to overlapping one of the entity's special categories.
    /// Returns the contacts that should also block movement on this pass.
    pub(crate) fn react_special(
        &mut self,
        who: EntityRef,
        category: Category,
        overlap: &Overlap,
        axis: Axis,
        previous: &Rect,
    ) -> Overlap {
        match who {
            EntityRef::Player(id) => self.player_touched(id, category, overlap, axis, previous),
            EntityRef::Tile(id) => {
                let (kills, eats_coins) = match self.tiles.get(&id).map(|tile| &tile.behavior) {
                    Some(TileBehavior::Patrol { .. }) => (true, true),
                    Some(TileBehavior::Diver { .. }) => (true, false),
                    _ => (false, false),
                };
                match category {
                    Category::Player if kills => self.kill_contacts(overlap),
                    Category::TenCoin | Category::FiftyCoin if eats_coins => {
                        self.delete_contacts(overlap);
                    }
                    _ => {}
                }
                Overlap::default()
            }
        }
    }

    fn player_touched(
        &mut self,
        id: PlayerId,
        category: Category,
        overlap: &Overlap,
        axis: Axis,
        previous: &Rect,
    ) -> Overlap {
        match category {
            Category::TenCoin | Category::FiftyCoin => {
                let collected = self.delete_contacts(overlap);
                if let Some(value) = category.coin_value().filter(|_| collected > 0) {
                    self.add_score(id, collected as i64 * value);
                }
                Overlap::default()
            }
            Category::JumpThrough => {
                let falling = self
                    .player(id)
                    .and_then(|player| player.movable.body.as_ref())
                    .is_some_and(|body| body.velocity.y > 0.0);
                if axis != Axis::Y || !falling {
                    return Overlap::default();
                }
                let bottom = previous.end(Axis::Y);
                Overlap {
                    contacts: overlap
                        .contacts
                        .iter()
                        .filter(|contact| bottom <= contact.rect.y)
                        .copied()
                        .collect(),
                }
            }
            Category::Hazard => {
                self.kill_player(id);
                Overlap::default()
            }
            _ => Overlap::default(),
        }
    }

    fn kill_contacts(&mut self, overlap: &Overlap) {
        for contact in &overlap.contacts {
            if let EntityRef::Player(player) = contact.who {
                self.kill_player(player);
            }
        }
    }

    fn delete_contacts(&mut self, overlap: &Overlap) -> usize {
        let mut deleted = 0;
        for contact in &overlap.contacts {
            if let EntityRef::Tile(tile) = contact.who {
                if self.delete_tile(tile) {
                    deleted += 1;
                }
            }
        }
        deleted
    }

    pub(crate) fn on_solid_collision(&mut self, who: EntityRef, axis: Axis) {
        let EntityRef::Tile(id) = who else {
            return;
        };
        let Some(tile) = self.tiles.get_mut(&id) else {
            return;
        };
        if !matches!(tile.behavior, TileBehavior::Patrol { .. }) || axis != Axis::X {
            return;
        }
        if let Some(body) = tile.movable.body.as_mut() {
            body.velocity.x *= -1.0;
        }
    }

    /// Developer trigger: divers drop a fresh diver just above `target`.
    pub(crate) fn trigger_special(&mut self, id: TileId, target: PlayerId) {
        let Some(tile) = self.tiles.get(&id) else {
            return;
        };
        if !matches!(tile.behavior, TileBehavior::Diver { .. }) {
            return;
        }
        let Some(rect) = self.player(target).map(|player| *player.rect()) else {
            return;
        };

        let spawned = self.create_special(
            rect.x / self.block_width,
            rect.y / self.block_height - 1.0,
            0.5,
            0.5,
            "lava",
            Category::Hazard,
            Special::Diver(DiverConfig {
                initial_yv: DIVER_TRIGGER_VELOCITY,
                ..DiverConfig::default()
            }),
        );
        self.announce_tile(spawned);
        debug!(tile = %id, spawned = %spawned, player = %target, "diver triggered");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{KEY_TRIGGER_SPECIALS, TEN_COIN_VALUE};
    use crate::engine::tests::{join, tick, RecordingTransport};
    use crate::protocol::ServerMessage;

    fn body_of(world: &World, who: EntityRef) -> Body {
        world
            .movable(who)
            .and_then(|movable| movable.body.clone())
            .expect("entity is dynamic")
    }

    #[test]
    fn patrol_reverses_once_per_wall_contact() {
        let mut world = World::new(50.0, 50.0);
        world.create_normal(0.0, 2.0, 10.0, 1.0);
        world.create_normal(4.0, 0.0, 1.0, 2.0);
        let patrol = world.create_special(
            2.0,
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

        let mut flips = 0;
        let mut last = body_of(&world, EntityRef::Tile(patrol)).velocity.x;
        for _ in 0..8 {
            world.update_tile(patrol);
            let xv = body_of(&world, EntityRef::Tile(patrol)).velocity.x;
            if xv.signum() != last.signum() {
                flips += 1;
            }
            last = xv;
        }
        assert_eq!(flips, 1);
        assert_eq!(last, -10.0);
        let rect = *world.tile(patrol).expect("patrol is alive").rect();
        assert!(rect.x + rect.width <= 200.0);
    }

    #[test]
    fn pursuing_patrol_steers_toward_player() {
        let mut world = World::new(50.0, 50.0);
        world.set_spawn_point(10.0, 0.0);
        world.connect_player();
        let patrol = world.create_special(
            0.0,
            0.0,
            1.0,
            1.0,
            "lava",
            Category::Hazard,
            Special::Patrol(PatrolConfig {
                x_speed: 0.0,
                follow_player: true,
                ..PatrolConfig::default()
            }),
        );
        world.update_tile(patrol);
        assert!(body_of(&world, EntityRef::Tile(patrol)).velocity.x > 0.0);
    }

    #[test]
    fn coin_pickup_removes_tile_and_scores_once() {
        let mut world = World::new(50.0, 50.0);
        world.create_normal(-2.0, 4.0, 16.0, 1.0);
        world.set_spawn_point(0.0, 2.0);
        let coin = world.create(1.0, 3.0, 1.0, 1.0, "coin", Category::TenCoin);
        let mut transport = RecordingTransport::default();
        let id = join(&mut world, &mut transport);
        transport.take(id);

        world.handle_message(id, ClientMessage::KeyDown(KEY_RIGHT[0]));
        for _ in 0..10 {
            tick(&mut world, &mut transport);
        }
        let messages = transport.take(id);
        assert!(world.tile(coin).is_none());
        assert!(messages.contains(&ServerMessage::RemoveTile(coin)));
        let scores: Vec<_> = messages
            .iter()
            .filter(|message| matches!(message, ServerMessage::Score(..)))
            .collect();
        assert_eq!(scores, vec![&ServerMessage::Score(id, TEN_COIN_VALUE)]);
    }

    #[test]
    fn hazard_contact_kills_and_closes() {
        let mut world = World::new(50.0, 50.0);
        world.create_normal(-2.0, 4.0, 16.0, 1.0);
        world.create(0.0, 3.0, 1.0, 1.0, "lava", Category::Hazard);
        world.set_spawn_point(0.0, 0.0);
        let mut transport = RecordingTransport::default();
        let victim = join(&mut world, &mut transport);
        let witness = join(&mut world, &mut transport);
        if let Some(player) = world.players.get_mut(&witness) {
            player.movable.set_rect(Rect::new(300.0, 100.0, 50.0, 100.0));
        }
        transport.take(witness);

        for _ in 0..20 {
            tick(&mut world, &mut transport);
        }
        assert!(!world.has_player(victim));
        assert!(transport.closed.contains(&victim));
        assert!(transport
            .take(witness)
            .contains(&ServerMessage::KillPlayer(victim)));
    }

    #[test]
    fn diver_level_with_player_stays_finite() {
        let mut world = World::new(50.0, 50.0);
        world.set_spawn_point(0.0, 0.0);
        world.connect_player();
        let diver = world.create_special(
            1.0,
            0.0,
            1.0,
            1.0,
            "lava",
            Category::Hazard,
            Special::Diver(DiverConfig::default()),
        );
        world.update_tile(diver);
        let body = body_of(&world, EntityRef::Tile(diver));
        assert!(body.velocity.x < 0.0);
        assert_eq!(body.velocity.y, 0.0);

        for _ in 0..20 {
            world.update_tile(diver);
        }
        let rect = *world.tile(diver).expect("diver is alive").rect();
        assert!(rect.x.is_finite() && rect.y.is_finite());
    }

    #[test]
    fn diver_drifts_toward_distant_player() {
        let mut world = World::new(50.0, 50.0);
        world.set_spawn_point(1.0, 4.0);
        world.connect_player();
        let diver = world.create_special(
            0.0,
            0.0,
            0.5,
            0.5,
            "lava",
            Category::Hazard,
            Special::Diver(DiverConfig::default()),
        );
        world.update_tile(diver);
        let body = body_of(&world, EntityRef::Tile(diver));
        assert!(body.velocity.x > 0.0);
        assert!(body.velocity.y > 0.0);
    }

    #[test]
    fn bomb_grows_around_its_centre_then_disappears() {
        let mut world = World::new(50.0, 50.0);
        let bomb = world.create_special(
            0.0,
            0.0,
            1.0,
            1.0,
            "bomb",
            Category::Bomb,
            Special::Bomb(BombConfig {
                ticks: 4,
                explosion_size: 400.0,
            }),
        );
        world.update_tile(bomb);
        world.update_tile(bomb);
        let rect = *world.tile(bomb).expect("bomb is armed").rect();
        assert_eq!(rect, Rect::new(-175.0, -175.0, 400.0, 400.0));

        world.update_tile(bomb);
        assert!(world.tile(bomb).is_some());
        world.update_tile(bomb);
        assert!(world.tile(bomb).is_none());
    }

    #[test]
    fn jump_allowed_during_grace_after_leaving_ground() {
        let mut world = World::new(50.0, 50.0);
        world.create_normal(-2.0, 4.0, 2.0, 1.0);
        world.set_spawn_point(-1.0, 2.0);
        let id = world.connect_player();

        world.update_player(id);
        assert!(body_of(&world, EntityRef::Player(id)).touching.bottom);

        if let Some(player) = world.players.get_mut(&id) {
            player.movable.set_rect(Rect::new(50.0, 100.0, 50.0, 100.0));
        }
        world.update_player(id);
        assert!(!body_of(&world, EntityRef::Player(id)).touching.bottom);

        world.handle_message(id, ClientMessage::KeyDown(KEY_JUMP[1]));
        world.update_player(id);
        assert_eq!(
            body_of(&world, EntityRef::Player(id)).velocity.y,
            PLAYER_JUMP_VELOCITY
        );
        assert_eq!(world.player(id).map(|player| player.grace_frames), Some(-2));
    }

    #[test]
    fn jump_through_catches_falling_players_only() {
        let mut world = World::new(50.0, 50.0);
        let platform = world.create(0.0, 3.0, 2.0, 1.0, "jumpthrough", Category::JumpThrough);
        world.set_spawn_point(0.0, 0.0);
        let id = world.connect_player();

        for _ in 0..30 {
            world.update_player(id);
        }
        let rect = *world.player(id).expect("player is alive").rect();
        assert_eq!(rect.y + rect.height, 150.0);
        assert!(world.tile(platform).is_some());

        if let Some(player) = world.players.get_mut(&id) {
            player.movable.set_rect(Rect::new(0.0, 150.0, 50.0, 100.0));
            if let Some(body) = player.movable.body.as_mut() {
                body.velocity.y = -30.0;
            }
        }
        world.update_player(id);
        assert!(world.player(id).expect("player is alive").rect().y < 150.0);
    }

    #[test]
    fn trigger_drops_a_hazard_diver_above_the_player() {
        let mut world = World::new(50.0, 50.0);
        let diver = world.create_special(
            5.0,
            -5.0,
            0.5,
            0.5,
            "lava",
            Category::Hazard,
            Special::Diver(DiverConfig::default()),
        );
        world.register_special(diver);
        world.set_spawn_point(2.0, 0.0);
        let mut transport = RecordingTransport::default();
        let id = join(&mut world, &mut transport);
        transport.take(id);

        world.handle_message(id, ClientMessage::KeyDown(KEY_TRIGGER_SPECIALS));
        world.flush(&mut transport);
        let messages = transport.take(id);
        let Some(ServerMessage::NewTile {
            id: spawned,
            render_class,
            category,
        }) = messages.first().cloned()
        else {
            panic!("expected a new tile, got {messages:?}");
        };
        assert_eq!(render_class, "lava");
        assert_eq!(category, Category::Hazard);
        assert_eq!(
            messages.get(1),
            Some(&ServerMessage::TileUpdate(
                spawned,
                Rect::new(100.0, -50.0, 25.0, 25.0)
            ))
        );
        assert_eq!(
            body_of(&world, EntityRef::Tile(spawned)).velocity.y,
            DIVER_TRIGGER_VELOCITY
        );
        assert_eq!(world.specials, vec![diver]);
    }
}
