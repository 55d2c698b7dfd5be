use super::*;

impl World {
    /// Integrates one dynamic entity and resolves it against the world, X
    /// first, then Y. Stops early if a collision hook removed the entity.
    /// The entity is only marked dirty when its rect ends up elsewhere.
    pub(crate) fn step_physics(&mut self, who: EntityRef) {
        let Some(movable) = self.movable_mut(who) else {
            return;
        };
        let before = *movable.rect();
        let Some(body) = movable.body.as_mut() else {
            return;
        };
        body.integrate();

        for axis in [Axis::X, Axis::Y] {
            if !self.resolve_axis(who, axis) {
                return;
            }
        }

        if let Some(movable) = self.movable_mut(who) {
            if *movable.rect() != before {
                movable.mark_dirty();
            }
        }
    }

    /// Returns false once the entity no longer exists.
    fn resolve_axis(&mut self, who: EntityRef, axis: Axis) -> bool {
        let Some(movable) = self.movable_mut(who) else {
            return false;
        };
        let previous = *movable.rect();
        let Some(body) = movable.body.as_mut() else {
            return true;
        };
        body.touching.clear(axis);
        let velocity = body.velocity.get(axis);
        match axis {
            Axis::X => movable.translate(velocity, 0.0),
            Axis::Y => movable.translate(0.0, velocity),
        }

        let Some(blocking) = self.blocking_overlap(who, axis, &previous) else {
            return false;
        };
        if blocking.is_empty() {
            return true;
        }

        let Some(movable) = self.movable_mut(who) else {
            return false;
        };
        let size = movable.rect().size(axis);
        let Some(body) = movable.body.as_mut() else {
            return true;
        };
        if body.velocity.get(axis) == 0.0 {
            body.velocity.set(axis, 1.0);
        }
        let forward = body.velocity.get(axis) > 0.0;
        body.touching.mark(axis, forward);
        if body.stop_when_hit.get(axis) {
            body.velocity.set(axis, 0.0);
        }
        let target = if forward {
            blocking.min_start(axis).map(|start| start - size)
        } else {
            blocking.max_end(axis)
        };
        if let Some(target) = target {
            movable.set_start(axis, target);
        }

        self.on_solid_collision(who, axis);
        self.movable(who).is_some()
    }

    /// Everything the entity may not overlap on this pass: its blocking
    /// categories plus whatever the special hooks decided should block.
    /// `None` when a hook removed the entity.
    fn blocking_overlap(&mut self, who: EntityRef, axis: Axis, previous: &Rect) -> Option<Overlap> {
        let set = self.check_entity(who)?;
        let body = self.movable(who)?.body.as_ref()?;

        let mut blocking = Overlap::default();
        for category in &body.collisions {
            blocking.extend_from(&without(set.get(*category), who));
        }

        let specials = body.special_collisions.clone();
        for category in specials {
            let overlap = without(set.get(category), who);
            if overlap.is_empty() {
                continue;
            }
            let blocks = self.react_special(who, category, &overlap, axis, previous);
            self.movable(who)?;
            blocking.extend_from(&blocks);
        }
        Some(blocking)
    }
}

fn without(overlap: &Overlap, who: EntityRef) -> Overlap {
    Overlap {
        contacts: overlap
            .contacts
            .iter()
            .filter(|contact| contact.who != who)
            .copied()
            .collect(),
    }
}
