use super::World;
use crate::types::{Axis, Category, EntityRef, Rect};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Contact {
    pub who: EntityRef,
    pub rect: Rect,
}

/// Overlapping entities of a single category.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Overlap {
    pub contacts: Vec<Contact>,
}

impl Overlap {
    pub fn count(&self) -> usize {
        self.contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }

    fn push(&mut self, contact: Contact) {
        self.contacts.push(contact);
    }

    pub(crate) fn extend_from(&mut self, other: &Overlap) {
        self.contacts.extend_from_slice(&other.contacts);
    }

    pub fn min_start(&self, axis: Axis) -> Option<f64> {
        self.contacts
            .iter()
            .map(|contact| contact.rect.start(axis))
            .reduce(f64::min)
    }

    pub fn max_end(&self, axis: Axis) -> Option<f64> {
        self.contacts
            .iter()
            .map(|contact| contact.rect.end(axis))
            .reduce(f64::max)
    }
}

/// Overlaps bucketed by category, plus the aggregate over every bucket.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CollisionSet {
    buckets: [Overlap; Category::COUNT],
    all: Overlap,
}

impl CollisionSet {
    pub fn get(&self, category: Category) -> &Overlap {
        &self.buckets[category.index()]
    }

    pub fn all(&self) -> &Overlap {
        &self.all
    }

    fn record(&mut self, category: Category, contact: Contact) {
        self.buckets[category.index()].push(contact);
        self.all.push(contact);
    }
}

impl World {
    /// Classifies everything overlapping `rect`. Tiles never collide with
    /// themselves; live players are always tested.
    pub fn check_collision(&self, rect: &Rect, exclude: Option<EntityRef>) -> CollisionSet {
        let mut set = CollisionSet::default();
        for tile in self.tiles.values() {
            if exclude == Some(EntityRef::Tile(tile.id)) {
                continue;
            }
            if tile.rect().overlaps(rect) {
                set.record(
                    tile.category,
                    Contact {
                        who: EntityRef::Tile(tile.id),
                        rect: *tile.rect(),
                    },
                );
            }
        }
        for player in self.players.values() {
            if player.rect().overlaps(rect) {
                set.record(
                    Category::Player,
                    Contact {
                        who: EntityRef::Player(player.id),
                        rect: *player.rect(),
                    },
                );
            }
        }
        set
    }

    pub fn check_entity(&self, who: EntityRef) -> Option<CollisionSet> {
        let rect = *self.movable(who)?.rect();
        Some(self.check_collision(&rect, Some(who)))
    }

    pub fn overlaps_anything(&self, rect: &Rect) -> bool {
        !self.check_collision(rect, None).all().is_empty()
    }
}
