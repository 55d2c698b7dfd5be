use std::fmt;

use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TileId(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PlayerId(pub u64);

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Non-owning handle to anything the registry stores.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntityRef {
    Tile(TileId),
    Player(PlayerId),
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Vec2 {
    pub x: f64,
    pub y: f64,
}

impl Vec2 {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn get(&self, axis: Axis) -> f64 {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
        }
    }

    pub fn set(&mut self, axis: Axis, value: f64) {
        match axis {
            Axis::X => self.x = value,
            Axis::Y => self.y = value,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Strict intersection: touching edges do not overlap.
    pub fn overlaps(&self, other: &Rect) -> bool {
        other.x + other.width > self.x
            && other.x < self.x + self.width
            && other.y + other.height > self.y
            && other.y < self.y + self.height
    }

    pub fn center_x(&self) -> f64 {
        self.x + self.width / 2.0
    }

    pub fn center_y(&self) -> f64 {
        self.y + self.height / 2.0
    }

    pub fn start(&self, axis: Axis) -> f64 {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
        }
    }

    pub fn end(&self, axis: Axis) -> f64 {
        match axis {
            Axis::X => self.x + self.width,
            Axis::Y => self.y + self.height,
        }
    }

    pub fn size(&self, axis: Axis) -> f64 {
        match axis {
            Axis::X => self.width,
            Axis::Y => self.height,
        }
    }
}

/// Semantic tile category. `Player` is reserved for players and only shows
/// up in collision sets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Category {
    Solid,
    Hazard,
    TenCoin,
    FiftyCoin,
    JumpThrough,
    Bomb,
    Custom,
    Player,
}

impl Category {
    pub const COUNT: usize = 8;

    pub const ALL: [Category; Category::COUNT] = [
        Category::Solid,
        Category::Hazard,
        Category::TenCoin,
        Category::FiftyCoin,
        Category::JumpThrough,
        Category::Bomb,
        Category::Custom,
        Category::Player,
    ];

    pub fn wire_name(self) -> &'static str {
        match self {
            Category::Solid => "solid",
            Category::Hazard => "killu",
            Category::TenCoin => "tencoin",
            Category::FiftyCoin => "fiftycoin",
            Category::JumpThrough => "jumpthrough",
            Category::Bomb => "bomb",
            Category::Custom => "custom",
            Category::Player => "player",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|category| category.wire_name() == value)
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }

    /// Points granted per coin, `None` for anything that is not a coin.
    pub fn coin_value(self) -> Option<i64> {
        match self {
            Category::TenCoin => Some(crate::constants::TEN_COIN_VALUE),
            Category::FiftyCoin => Some(crate::constants::FIFTY_COIN_VALUE),
            _ => None,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Touching {
    pub left: bool,
    pub right: bool,
    pub top: bool,
    pub bottom: bool,
}

impl Touching {
    pub(crate) fn clear(&mut self, axis: Axis) {
        match axis {
            Axis::X => {
                self.left = false;
                self.right = false;
            }
            Axis::Y => {
                self.top = false;
                self.bottom = false;
            }
        }
    }

    /// Marks the side hit while moving along `axis`; `forward` is the positive direction.
    pub(crate) fn mark(&mut self, axis: Axis, forward: bool) {
        match (axis, forward) {
            (Axis::X, true) => self.right = true,
            (Axis::X, false) => self.left = true,
            (Axis::Y, true) => self.bottom = true,
            (Axis::Y, false) => self.top = true,
        }
    }
}

/// Running min/max rectangle of every grid placement, in grid units.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Extent {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl Default for Extent {
    fn default() -> Self {
        Self {
            x1: 0.0,
            y1: 0.0,
            x2: 1.0,
            y2: 1.0,
        }
    }
}

impl Extent {
    pub fn include(&mut self, x: f64, y: f64, width: f64, height: f64) {
        self.x1 = self.x1.min(x);
        self.y1 = self.y1.min(y);
        self.x2 = self.x2.max(x + width);
        self.y2 = self.y2.max(y + height);
    }
}
