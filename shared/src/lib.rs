pub mod data;
pub mod messages;

use serde::{Deserialize, Serialize};

/// Character bounding-box padding applied around obstacle segments when
/// rasterizing walkability grids. Horizontal half-width, vertical extent
/// below the anchor point, and vertical extent above it.
pub const BASE_H: i64 = 8;
pub const BASE_V: i64 = 7;
pub const BASE_VN: i64 = 2;

/// How close a node has to be to a door to use it.
pub const DOOR_REACH_DISTANCE: f64 = 40.0;
/// How close a node has to be to a transporter to use it.
pub const TRANSPORTER_REACH_DISTANCE: f64 = 75.0;
/// How close we have to be to an NPC to interact with it.
pub const NPC_INTERACTION_DISTANCE: f64 = 400.0;

/// Cost of taking a door, transporter, or map-leave action.
pub const TRANSPORT_COST: f64 = 50.0;
/// Cost of warping to town. Much more expensive than a short walk, much
/// cheaper than walking across a whole map.
pub const TOWN_COST: f64 = 500.0;

/// Rolling window of round-trip samples kept for latency estimation.
pub const MAX_PINGS: usize = 100;
pub const PING_EVERY_MS: u64 = 30_000;

/// Deadline for fast correlated commands (attack, equip, move, ...).
pub const TIMEOUT_MS: u64 = 1_000;
/// Deadline for slow correlated commands (upgrade, compound).
pub const SLOW_TIMEOUT_MS: u64 = 60_000;
/// Deadline for the connect handshake.
pub const CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Monster types rare enough to be worth recording in the sighting store.
pub const SPECIAL_MONSTERS: &[&str] = &[
    "fvampire", "goldenbat", "greenjr", "jr", "mvampire", "phoenix", "pinkgoo", "snowman",
    "wabbit",
];

/// A point on a named map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub map: String,
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(map: impl Into<String>, x: f64, y: f64) -> Self {
        Self {
            map: map.into(),
            x,
            y,
        }
    }

    /// Euclidean distance ignoring the map. Callers are responsible for
    /// only comparing positions on the same map.
    pub fn distance(&self, other: &Position) -> f64 {
        distance(self.x, self.y, other.x, other.y)
    }
}

pub fn distance(ax: f64, ay: f64, bx: f64, by: f64) -> f64 {
    let dx = bx - ax;
    let dy = by - ay;
    (dx * dx + dy * dy).sqrt()
}
