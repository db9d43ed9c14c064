//! Types for the static reference dataset the server publishes.
//!
//! The dataset is fetched out of band, deserialized once at startup, and
//! injected into every component as an `Arc<GameData>`. Nothing in here is
//! ever mutated mid-run.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// An axis-aligned obstacle segment. For `y_lines` the fields are
/// (y, x_from, x_to); for `x_lines` they are (x, y_from, y_to).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Segment {
    pub at: i64,
    pub from: i64,
    pub to: i64,
}

/// Per-map bounding box and obstacle segments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapGeometry {
    pub min_x: i64,
    pub min_y: i64,
    pub max_x: i64,
    pub max_y: i64,
    #[serde(default)]
    pub x_lines: Vec<Segment>,
    #[serde(default)]
    pub y_lines: Vec<Segment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpawnPoint {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub facing: Option<f64>,
}

/// A door between two maps. `width`/`height` are the full extents of the
/// clickable area around (`x`, `y`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Door {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    /// Destination map.
    pub map: String,
    /// Spawn index on the destination map.
    pub spawn: usize,
    /// Spawn index next to the door on this map.
    pub near_spawn: usize,
    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub requires_key: bool,
}

impl Door {
    /// Distance from a point to the closest corner of the door area.
    pub fn distance_from(&self, x: f64, y: f64) -> f64 {
        let mut closest = f64::MAX;
        for cx in [self.x - self.width / 2.0, self.x + self.width / 2.0] {
            for cy in [self.y - self.height / 2.0, self.y + self.height / 2.0] {
                let d = crate::distance(x, y, cx, cy);
                if d < closest {
                    closest = d;
                }
            }
        }
        closest
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NpcPlacement {
    pub id: String,
    pub x: f64,
    pub y: f64,
}

/// Where a monster type spawns on a map (center of its roaming area).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonsterPlacement {
    pub kind: String,
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MapData {
    #[serde(default)]
    pub spawns: Vec<SpawnPoint>,
    #[serde(default)]
    pub doors: Vec<Door>,
    #[serde(default)]
    pub npcs: Vec<NpcPlacement>,
    #[serde(default)]
    pub monsters: Vec<MonsterPlacement>,
    /// Maps flagged `ignore` are never prepared or searched.
    #[serde(default)]
    pub ignore: bool,
    /// Dead-end maps that can only be exited with the "leave" action.
    #[serde(default)]
    pub leave: bool,
    /// Whether combat against other players is enabled here.
    #[serde(default)]
    pub pvp: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonsterData {
    pub hp: f64,
    pub mp: f64,
    pub speed: f64,
    pub attack: f64,
    pub range: f64,
    #[serde(default)]
    pub frequency: f64,
    #[serde(default)]
    pub xp: f64,
    #[serde(default)]
    pub damage_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillData {
    /// Mana cost, if the skill has one.
    #[serde(default)]
    pub mp: Option<f64>,
    /// Cooldown in milliseconds.
    #[serde(default)]
    pub cooldown: Option<f64>,
    /// Minimum character level.
    #[serde(default)]
    pub level: Option<u32>,
    /// Classes allowed to use the skill; `None` means everyone.
    #[serde(default)]
    pub class: Option<Vec<String>>,
    /// Acceptable main-hand weapon types.
    #[serde(default)]
    pub wtype: Option<Vec<String>>,
    /// Items that must be equipped in specific slots, as (slot, item).
    #[serde(default)]
    pub slot: Option<Vec<(String, String)>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemData {
    /// Base gold value.
    pub g: f64,
    /// Maximum stack size; `None` for unstackable items.
    #[serde(default)]
    pub s: Option<u32>,
    #[serde(default)]
    pub upgrade: bool,
    #[serde(default)]
    pub compound: bool,
    /// Whether any NPC sells this item.
    #[serde(default)]
    pub buy: bool,
    #[serde(default)]
    pub wtype: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NpcData {
    /// For the transporter: destination map -> spawn index.
    #[serde(default)]
    pub places: Option<HashMap<String, usize>>,
    /// Items this NPC sells.
    #[serde(default)]
    pub items: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassData {
    pub damage_type: String,
    #[serde(default)]
    pub main_stat: Option<String>,
}

/// The full reference dataset, keyed by category.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GameData {
    pub geometry: HashMap<String, MapGeometry>,
    pub maps: HashMap<String, MapData>,
    #[serde(default)]
    pub monsters: HashMap<String, MonsterData>,
    #[serde(default)]
    pub skills: HashMap<String, SkillData>,
    #[serde(default)]
    pub items: HashMap<String, ItemData>,
    #[serde(default)]
    pub npcs: HashMap<String, NpcData>,
    #[serde(default)]
    pub classes: HashMap<String, ClassData>,
}

impl GameData {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn geometry(&self, map: &str) -> Option<&MapGeometry> {
        self.geometry.get(map)
    }

    pub fn map(&self, map: &str) -> Option<&MapData> {
        self.maps.get(map)
    }

    /// The map's primary spawn, which is also where town warps land.
    pub fn primary_spawn(&self, map: &str) -> Option<&SpawnPoint> {
        self.maps.get(map).and_then(|m| m.spawns.first())
    }

    pub fn spawn(&self, map: &str, index: usize) -> Option<&SpawnPoint> {
        self.maps.get(map).and_then(|m| m.spawns.get(index))
    }

    /// Destination table of the transporter network: map -> spawn index.
    pub fn transporter_places(&self) -> Option<&HashMap<String, usize>> {
        self.npcs.get("transporter").and_then(|n| n.places.as_ref())
    }

    /// The closest spawn on `map` to the given point.
    pub fn closest_spawn(&self, map: &str, x: f64, y: f64) -> Option<(usize, &SpawnPoint)> {
        let spawns = &self.maps.get(map)?.spawns;
        let mut best: Option<(usize, &SpawnPoint)> = None;
        let mut best_distance = f64::MAX;
        for (i, spawn) in spawns.iter().enumerate() {
            let d = crate::distance(x, y, spawn.x, spawn.y);
            if d < best_distance {
                best_distance = d;
                best = Some((i, spawn));
            }
        }
        best
    }
}
