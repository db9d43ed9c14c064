//! Cross-session sighting store.
//!
//! Sessions publish where they last saw rare monsters and other characters
//! so that other sessions (possibly in other processes) can coordinate.
//! The store is an at-least-recently-consistent keyed lookup, never a
//! strong consistency source; consumers must tolerate stale entries.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntitySighting {
    pub kind: String,
    pub id: Option<String>,
    pub server: String,
    pub map: String,
    pub x: f64,
    pub y: f64,
    pub hp: Option<f64>,
    pub target: Option<String>,
    pub last_seen_ms: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerSighting {
    pub name: String,
    pub server: String,
    pub map: String,
    pub x: f64,
    pub y: f64,
    pub last_seen_ms: u64,
}

pub trait SightingStore: Send + Sync {
    fn record_entity(&self, sighting: EntitySighting);
    fn remove_entity(&self, kind: &str, server: &str);
    fn entity(&self, kind: &str, server: &str) -> Option<EntitySighting>;
    fn record_player(&self, sighting: PlayerSighting);
    fn player(&self, name: &str) -> Option<PlayerSighting>;
}

/// Process-local store, also the default when nothing external is wired in.
#[derive(Debug, Default)]
pub struct MemorySightingStore {
    entities: Mutex<HashMap<(String, String), EntitySighting>>,
    players: Mutex<HashMap<String, PlayerSighting>>,
}

impl MemorySightingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SightingStore for MemorySightingStore {
    fn record_entity(&self, sighting: EntitySighting) {
        let key = (sighting.kind.clone(), sighting.server.clone());
        self.entities.lock().unwrap().insert(key, sighting);
    }

    fn remove_entity(&self, kind: &str, server: &str) {
        self.entities
            .lock()
            .unwrap()
            .remove(&(kind.to_string(), server.to_string()));
    }

    fn entity(&self, kind: &str, server: &str) -> Option<EntitySighting> {
        self.entities
            .lock()
            .unwrap()
            .get(&(kind.to_string(), server.to_string()))
            .cloned()
    }

    fn record_player(&self, sighting: PlayerSighting) {
        self.players
            .lock()
            .unwrap()
            .insert(sighting.name.clone(), sighting);
    }

    fn player(&self, name: &str) -> Option<PlayerSighting> {
        self.players.lock().unwrap().get(name).cloned()
    }
}
