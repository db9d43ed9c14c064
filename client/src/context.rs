//! Shared context passed to every session.
//!
//! There is no global state: the reference dataset, the frozen pathfinder,
//! the sighting store, and the configuration all live here, so independent
//! contexts (and test fixtures) can coexist in one process. Sessions share
//! nothing else except deliberate cross-session reads of each other's
//! mirrors.

use crate::config::ClientConfig;
use crate::sightings::{MemorySightingStore, SightingStore};
use pathfinder::Pathfinder;
use shared::data::GameData;
use std::sync::Arc;

pub struct Context {
    pub game_data: Arc<GameData>,
    pub pathfinder: Arc<Pathfinder>,
    pub sightings: Arc<dyn SightingStore>,
    pub config: ClientConfig,
}

impl Context {
    pub fn new(game_data: Arc<GameData>, pathfinder: Arc<Pathfinder>) -> Context {
        Context {
            game_data,
            pathfinder,
            sightings: Arc::new(MemorySightingStore::new()),
            config: ClientConfig::default(),
        }
    }

    /// Wires in an external sighting store (e.g. one backed by a database).
    pub fn with_sightings(mut self, sightings: Arc<dyn SightingStore>) -> Context {
        self.sightings = sightings;
        self
    }

    pub fn with_config(mut self, config: ClientConfig) -> Context {
        self.config = config;
        self
    }
}
