//! Automated client for the game: live server-mirrored state, latency
//! compensation, correlated commands, and route execution.
//!
//! The policy layer (what to fight, what to buy) lives elsewhere; this
//! crate provides the mechanics it builds on.

pub mod bus;
pub mod commands;
pub mod config;
pub mod context;
pub mod error;
pub mod evals;
pub mod movement;
pub mod session;
pub mod sightings;
pub mod socket;
pub mod state;

pub use config::ClientConfig;
pub use context::Context;
pub use error::ClientError;
pub use movement::{SmartMoveOptions, SmartMoveTarget};
pub use session::{Credentials, Session, SessionStatus};
pub use sightings::{MemorySightingStore, SightingStore};
pub use state::{Character, Entity, State};
