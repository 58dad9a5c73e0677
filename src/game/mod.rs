//! Game simulation modules

pub mod arena;
pub mod combat;
pub mod physics;
pub mod snapshot;
pub mod terrain;
pub mod world;

pub use arena::{Arena, ArenaHandle, ArenaSettings, Player};
pub use terrain::Terrain;

use bytes::Bytes;

/// Raw control payload received from a player's connection
#[derive(Debug, Clone)]
pub struct PlayerInput {
    pub uid: u32,
    pub data: Bytes,
}
