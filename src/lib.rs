pub mod core {
    pub mod game;
    pub mod network;
    pub mod registry;
    pub mod websocket;
    pub mod websocket_host;
}

pub mod client {
    pub mod human;
    pub mod websocket_client;
}

pub mod cli;
pub mod error;
pub mod players;

// Re-export for convenience
pub use crate::core::game::{CowsBulls, Game, Guesser, Thinker};
pub use crate::core::registry::{GameSettings, Hub, Player, PlayerEntry};
pub use crate::error::{Error, Result};
