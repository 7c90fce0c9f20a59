//! Room session engine
//!
//! Durable state lives in the room store; this module owns everything
//! tied to live sockets.
//!
//! - `events`: wire messages in both directions
//! - `presence`: connection id -> ephemeral presence
//! - `broadcast`: room, room-except-sender and direct delivery
//! - `analysis`: at-most-once analysis per submission
//! - `controller`: the operations themselves

mod analysis;
mod broadcast;
mod controller;
mod events;
mod presence;

pub use analysis::{AnalysisGate, AnalysisOutcome};
pub use broadcast::{Broadcaster, ConnectionSender};
pub use controller::RoomSessionController;
pub use events::{ClientMessage, ServerEvent};
pub use presence::{PresenceEntry, PresencePatch, PresenceRegistry, PresenceStatus};
