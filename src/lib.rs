//! Cooperative emulator control: many chat participants, one shared game.
//!
//! Reactions on the published frame are rate limited per participant, queued in
//! arrival order and executed one by one as button presses against a single
//! emulator session. The resulting frames are published back to the chat.

pub mod config;
pub mod controls;
pub mod emulator;
pub mod library;
pub mod render;
pub mod session;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;
