//! Presence - who is online, under which display name
//!
//! The directory is a plain registry keyed by peer id: clients register when
//! their transport endpoint comes up, poll the list on a fixed interval, and
//! unregister on the way out. Nothing is pushed. A peer that vanishes without
//! unregistering is removed when its transport reports the disconnect (see
//! [`unregister_on_disconnect`]), or lingers until the process restarts.

pub mod client;
mod directory;
mod error;
pub mod wire;

pub use client::{PresenceClient, PresencePoller};
pub use directory::{
    InMemoryDirectory, PresenceDirectory, PresenceEntry, exclude_self, unregister_on_disconnect,
};
pub use error::PresenceError;
