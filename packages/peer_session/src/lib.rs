//! Peer Session - one direct peer link and everything carried over it
//!
//! This crate owns the connection lifecycle for a single remote peer, the
//! application protocol multiplexed over that link (chat and whiteboard
//! strokes), and the media call riding alongside it. Connection negotiation
//! and media codecs are left to whatever implements [`PeerTransport`]; the
//! in-process [`MemoryHub`] is provided for tests and demos.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use peer_session::{MemoryHub, SessionActor, SessionConfig, SimulatedMedia};
//!
//! #[tokio::main]
//! async fn main() {
//!     let hub = MemoryHub::new();
//!     let (transport, events) = hub.endpoint("alice").unwrap();
//!     let media = Arc::new(SimulatedMedia::new("alice"));
//!
//!     let session = SessionActor::spawn(SessionConfig::default(), transport, events, media);
//!     let mut updates = session.subscribe();
//!
//!     session.connect_to("bob").await.unwrap();
//!     while let Ok(update) = updates.recv().await {
//!         println!("{update:?}");
//!     }
//! }
//! ```

mod actor;
pub mod call;
pub mod chat;
mod coordinator;
mod error;
pub mod protocol;
pub mod transport;
pub mod whiteboard;

#[cfg(test)]
mod testing;

pub use actor::{SessionActor, SessionCommand, SessionHandle};
pub use call::{CallState, MediaRequest};
pub use chat::{ChatEntry, ChatLog, Direction};
pub use coordinator::{
    Effect, Session, SessionConfig, SessionCoordinator, SessionSnapshot, SessionState,
    SessionUpdate,
};
pub use error::{MediaError, ProtocolError, SessionError, TransportError, WhiteboardError};
pub use protocol::{ChatPayload, ProtocolMessage, StrokeEvent};
pub use transport::memory::{MemoryHub, MemoryTransport, SimulatedMedia};
pub use transport::{
    CallId, LinkId, MediaDevices, MediaHandle, PeerId, PeerTransport, TransportEvent,
};
pub use whiteboard::{Color, Point, Raster, Tool, Whiteboard};
