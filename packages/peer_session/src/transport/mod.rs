//! Transport adapter contract.
//!
//! Connection negotiation, NAT traversal and media codecs belong to an
//! external peer-connection service. The session layer only talks to it
//! through [`PeerTransport`] (outgoing operations, all non-blocking) and the
//! [`TransportEvent`] stream it hands out at construction (everything that
//! arrives asynchronously). Local capture devices sit behind [`MediaDevices`].

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{MediaError, TransportError};

/// Opaque, globally unique peer identifier assigned by the transport on startup.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for PeerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Handle for one direct data link, local to the endpoint that owns it.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LinkId(pub u64);

impl std::fmt::Display for LinkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "link-{}", self.0)
    }
}

/// Handle for one media call, local to the endpoint that owns it.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(pub u64);

impl std::fmt::Display for CallId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "call-{}", self.0)
    }
}

/// A live audio/video stream (local capture or bound remote media).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaHandle {
    pub id: u64,
    pub label: String,
}

/// Everything the transport delivers asynchronously.
#[derive(Clone, Debug, PartialEq)]
pub enum TransportEvent {
    /// The link is ready to carry data.
    Open { link: LinkId },
    /// One application payload, in the link's delivery order.
    Data { link: LinkId, payload: Vec<u8> },
    /// The link was closed by either side.
    Closed { link: LinkId },
    /// The link failed (peer unavailable, negotiation failure, ...).
    Error { link: LinkId, reason: String },
    /// A remote peer opened a link to us. `Open` follows when it is usable.
    IncomingConnection { link: LinkId, remote: PeerId },
    /// A remote peer is calling us.
    IncomingCall { call: CallId, remote: PeerId },
    /// Remote media arrived on a call.
    Stream { call: CallId, media: MediaHandle },
    /// The call was hung up by either side.
    CallClosed { call: CallId },
}

/// Outgoing half of the transport adapter.
///
/// Every method returns immediately; sends are queued and the transport owns
/// backpressure. Results that take time arrive as [`TransportEvent`]s.
pub trait PeerTransport: Send + Sync + 'static {
    /// The identity this endpoint was assigned.
    fn local_id(&self) -> &PeerId;

    /// Start an outgoing connection. Completion is reported by `Open` or `Error`.
    fn connect(&self, remote: &PeerId) -> Result<LinkId, TransportError>;

    /// Queue one payload on a link (reliable, ordered).
    fn send(&self, link: LinkId, payload: Vec<u8>) -> Result<(), TransportError>;

    fn close(&self, link: LinkId);

    /// Place an outgoing media call offering `local_media`.
    fn call(&self, remote: &PeerId, local_media: &MediaHandle) -> Result<CallId, TransportError>;

    /// Answer an incoming call with `local_media`.
    fn answer(&self, call: CallId, local_media: &MediaHandle) -> Result<(), TransportError>;

    fn hang_up(&self, call: CallId);

    /// Destroy the peer-connection handle: every link and call is torn down.
    fn shutdown(&self);
}

/// Local camera + microphone capability.
#[async_trait]
pub trait MediaDevices: Send + Sync + 'static {
    /// Acquire camera and microphone. May suspend on a permission prompt.
    async fn acquire_local_media(&self) -> Result<MediaHandle, MediaError>;

    /// Stop every track of a previously acquired stream.
    fn release(&self, media: &MediaHandle);
}
