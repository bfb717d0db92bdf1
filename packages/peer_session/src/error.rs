use crate::transport::{CallId, LinkId, PeerId};

/// Errors reported synchronously by a transport adapter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("transport has been shut down")]
    Shutdown,

    #[error("peer id already in use: {0}")]
    IdTaken(PeerId),

    #[error("peer unavailable: {0}")]
    PeerUnavailable(PeerId),

    #[error("unknown link: {0}")]
    UnknownLink(LinkId),

    #[error("unknown call: {0}")]
    UnknownCall(CallId),
}

/// Local camera/microphone acquisition failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MediaError {
    #[error("permission to use camera and microphone was denied")]
    PermissionDenied,

    #[error("no capture device available")]
    NoDevice,

    #[error("media capture failed: {0}")]
    Failed(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("message has no string `type` field")]
    MissingTag,
}

#[derive(Debug, thiserror::Error)]
pub enum WhiteboardError {
    #[error("invalid color: {0:?}")]
    InvalidColor(String),

    #[error("invalid stroke: {0}")]
    InvalidStroke(&'static str),

    #[error("png encoding failed: {0}")]
    Encode(#[from] png::EncodingError),
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("no connected session")]
    NotConnected,

    #[error("cannot connect to self ({0})")]
    SelfConnect(PeerId),

    #[error("a call is already in progress")]
    CallInProgress,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Whiteboard(#[from] WhiteboardError),

    #[error("session actor is gone")]
    ActorGone,
}
