//! Recording transport for unit tests.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::TransportError;
use crate::protocol::ProtocolMessage;
use crate::transport::{CallId, LinkId, MediaHandle, PeerId, PeerTransport};

#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    Connect(PeerId, LinkId),
    Send(LinkId, Vec<u8>),
    Close(LinkId),
    Call(PeerId, CallId),
    Answer(CallId),
    HangUp(CallId),
    Shutdown,
}

pub struct RecordingTransport {
    local: PeerId,
    ops: Mutex<Vec<Op>>,
    next: Mutex<u64>,
    pub fail_connect: Mutex<bool>,
    pub fail_send: Mutex<bool>,
}

impl RecordingTransport {
    pub fn new(local: &str) -> Arc<Self> {
        Arc::new(Self {
            local: PeerId::from(local),
            ops: Mutex::new(Vec::new()),
            next: Mutex::new(0),
            fail_connect: Mutex::new(false),
            fail_send: Mutex::new(false),
        })
    }

    pub fn ops(&self) -> Vec<Op> {
        self.ops.lock().clone()
    }

    /// Decoded protocol messages handed to `send`, in order.
    pub fn sent_messages(&self) -> Vec<ProtocolMessage> {
        self.ops
            .lock()
            .iter()
            .filter_map(|op| match op {
                Op::Send(_, bytes) => ProtocolMessage::decode(bytes).ok().flatten(),
                _ => None,
            })
            .collect()
    }

    pub fn calls_placed(&self) -> usize {
        self.ops
            .lock()
            .iter()
            .filter(|op| matches!(op, Op::Call(..)))
            .count()
    }

    fn next_id(&self) -> u64 {
        let mut next = self.next.lock();
        *next += 1;
        *next
    }
}

impl PeerTransport for RecordingTransport {
    fn local_id(&self) -> &PeerId {
        &self.local
    }

    fn connect(&self, remote: &PeerId) -> Result<LinkId, TransportError> {
        if *self.fail_connect.lock() {
            return Err(TransportError::PeerUnavailable(remote.clone()));
        }
        let link = LinkId(self.next_id());
        self.ops.lock().push(Op::Connect(remote.clone(), link));
        Ok(link)
    }

    fn send(&self, link: LinkId, payload: Vec<u8>) -> Result<(), TransportError> {
        self.ops.lock().push(Op::Send(link, payload));
        if *self.fail_send.lock() {
            return Err(TransportError::UnknownLink(link));
        }
        Ok(())
    }

    fn close(&self, link: LinkId) {
        self.ops.lock().push(Op::Close(link));
    }

    fn call(&self, remote: &PeerId, _local_media: &MediaHandle) -> Result<CallId, TransportError> {
        let call = CallId(self.next_id());
        self.ops.lock().push(Op::Call(remote.clone(), call));
        Ok(call)
    }

    fn answer(&self, call: CallId, _local_media: &MediaHandle) -> Result<(), TransportError> {
        self.ops.lock().push(Op::Answer(call));
        Ok(())
    }

    fn hang_up(&self, call: CallId) {
        self.ops.lock().push(Op::HangUp(call));
    }

    fn shutdown(&self) {
        self.ops.lock().push(Op::Shutdown);
    }
}
