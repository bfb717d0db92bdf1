//! In-process transport adapter.
//!
//! A [`MemoryHub`] hosts any number of endpoints in one process and wires
//! them together with unbounded channels, delivering the same event sequence
//! a real peer-connection service would: `IncomingConnection` then `Open` on
//! the accepting side, `Open` on the connecting side, `Error` for unknown
//! peers, `Stream` on both sides once a call is answered, and `Closed` /
//! `CallClosed` on both sides when either end tears down.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info};

use crate::error::{MediaError, TransportError};

use super::{CallId, LinkId, MediaDevices, MediaHandle, PeerId, PeerTransport, TransportEvent};

struct LinkEnd {
    owner: PeerId,
    peer: LinkId,
}

struct CallEnd {
    owner: PeerId,
    peer: CallId,
    /// Media this side offered (caller) or answered with (callee).
    media: Option<MediaHandle>,
}

#[derive(Default)]
struct HubState {
    endpoints: HashMap<PeerId, mpsc::UnboundedSender<TransportEvent>>,
    links: HashMap<LinkId, LinkEnd>,
    calls: HashMap<CallId, CallEnd>,
    next_id: u64,
}

impl HubState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn emit(&self, owner: &PeerId, event: TransportEvent) {
        if let Some(tx) = self.endpoints.get(owner) {
            if tx.send(event).is_err() {
                debug!(peer = %owner, "endpoint event receiver dropped");
            }
        }
    }

    fn close_link(&mut self, link: LinkId) {
        let Some(end) = self.links.remove(&link) else {
            return;
        };
        let peer = self.links.remove(&end.peer);
        self.emit(&end.owner, TransportEvent::Closed { link });
        if let Some(peer) = peer {
            self.emit(&peer.owner, TransportEvent::Closed { link: end.peer });
        }
    }

    fn hang_up(&mut self, call: CallId) {
        let Some(end) = self.calls.remove(&call) else {
            return;
        };
        let peer = self.calls.remove(&end.peer);
        self.emit(&end.owner, TransportEvent::CallClosed { call });
        if let Some(peer) = peer {
            self.emit(&peer.owner, TransportEvent::CallClosed { call: end.peer });
        }
    }
}

/// Shared switchboard for in-process endpoints.
#[derive(Clone)]
pub struct MemoryHub {
    state: Arc<Mutex<HubState>>,
    disconnects: broadcast::Sender<PeerId>,
}

impl Default for MemoryHub {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryHub {
    pub fn new() -> Self {
        let (disconnects, _) = broadcast::channel(64);
        Self {
            state: Arc::new(Mutex::new(HubState::default())),
            disconnects,
        }
    }

    /// Register an endpoint under `id` and return it with its event stream.
    pub fn endpoint(
        &self,
        id: impl Into<PeerId>,
    ) -> Result<(Arc<MemoryTransport>, mpsc::UnboundedReceiver<TransportEvent>), TransportError> {
        let id = id.into();
        let mut state = self.state.lock();
        if state.endpoints.contains_key(&id) {
            return Err(TransportError::IdTaken(id));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        state.endpoints.insert(id.clone(), tx);
        info!(peer = %id, "endpoint registered");

        let transport = Arc::new(MemoryTransport {
            local: id,
            state: self.state.clone(),
            disconnects: self.disconnects.clone(),
        });
        Ok((transport, rx))
    }

    pub fn is_online(&self, id: &PeerId) -> bool {
        self.state.lock().endpoints.contains_key(id)
    }

    /// Ids of endpoints as they shut down.
    pub fn subscribe_disconnects(&self) -> broadcast::Receiver<PeerId> {
        self.disconnects.subscribe()
    }
}

/// One endpoint of a [`MemoryHub`].
pub struct MemoryTransport {
    local: PeerId,
    state: Arc<Mutex<HubState>>,
    disconnects: broadcast::Sender<PeerId>,
}

impl MemoryTransport {
    fn ensure_online(&self, state: &HubState) -> Result<(), TransportError> {
        if state.endpoints.contains_key(&self.local) {
            Ok(())
        } else {
            Err(TransportError::Shutdown)
        }
    }
}

impl PeerTransport for MemoryTransport {
    fn local_id(&self) -> &PeerId {
        &self.local
    }

    fn connect(&self, remote: &PeerId) -> Result<LinkId, TransportError> {
        let mut state = self.state.lock();
        self.ensure_online(&state)?;

        let local_link = LinkId(state.next_id());
        if !state.endpoints.contains_key(remote) {
            state.emit(
                &self.local,
                TransportEvent::Error {
                    link: local_link,
                    reason: format!("peer unavailable: {remote}"),
                },
            );
            return Ok(local_link);
        }

        let remote_link = LinkId(state.next_id());
        state.links.insert(
            local_link,
            LinkEnd {
                owner: self.local.clone(),
                peer: remote_link,
            },
        );
        state.links.insert(
            remote_link,
            LinkEnd {
                owner: remote.clone(),
                peer: local_link,
            },
        );

        state.emit(
            remote,
            TransportEvent::IncomingConnection {
                link: remote_link,
                remote: self.local.clone(),
            },
        );
        state.emit(remote, TransportEvent::Open { link: remote_link });
        state.emit(&self.local, TransportEvent::Open { link: local_link });
        debug!(from = %self.local, to = %remote, %local_link, %remote_link, "link opened");
        Ok(local_link)
    }

    fn send(&self, link: LinkId, payload: Vec<u8>) -> Result<(), TransportError> {
        let state = self.state.lock();
        self.ensure_online(&state)?;
        let end = state
            .links
            .get(&link)
            .filter(|end| end.owner == self.local)
            .ok_or(TransportError::UnknownLink(link))?;
        let peer = state
            .links
            .get(&end.peer)
            .ok_or(TransportError::UnknownLink(link))?;
        state.emit(
            &peer.owner,
            TransportEvent::Data {
                link: end.peer,
                payload,
            },
        );
        Ok(())
    }

    fn close(&self, link: LinkId) {
        let mut state = self.state.lock();
        if state.links.get(&link).is_some_and(|end| end.owner == self.local) {
            state.close_link(link);
        }
    }

    fn call(&self, remote: &PeerId, local_media: &MediaHandle) -> Result<CallId, TransportError> {
        let mut state = self.state.lock();
        self.ensure_online(&state)?;
        if !state.endpoints.contains_key(remote) {
            return Err(TransportError::PeerUnavailable(remote.clone()));
        }

        let caller = CallId(state.next_id());
        let callee = CallId(state.next_id());
        state.calls.insert(
            caller,
            CallEnd {
                owner: self.local.clone(),
                peer: callee,
                media: Some(local_media.clone()),
            },
        );
        state.calls.insert(
            callee,
            CallEnd {
                owner: remote.clone(),
                peer: caller,
                media: None,
            },
        );
        state.emit(
            remote,
            TransportEvent::IncomingCall {
                call: callee,
                remote: self.local.clone(),
            },
        );
        Ok(caller)
    }

    fn answer(&self, call: CallId, local_media: &MediaHandle) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        self.ensure_online(&state)?;
        let peer_call = state
            .calls
            .get(&call)
            .filter(|end| end.owner == self.local)
            .map(|end| end.peer)
            .ok_or(TransportError::UnknownCall(call))?;
        let (caller, offered) = state
            .calls
            .get(&peer_call)
            .map(|end| (end.owner.clone(), end.media.clone()))
            .ok_or(TransportError::UnknownCall(call))?;

        if let Some(end) = state.calls.get_mut(&call) {
            end.media = Some(local_media.clone());
        }
        state.emit(
            &caller,
            TransportEvent::Stream {
                call: peer_call,
                media: local_media.clone(),
            },
        );
        if let Some(media) = offered {
            state.emit(&self.local, TransportEvent::Stream { call, media });
        }
        Ok(())
    }

    fn hang_up(&self, call: CallId) {
        let mut state = self.state.lock();
        if state.calls.get(&call).is_some_and(|end| end.owner == self.local) {
            state.hang_up(call);
        }
    }

    fn shutdown(&self) {
        let mut state = self.state.lock();
        if state.endpoints.remove(&self.local).is_none() {
            return;
        }
        let links: Vec<LinkId> = state
            .links
            .iter()
            .filter(|(_, end)| end.owner == self.local)
            .map(|(id, _)| *id)
            .collect();
        for link in links {
            state.close_link(link);
        }
        let calls: Vec<CallId> = state
            .calls
            .iter()
            .filter(|(_, end)| end.owner == self.local)
            .map(|(id, _)| *id)
            .collect();
        for call in calls {
            state.hang_up(call);
        }
        drop(state);

        info!(peer = %self.local, "endpoint shut down");
        let _ = self.disconnects.send(self.local.clone());
    }
}

/// Stand-in capture devices that hand out numbered streams.
pub struct SimulatedMedia {
    label: String,
    next: AtomicU64,
    denied: AtomicBool,
    live: Mutex<HashSet<u64>>,
}

impl SimulatedMedia {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            next: AtomicU64::new(1),
            denied: AtomicBool::new(false),
            live: Mutex::new(HashSet::new()),
        }
    }

    /// Make subsequent acquisitions fail as if the user refused permission.
    pub fn set_denied(&self, denied: bool) {
        self.denied.store(denied, Ordering::SeqCst);
    }

    /// Streams acquired and not yet released.
    pub fn live_count(&self) -> usize {
        self.live.lock().len()
    }
}

#[async_trait]
impl MediaDevices for SimulatedMedia {
    async fn acquire_local_media(&self) -> Result<MediaHandle, MediaError> {
        if self.denied.load(Ordering::SeqCst) {
            return Err(MediaError::PermissionDenied);
        }
        let id = self.next.fetch_add(1, Ordering::SeqCst);
        self.live.lock().insert(id);
        Ok(MediaHandle {
            id,
            label: format!("{}-cam-{}", self.label, id),
        })
    }

    fn release(&self, media: &MediaHandle) {
        if self.live.lock().remove(&media.id) {
            debug!(media = %media.label, "local media released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(rx: &mut mpsc::UnboundedReceiver<TransportEvent>) -> Vec<TransportEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn duplicate_ids_are_refused() {
        let hub = MemoryHub::new();
        let _a = hub.endpoint("a").unwrap();
        assert!(matches!(hub.endpoint("a"), Err(TransportError::IdTaken(_))));
    }

    #[test]
    fn connect_opens_both_sides() {
        let hub = MemoryHub::new();
        let (a, mut a_rx) = hub.endpoint("a").unwrap();
        let (_b, mut b_rx) = hub.endpoint("b").unwrap();

        let link = a.connect(&PeerId::from("b")).unwrap();
        assert_eq!(drain(&mut a_rx), vec![TransportEvent::Open { link }]);

        let b_events = drain(&mut b_rx);
        assert_eq!(b_events.len(), 2);
        let TransportEvent::IncomingConnection { link: b_link, remote } = &b_events[0] else {
            panic!("expected incoming connection, got {:?}", b_events[0]);
        };
        assert_eq!(remote, &PeerId::from("a"));
        assert_eq!(b_events[1], TransportEvent::Open { link: *b_link });
    }

    #[test]
    fn unknown_peer_reports_error_event() {
        let hub = MemoryHub::new();
        let (a, mut a_rx) = hub.endpoint("a").unwrap();
        let link = a.connect(&PeerId::from("ghost")).unwrap();
        assert!(matches!(
            drain(&mut a_rx).as_slice(),
            [TransportEvent::Error { link: l, .. }] if *l == link
        ));
    }

    #[test]
    fn data_is_delivered_in_order() {
        let hub = MemoryHub::new();
        let (a, _a_rx) = hub.endpoint("a").unwrap();
        let (_b, mut b_rx) = hub.endpoint("b").unwrap();
        let link = a.connect(&PeerId::from("b")).unwrap();
        drain(&mut b_rx);

        for i in 0..5u8 {
            a.send(link, vec![i]).unwrap();
        }
        let payloads: Vec<Vec<u8>> = drain(&mut b_rx)
            .into_iter()
            .filter_map(|e| match e {
                TransportEvent::Data { payload, .. } => Some(payload),
                _ => None,
            })
            .collect();
        assert_eq!(payloads, vec![vec![0], vec![1], vec![2], vec![3], vec![4]]);
    }

    #[test]
    fn close_notifies_both_sides_and_invalidates_link() {
        let hub = MemoryHub::new();
        let (a, mut a_rx) = hub.endpoint("a").unwrap();
        let (_b, mut b_rx) = hub.endpoint("b").unwrap();
        let link = a.connect(&PeerId::from("b")).unwrap();
        drain(&mut a_rx);
        drain(&mut b_rx);

        a.close(link);
        assert_eq!(drain(&mut a_rx), vec![TransportEvent::Closed { link }]);
        assert!(matches!(
            drain(&mut b_rx).as_slice(),
            [TransportEvent::Closed { .. }]
        ));
        assert_eq!(a.send(link, vec![1]), Err(TransportError::UnknownLink(link)));
    }

    #[test]
    fn answered_call_streams_both_ways() {
        let hub = MemoryHub::new();
        let (a, mut a_rx) = hub.endpoint("a").unwrap();
        let (b, mut b_rx) = hub.endpoint("b").unwrap();
        let cam_a = MediaHandle { id: 1, label: "a-cam".into() };
        let cam_b = MediaHandle { id: 2, label: "b-cam".into() };

        let call = a.call(&PeerId::from("b"), &cam_a).unwrap();
        let [TransportEvent::IncomingCall { call: incoming, .. }] = drain(&mut b_rx)[..] else {
            panic!("expected incoming call");
        };
        b.answer(incoming, &cam_b).unwrap();

        assert_eq!(
            drain(&mut a_rx),
            vec![TransportEvent::Stream { call, media: cam_b }]
        );
        assert_eq!(
            drain(&mut b_rx),
            vec![TransportEvent::Stream { call: incoming, media: cam_a }]
        );

        b.hang_up(incoming);
        assert_eq!(drain(&mut a_rx), vec![TransportEvent::CallClosed { call }]);
    }

    #[test]
    fn shutdown_tears_down_and_announces() {
        let hub = MemoryHub::new();
        let mut disconnects = hub.subscribe_disconnects();
        let (a, _a_rx) = hub.endpoint("a").unwrap();
        let (_b, mut b_rx) = hub.endpoint("b").unwrap();
        a.connect(&PeerId::from("b")).unwrap();
        drain(&mut b_rx);

        a.shutdown();
        assert!(!hub.is_online(&PeerId::from("a")));
        assert!(matches!(
            drain(&mut b_rx).as_slice(),
            [TransportEvent::Closed { .. }]
        ));
        assert_eq!(disconnects.try_recv().unwrap(), PeerId::from("a"));
        assert_eq!(
            a.connect(&PeerId::from("b")),
            Err(TransportError::Shutdown)
        );
    }

    #[tokio::test]
    async fn simulated_media_tracks_live_streams() {
        let media = SimulatedMedia::new("test");
        let cam = media.acquire_local_media().await.unwrap();
        assert_eq!(media.live_count(), 1);
        media.release(&cam);
        assert_eq!(media.live_count(), 0);

        media.set_denied(true);
        assert_eq!(
            media.acquire_local_media().await,
            Err(MediaError::PermissionDenied)
        );
    }
}
