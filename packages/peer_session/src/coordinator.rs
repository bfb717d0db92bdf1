//! Session lifecycle state machine.
//!
//! The coordinator owns the single session this endpoint holds with a remote
//! peer, and everything hanging off it: the chat log, the whiteboard and the
//! call controller. It is synchronous. Whoever drives it (normally
//! [`crate::actor::SessionActor`]) feeds it commands and transport events one
//! at a time, runs the [`Effect`]s it returns, and forwards the
//! [`SessionUpdate`]s it accumulates.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::call::{CallController, CallState, MediaRequest};
use crate::chat::{ChatEntry, ChatLog};
use crate::error::{MediaError, SessionError, WhiteboardError};
use crate::protocol::{ProtocolMessage, StrokeEvent};
use crate::transport::{LinkId, MediaDevices, MediaHandle, PeerId, PeerTransport, TransportEvent};
use crate::whiteboard::{Color, Point, Tool, Whiteboard};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Connecting,
    Connected,
    /// Terminal. A new session must be started explicitly.
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub remote: PeerId,
    pub state: SessionState,
    /// `None` once the link is gone, or if the connect attempt failed up front.
    pub link: Option<LinkId>,
}

impl Session {
    fn is_live(&self) -> bool {
        matches!(self.state, SessionState::Connecting | SessionState::Connected)
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Sender name on outgoing chat. Falls back to the local peer id.
    pub display_name: Option<String>,
    pub canvas_width: u32,
    pub canvas_height: u32,
    pub pen_color: Color,
    pub pen_width: f32,
    /// Capacity of the UI update broadcast channel.
    pub update_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            display_name: None,
            canvas_width: 800,
            canvas_height: 600,
            pen_color: Color::BLACK,
            pen_width: 2.0,
            update_capacity: 256,
        }
    }
}

/// Work the coordinator needs done outside its own state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Acquire local media and report back through `media_acquired`.
    AcquireMedia(MediaRequest),
}

/// What changed, for whoever renders the session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    StateChanged { remote: PeerId, state: SessionState },
    ChatAppended(ChatEntry),
    WhiteboardChanged(StrokeEvent),
    CallStateChanged(CallState),
    RemoteMediaBound(MediaHandle),
    RemoteMediaUnbound,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub local_id: PeerId,
    pub session: Option<Session>,
    pub call_state: CallState,
    pub remote_media: Option<MediaHandle>,
    pub chat: Vec<ChatEntry>,
    pub tool: Tool,
    pub color: Color,
    pub line_width: f32,
}

pub struct SessionCoordinator {
    transport: Arc<dyn PeerTransport>,
    devices: Arc<dyn MediaDevices>,
    display_name: String,
    session: Option<Session>,
    chat: ChatLog,
    whiteboard: Whiteboard,
    call: CallController,
    updates: Vec<SessionUpdate>,
}

impl SessionCoordinator {
    pub fn new(
        config: &SessionConfig,
        transport: Arc<dyn PeerTransport>,
        devices: Arc<dyn MediaDevices>,
    ) -> Self {
        let display_name = config
            .display_name
            .clone()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| transport.local_id().to_string());

        let mut whiteboard = Whiteboard::new(config.canvas_width, config.canvas_height);
        whiteboard.set_color(config.pen_color);
        whiteboard.set_line_width(config.pen_width);

        Self {
            transport,
            devices,
            display_name,
            session: None,
            chat: ChatLog::new(),
            whiteboard,
            call: CallController::new(),
            updates: Vec::new(),
        }
    }

    pub fn local_id(&self) -> &PeerId {
        self.transport.local_id()
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn state(&self) -> SessionState {
        self.session
            .as_ref()
            .map_or(SessionState::Idle, |session| session.state)
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    pub fn chat(&self) -> &ChatLog {
        &self.chat
    }

    pub fn whiteboard(&self) -> &Whiteboard {
        &self.whiteboard
    }

    pub fn call(&self) -> &CallController {
        &self.call
    }

    /// Drain the updates produced since the last call.
    pub fn take_updates(&mut self) -> Vec<SessionUpdate> {
        std::mem::take(&mut self.updates)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            local_id: self.local_id().clone(),
            session: self.session.clone(),
            call_state: self.call.state(),
            remote_media: self.call.remote_media().cloned(),
            chat: self.chat.entries().to_vec(),
            tool: self.whiteboard.tool(),
            color: self.whiteboard.color(),
            line_width: self.whiteboard.line_width(),
        }
    }

    /// Open a session to `remote`, replacing whatever session exists.
    pub fn connect_to(&mut self, remote: PeerId) -> Result<(), SessionError> {
        if &remote == self.local_id() {
            return Err(SessionError::SelfConnect(remote));
        }
        self.retire_session();

        match self.transport.connect(&remote) {
            Ok(link) => {
                info!(peer = %remote, %link, "connecting");
                self.set_session(remote, SessionState::Connecting, Some(link));
                Ok(())
            }
            Err(e) => {
                warn!(peer = %remote, error = %e, "connect failed");
                self.set_session(remote, SessionState::Closed, None);
                Err(e.into())
            }
        }
    }

    /// Close the current session. Returns false if there was nothing to close.
    pub fn disconnect(&mut self) -> bool {
        if !self.session.as_ref().is_some_and(Session::is_live) {
            return false;
        }
        self.end_call_inner();
        if let Some(link) = self.session.as_mut().and_then(|s| s.link.take()) {
            self.transport.close(link);
        }
        info!("session closed locally");
        self.transition(SessionState::Closed);
        true
    }

    pub fn handle_transport_event(&mut self, event: TransportEvent) -> Vec<Effect> {
        match event {
            TransportEvent::Open { link } => {
                if self.is_current(link) && self.state() == SessionState::Connecting {
                    info!(%link, "session connected");
                    self.transition(SessionState::Connected);
                } else {
                    debug!(%link, "open on stale link ignored");
                }
            }
            TransportEvent::Data { link, payload } => {
                if !self.is_current(link) {
                    debug!(%link, "data on stale link dropped");
                    return Vec::new();
                }
                match ProtocolMessage::decode(&payload) {
                    Ok(Some(message)) => {
                        self.dispatch(message);
                    }
                    Ok(None) => {}
                    Err(e) => warn!(%link, error = %e, "undecodable message dropped"),
                }
            }
            TransportEvent::Closed { link } => {
                if self.is_current(link) {
                    info!(%link, "session closed by remote");
                    self.link_lost();
                }
            }
            TransportEvent::Error { link, reason } => {
                if self.is_current(link) {
                    warn!(%link, %reason, "session link failed");
                    self.link_lost();
                } else {
                    debug!(%link, %reason, "error on stale link ignored");
                }
            }
            TransportEvent::IncomingConnection { link, remote } => {
                info!(peer = %remote, %link, "incoming connection");
                self.retire_session();
                self.set_session(remote, SessionState::Connecting, Some(link));
            }
            TransportEvent::IncomingCall { call, remote } => {
                let from_session_peer = self
                    .session
                    .as_ref()
                    .is_some_and(|s| s.remote == remote && s.state == SessionState::Connected);
                if !from_session_peer {
                    info!(peer = %remote, %call, "incoming call without a connected session, hanging up");
                    self.transport.hang_up(call);
                    return Vec::new();
                }
                match self.call.begin_incoming(call) {
                    Ok(request) => {
                        info!(peer = %remote, %call, "incoming call, answering");
                        self.updates
                            .push(SessionUpdate::CallStateChanged(self.call.state()));
                        return vec![Effect::AcquireMedia(request)];
                    }
                    Err(e) => {
                        info!(peer = %remote, %call, error = %e, "incoming call refused");
                        self.transport.hang_up(call);
                    }
                }
            }
            TransportEvent::Stream { call, media } => {
                let was = self.call.state();
                if self.call.remote_stream(call, media.clone()) {
                    info!(%call, media = %media.label, "remote media bound");
                    self.updates.push(SessionUpdate::RemoteMediaBound(media));
                    self.push_call_state(was);
                }
            }
            TransportEvent::CallClosed { call } => {
                let was = self.call.state();
                let had_remote = self.call.remote_media().is_some();
                if self
                    .call
                    .remote_hung_up(call, self.transport.as_ref(), self.devices.as_ref())
                {
                    if had_remote {
                        self.updates.push(SessionUpdate::RemoteMediaUnbound);
                    }
                    self.push_call_state(was);
                }
            }
        }
        Vec::new()
    }

    /// Route one inbound message. Returns false if it was dropped.
    pub fn dispatch(&mut self, message: ProtocolMessage) -> bool {
        if !self.is_connected() {
            debug!(tag = message.tag(), state = ?self.state(), "message outside a connected session dropped");
            return false;
        }
        match message {
            ProtocolMessage::Chat(payload) => {
                let entry = self.chat.record_received(payload).clone();
                self.updates.push(SessionUpdate::ChatAppended(entry));
                true
            }
            ProtocolMessage::Stroke(event) => match self.whiteboard.apply_remote(&event) {
                Ok(()) => {
                    self.updates.push(SessionUpdate::WhiteboardChanged(event));
                    true
                }
                Err(e) => {
                    warn!(error = %e, "remote stroke rejected");
                    false
                }
            },
        }
    }

    /// Send a chat message and append it locally. `None` when nothing was sent.
    ///
    /// The local append does not wait for, or depend on, delivery.
    pub fn send_chat(&mut self, text: &str) -> Option<ChatEntry> {
        if !self.is_connected() {
            return None;
        }
        let payload = self.chat.compose(text, &self.display_name, Utc::now())?;
        self.send(&ProtocolMessage::Chat(payload.clone()));
        let entry = self.chat.record_sent(payload).clone();
        self.updates.push(SessionUpdate::ChatAppended(entry.clone()));
        Some(entry)
    }

    pub fn pointer_down(&mut self, at: Point) {
        if self.is_connected() {
            self.whiteboard.pointer_down(at);
        }
    }

    pub fn pointer_move(&mut self, at: Point) -> Option<StrokeEvent> {
        if !self.is_connected() {
            self.whiteboard.pointer_up();
            return None;
        }
        let event = self.whiteboard.pointer_move(at)?;
        self.send(&ProtocolMessage::Stroke(event.clone()));
        self.updates
            .push(SessionUpdate::WhiteboardChanged(event.clone()));
        Some(event)
    }

    pub fn pointer_up(&mut self) {
        self.whiteboard.pointer_up();
    }

    /// Clear both whiteboards. Ignored outside a connected session.
    pub fn clear_whiteboard(&mut self) -> bool {
        if !self.is_connected() {
            return false;
        }
        let event = self.whiteboard.clear();
        self.send(&ProtocolMessage::Stroke(event.clone()));
        self.updates.push(SessionUpdate::WhiteboardChanged(event));
        true
    }

    pub fn set_tool(&mut self, tool: Tool) {
        self.whiteboard.set_tool(tool);
    }

    pub fn set_color(&mut self, color: Color) {
        self.whiteboard.set_color(color);
    }

    pub fn set_line_width(&mut self, width: f32) {
        self.whiteboard.set_line_width(width);
    }

    pub fn export_png(&self) -> Result<Vec<u8>, WhiteboardError> {
        self.whiteboard.export_png()
    }

    /// Start an outgoing call. The returned request must be fulfilled and fed
    /// back through [`Self::media_acquired`].
    pub fn start_call(&mut self) -> Result<MediaRequest, SessionError> {
        if !self.is_connected() {
            return Err(SessionError::NotConnected);
        }
        let request = self.call.begin_outgoing()?;
        self.updates
            .push(SessionUpdate::CallStateChanged(self.call.state()));
        Ok(request)
    }

    pub fn media_acquired(&mut self, request: MediaRequest, result: Result<MediaHandle, MediaError>) {
        let was = self.call.state();
        let Some(remote) = self.session.as_ref().map(|s| s.remote.clone()) else {
            if let Ok(media) = result {
                self.devices.release(&media);
            }
            return;
        };
        self.call.media_acquired(
            request.attempt,
            result,
            &remote,
            self.transport.as_ref(),
            self.devices.as_ref(),
        );
        self.push_call_state(was);
    }

    /// End the call from any state. Returns false if there was no call.
    pub fn end_call(&mut self) -> bool {
        self.end_call_inner()
    }

    /// Tear everything down: call, link, and the transport itself.
    pub fn shutdown(&mut self) {
        self.disconnect();
        self.end_call_inner();
        self.transport.shutdown();
        info!(peer = %self.local_id(), "session coordinator shut down");
    }

    fn end_call_inner(&mut self) -> bool {
        let had_remote = self.call.remote_media().is_some();
        if !self
            .call
            .end(self.transport.as_ref(), self.devices.as_ref())
        {
            return false;
        }
        if had_remote {
            self.updates.push(SessionUpdate::RemoteMediaUnbound);
        }
        self.updates
            .push(SessionUpdate::CallStateChanged(CallState::NoCall));
        true
    }

    fn send(&self, message: &ProtocolMessage) {
        let Some(link) = self.session.as_ref().and_then(|s| s.link) else {
            return;
        };
        let bytes = match message.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "failed to encode outgoing message");
                return;
            }
        };
        if let Err(e) = self.transport.send(link, bytes) {
            warn!(%link, tag = message.tag(), error = %e, "send failed");
        }
    }

    fn is_current(&self, link: LinkId) -> bool {
        self.session.as_ref().and_then(|s| s.link) == Some(link)
    }

    /// The remote closed the link or it failed.
    fn link_lost(&mut self) {
        self.end_call_inner();
        if let Some(session) = self.session.as_mut() {
            session.link = None;
        }
        self.transition(SessionState::Closed);
    }

    /// Drop a live session so a new one can take its place.
    fn retire_session(&mut self) {
        let Some(session) = self.session.as_ref().filter(|s| s.is_live()) else {
            return;
        };
        debug!(peer = %session.remote, "replacing live session");
        self.disconnect();
    }

    fn set_session(&mut self, remote: PeerId, state: SessionState, link: Option<LinkId>) {
        self.session = Some(Session {
            remote: remote.clone(),
            state,
            link,
        });
        self.updates
            .push(SessionUpdate::StateChanged { remote, state });
    }

    fn transition(&mut self, state: SessionState) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.state == state {
            return;
        }
        session.state = state;
        let remote = session.remote.clone();
        self.updates
            .push(SessionUpdate::StateChanged { remote, state });
    }

    fn push_call_state(&mut self, was: CallState) {
        let now = self.call.state();
        if now != was {
            self.updates.push(SessionUpdate::CallStateChanged(now));
        }
    }
}
