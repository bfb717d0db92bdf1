//! Media call sub-state of a session.
//!
//! `NoCall -> Starting -> Active -> NoCall`. Acquiring the camera and
//! microphone is the only step that suspends; the controller hands out a
//! [`MediaRequest`] and the runtime feeds the result back through
//! [`CallController::media_acquired`]. Every request carries an attempt
//! number so a result that arrives after the call was ended is released
//! instead of being bound.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{MediaError, SessionError};
use crate::transport::{CallId, MediaDevices, MediaHandle, PeerId, PeerTransport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    NoCall,
    Starting,
    Active,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallDirection {
    Outgoing,
    /// Incoming calls are answered automatically once local media is ready.
    Incoming,
}

/// Local media must be acquired before the call can proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaRequest {
    pub attempt: u64,
}

#[derive(Debug)]
pub struct CallController {
    state: CallState,
    attempt: u64,
    direction: Option<CallDirection>,
    call: Option<CallId>,
    local_media: Option<MediaHandle>,
    remote_media: Option<MediaHandle>,
}

impl Default for CallController {
    fn default() -> Self {
        Self::new()
    }
}

impl CallController {
    pub fn new() -> Self {
        Self {
            state: CallState::NoCall,
            attempt: 0,
            direction: None,
            call: None,
            local_media: None,
            remote_media: None,
        }
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn direction(&self) -> Option<CallDirection> {
        self.direction
    }

    pub fn call_id(&self) -> Option<CallId> {
        self.call
    }

    pub fn local_media(&self) -> Option<&MediaHandle> {
        self.local_media.as_ref()
    }

    pub fn remote_media(&self) -> Option<&MediaHandle> {
        self.remote_media.as_ref()
    }

    /// Begin an outgoing call. The caller must already hold a connected session.
    pub fn begin_outgoing(&mut self) -> Result<MediaRequest, SessionError> {
        self.begin(CallDirection::Outgoing, None)
    }

    /// Accept an incoming call for auto-answer.
    pub fn begin_incoming(&mut self, call: CallId) -> Result<MediaRequest, SessionError> {
        self.begin(CallDirection::Incoming, Some(call))
    }

    fn begin(
        &mut self,
        direction: CallDirection,
        call: Option<CallId>,
    ) -> Result<MediaRequest, SessionError> {
        if self.state != CallState::NoCall {
            return Err(SessionError::CallInProgress);
        }
        self.attempt += 1;
        self.state = CallState::Starting;
        self.direction = Some(direction);
        self.call = call;
        debug!(attempt = self.attempt, ?direction, "call starting, acquiring local media");
        Ok(MediaRequest {
            attempt: self.attempt,
        })
    }

    /// Feed the result of a media acquisition started by `begin_*`.
    pub fn media_acquired(
        &mut self,
        attempt: u64,
        result: Result<MediaHandle, MediaError>,
        remote: &PeerId,
        transport: &dyn PeerTransport,
        devices: &dyn MediaDevices,
    ) {
        let pending = self.state == CallState::Starting
            && attempt == self.attempt
            && self.local_media.is_none();
        if !pending {
            debug!(attempt, current = self.attempt, "discarding stale media result");
            if let Ok(media) = result {
                devices.release(&media);
            }
            return;
        }

        let media = match result {
            Ok(media) => media,
            Err(e) => {
                warn!(error = %e, peer = %remote, "local media unavailable, call not established");
                self.reset(transport);
                return;
            }
        };

        let placed = match (self.direction, self.call) {
            (Some(CallDirection::Incoming), Some(call)) => {
                transport.answer(call, &media).map(|()| call)
            }
            _ => transport.call(remote, &media),
        };

        match placed {
            Ok(call) => {
                info!(peer = %remote, %call, direction = ?self.direction, "media call placed");
                self.call = Some(call);
                self.local_media = Some(media);
            }
            Err(e) => {
                warn!(error = %e, peer = %remote, "transport refused media call");
                devices.release(&media);
                self.reset(transport);
            }
        }
    }

    /// Remote media arrived. Returns true if it was bound to the current call.
    pub fn remote_stream(&mut self, call: CallId, media: MediaHandle) -> bool {
        if self.call != Some(call) || self.state == CallState::NoCall {
            debug!(%call, "remote media for an unknown call");
            return false;
        }
        self.remote_media = Some(media);
        self.state = CallState::Active;
        true
    }

    /// End the call from any state: release local media, hang up, unbind remote media.
    pub fn end(&mut self, transport: &dyn PeerTransport, devices: &dyn MediaDevices) -> bool {
        if self.state == CallState::NoCall {
            return false;
        }
        if let Some(media) = self.local_media.take() {
            devices.release(&media);
        }
        self.reset(transport);
        true
    }

    /// The remote side hung up `call`.
    pub fn remote_hung_up(
        &mut self,
        call: CallId,
        transport: &dyn PeerTransport,
        devices: &dyn MediaDevices,
    ) -> bool {
        if self.call != Some(call) {
            return false;
        }
        info!(%call, "remote hung up");
        self.end(transport, devices)
    }

    fn reset(&mut self, transport: &dyn PeerTransport) {
        if let Some(call) = self.call.take() {
            transport.hang_up(call);
        }
        self.remote_media = None;
        self.direction = None;
        self.state = CallState::NoCall;
        // Invalidate any acquisition still in flight.
        self.attempt += 1;
    }
}
