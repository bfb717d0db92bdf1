use std::ops::ControlFlow;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::call::MediaRequest;
use crate::chat::ChatEntry;
use crate::coordinator::{Effect, SessionConfig, SessionCoordinator, SessionSnapshot, SessionUpdate};
use crate::error::{MediaError, SessionError};
use crate::transport::{MediaDevices, MediaHandle, PeerId, PeerTransport, TransportEvent};
use crate::whiteboard::{Color, Point, Tool};

/// Commands that can be sent to a session actor
#[derive(Debug)]
pub enum SessionCommand {
    ConnectTo {
        remote: PeerId,
        respond_to: oneshot::Sender<Result<(), SessionError>>,
    },
    Disconnect {
        respond_to: oneshot::Sender<bool>,
    },
    SendChat {
        text: String,
        respond_to: oneshot::Sender<Option<ChatEntry>>,
    },
    PointerDown {
        at: Point,
    },
    PointerMove {
        at: Point,
    },
    PointerUp,
    SetTool {
        tool: Tool,
    },
    SetColor {
        color: Color,
    },
    SetLineWidth {
        width: f32,
    },
    ClearWhiteboard {
        respond_to: oneshot::Sender<bool>,
    },
    StartCall {
        respond_to: oneshot::Sender<Result<(), SessionError>>,
    },
    EndCall {
        respond_to: oneshot::Sender<bool>,
    },
    Snapshot {
        respond_to: oneshot::Sender<SessionSnapshot>,
    },
    ExportPng {
        respond_to: oneshot::Sender<Result<Vec<u8>, SessionError>>,
    },
    Shutdown {
        respond_to: oneshot::Sender<()>,
    },
}

/// Result of a local media acquisition, re-entering the actor loop.
struct MediaReady {
    request: MediaRequest,
    result: Result<MediaHandle, MediaError>,
}

/// Handle to communicate with a session actor
#[derive(Clone)]
pub struct SessionHandle {
    sender: mpsc::Sender<SessionCommand>,
    updates: broadcast::Sender<SessionUpdate>,
    local_id: PeerId,
}

impl SessionHandle {
    pub fn local_id(&self) -> &PeerId {
        &self.local_id
    }

    /// Receive every [`SessionUpdate`] published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionUpdate> {
        self.updates.subscribe()
    }

    pub async fn connect_to(&self, remote: impl Into<PeerId>) -> Result<(), SessionError> {
        let remote = remote.into();
        self.request(|respond_to| SessionCommand::ConnectTo { remote, respond_to })
            .await?
    }

    pub async fn disconnect(&self) -> Result<bool, SessionError> {
        self.request(|respond_to| SessionCommand::Disconnect { respond_to })
            .await
    }

    /// Send a chat line. `Ok(None)` if it was blank or no session is connected.
    pub async fn send_chat(&self, text: impl Into<String>) -> Result<Option<ChatEntry>, SessionError> {
        let text = text.into();
        self.request(|respond_to| SessionCommand::SendChat { text, respond_to })
            .await
    }

    pub async fn pointer_down(&self, at: Point) -> Result<(), SessionError> {
        self.tell(SessionCommand::PointerDown { at }).await
    }

    pub async fn pointer_move(&self, at: Point) -> Result<(), SessionError> {
        self.tell(SessionCommand::PointerMove { at }).await
    }

    pub async fn pointer_up(&self) -> Result<(), SessionError> {
        self.tell(SessionCommand::PointerUp).await
    }

    pub async fn set_tool(&self, tool: Tool) -> Result<(), SessionError> {
        self.tell(SessionCommand::SetTool { tool }).await
    }

    pub async fn set_color(&self, color: Color) -> Result<(), SessionError> {
        self.tell(SessionCommand::SetColor { color }).await
    }

    pub async fn set_line_width(&self, width: f32) -> Result<(), SessionError> {
        self.tell(SessionCommand::SetLineWidth { width }).await
    }

    pub async fn clear_whiteboard(&self) -> Result<bool, SessionError> {
        self.request(|respond_to| SessionCommand::ClearWhiteboard { respond_to })
            .await
    }

    /// Start an outgoing call. Returns once local media is being acquired;
    /// progress is reported through [`SessionUpdate::CallStateChanged`].
    pub async fn start_call(&self) -> Result<(), SessionError> {
        self.request(|respond_to| SessionCommand::StartCall { respond_to })
            .await?
    }

    pub async fn end_call(&self) -> Result<bool, SessionError> {
        self.request(|respond_to| SessionCommand::EndCall { respond_to })
            .await
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, SessionError> {
        self.request(|respond_to| SessionCommand::Snapshot { respond_to })
            .await
    }

    pub async fn export_png(&self) -> Result<Vec<u8>, SessionError> {
        self.request(|respond_to| SessionCommand::ExportPng { respond_to })
            .await?
    }

    /// Tear the session down and wait for it. Calling it twice is harmless.
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self
            .sender
            .send(SessionCommand::Shutdown { respond_to: tx })
            .await
            .is_ok()
        {
            let _ = rx.await;
        }
    }

    async fn tell(&self, command: SessionCommand) -> Result<(), SessionError> {
        self.sender
            .send(command)
            .await
            .map_err(|_| SessionError::ActorGone)
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> SessionCommand,
    ) -> Result<T, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.tell(make(tx)).await?;
        rx.await.map_err(|_| SessionError::ActorGone)
    }
}

/// Runs one [`SessionCoordinator`] on its own task.
///
/// UI commands, transport events and media completions are handled one at a
/// time, so the coordinator is never touched concurrently.
pub struct SessionActor {
    coordinator: SessionCoordinator,
    devices: Arc<dyn MediaDevices>,
    commands: mpsc::Receiver<SessionCommand>,
    events: mpsc::UnboundedReceiver<TransportEvent>,
    media_tx: mpsc::UnboundedSender<MediaReady>,
    media_rx: mpsc::UnboundedReceiver<MediaReady>,
    updates: broadcast::Sender<SessionUpdate>,
    /// Cancels media acquisitions still in flight at teardown.
    cancel: CancellationToken,
}

impl SessionActor {
    /// Spawn a new session actor and return its handle. Must be called from
    /// within a tokio runtime.
    pub fn spawn(
        config: SessionConfig,
        transport: Arc<dyn PeerTransport>,
        events: mpsc::UnboundedReceiver<TransportEvent>,
        devices: Arc<dyn MediaDevices>,
    ) -> SessionHandle {
        let (actor, handle) = Self::new(config, transport, events, devices);
        tokio::spawn(async move {
            actor.run().await;
        });
        handle
    }

    fn new(
        config: SessionConfig,
        transport: Arc<dyn PeerTransport>,
        events: mpsc::UnboundedReceiver<TransportEvent>,
        devices: Arc<dyn MediaDevices>,
    ) -> (Self, SessionHandle) {
        let local_id = transport.local_id().clone();
        let (sender, commands) = mpsc::channel(64);
        let (updates, _) = broadcast::channel(config.update_capacity.max(1));
        let (media_tx, media_rx) = mpsc::unbounded_channel();

        let actor = SessionActor {
            coordinator: SessionCoordinator::new(&config, transport, devices.clone()),
            devices,
            commands,
            events,
            media_tx,
            media_rx,
            updates: updates.clone(),
            cancel: CancellationToken::new(),
        };

        let handle = SessionHandle {
            sender,
            updates,
            local_id,
        };
        (actor, handle)
    }

    async fn run(mut self) {
        let local = self.coordinator.local_id().clone();
        debug!(peer = %local, "session actor started");

        let mut shutdown_ack = None;
        loop {
            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => {
                        if let ControlFlow::Break(ack) = self.handle_command(cmd) {
                            shutdown_ack = Some(ack);
                            break;
                        }
                    }
                    None => {
                        debug!(peer = %local, "all session handles dropped");
                        break;
                    }
                },
                Some(event) = self.events.recv() => {
                    let effects = self.coordinator.handle_transport_event(event);
                    self.run_effects(effects);
                }
                Some(ready) = self.media_rx.recv() => {
                    self.coordinator.media_acquired(ready.request, ready.result);
                }
            }
            self.publish();
        }

        self.teardown();
        info!(peer = %local, "session actor stopped");
        if let Some(ack) = shutdown_ack {
            let _ = ack.send(());
        }
    }

    /// Stop in-flight acquisitions, shut the coordinator down and release any
    /// media that finished acquiring but was never handed to it.
    fn teardown(&mut self) {
        self.cancel.cancel();
        self.coordinator.shutdown();
        self.media_rx.close();
        while let Ok(ready) = self.media_rx.try_recv() {
            if let Ok(media) = ready.result {
                debug!(media = %media.label, attempt = ready.request.attempt, "releasing media acquired during teardown");
                self.devices.release(&media);
            }
        }
        self.publish();
    }

    /// Apply one command. `Break` carries the acknowledgement for a shutdown.
    fn handle_command(&mut self, cmd: SessionCommand) -> ControlFlow<oneshot::Sender<()>> {
        match cmd {
            SessionCommand::ConnectTo { remote, respond_to } => {
                let _ = respond_to.send(self.coordinator.connect_to(remote));
            }
            SessionCommand::Disconnect { respond_to } => {
                let _ = respond_to.send(self.coordinator.disconnect());
            }
            SessionCommand::SendChat { text, respond_to } => {
                let _ = respond_to.send(self.coordinator.send_chat(&text));
            }
            SessionCommand::PointerDown { at } => self.coordinator.pointer_down(at),
            SessionCommand::PointerMove { at } => {
                self.coordinator.pointer_move(at);
            }
            SessionCommand::PointerUp => self.coordinator.pointer_up(),
            SessionCommand::SetTool { tool } => self.coordinator.set_tool(tool),
            SessionCommand::SetColor { color } => self.coordinator.set_color(color),
            SessionCommand::SetLineWidth { width } => self.coordinator.set_line_width(width),
            SessionCommand::ClearWhiteboard { respond_to } => {
                let _ = respond_to.send(self.coordinator.clear_whiteboard());
            }
            SessionCommand::StartCall { respond_to } => {
                let result = self
                    .coordinator
                    .start_call()
                    .map(|request| self.run_effects(vec![Effect::AcquireMedia(request)]));
                let _ = respond_to.send(result);
            }
            SessionCommand::EndCall { respond_to } => {
                let _ = respond_to.send(self.coordinator.end_call());
            }
            SessionCommand::Snapshot { respond_to } => {
                let _ = respond_to.send(self.coordinator.snapshot());
            }
            SessionCommand::ExportPng { respond_to } => {
                let _ = respond_to.send(self.coordinator.export_png().map_err(Into::into));
            }
            SessionCommand::Shutdown { respond_to } => return ControlFlow::Break(respond_to),
        }
        ControlFlow::Continue(())
    }

    fn run_effects(&self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::AcquireMedia(request) => self.acquire_media(request),
            }
        }
    }

    fn acquire_media(&self, request: MediaRequest) {
        let devices = self.devices.clone();
        let tx = self.media_tx.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let result = tokio::select! {
                result = devices.acquire_local_media() => result,
                _ = cancel.cancelled() => return,
            };
            // The actor is gone: nobody else will release this stream.
            if let Err(mpsc::error::SendError(ready)) = tx.send(MediaReady { request, result }) {
                if let Ok(media) = ready.result {
                    devices.release(&media);
                }
            }
        });
    }

    fn publish(&mut self) {
        for update in self.coordinator.take_updates() {
            // No subscribers is fine.
            let _ = self.updates.send(update);
        }
    }
}
