//! Two in-process peers driven end to end.
//!
//! Starts a presence server on an ephemeral port, announces `alice` and `bob`
//! through it, then has them chat, draw, call and disconnect over an
//! in-memory transport.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use peer_session::{
    CallState, Color, Direction, MemoryHub, PeerId, Point, SessionActor, SessionHandle, SessionState,
    SessionUpdate, SimulatedMedia, Tool,
};
use presence::{
    InMemoryDirectory, PresenceClient, PresenceDirectory, PresenceEntry, PresencePoller,
    unregister_on_disconnect,
};

use crate::AppState;
use crate::DemoArgs;
use crate::config::{FileConfig, PeerboardConfig, PresenceConfig};

const STEP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug)]
pub struct DemoReport {
    pub chat_messages: usize,
    pub export: Option<PathBuf>,
}

pub async fn run_demo(
    config: &PeerboardConfig,
    file_config: &FileConfig,
    args: &DemoArgs,
) -> Result<()> {
    let report = demo(config, file_config, args, CancellationToken::new()).await?;
    println!("Demo complete.");
    println!("  chat messages exchanged: {}", report.chat_messages);
    match report.export {
        Some(path) => println!("  whiteboard exported to {}", path.display()),
        None => println!("  whiteboard export skipped"),
    }
    Ok(())
}

struct DemoPeer {
    id: PeerId,
    name: &'static str,
    handle: SessionHandle,
    updates: broadcast::Receiver<SessionUpdate>,
    peers: watch::Receiver<Vec<PresenceEntry>>,
    poller: tokio::task::JoinHandle<()>,
    poller_cancel: CancellationToken,
}

/// Run the whole scenario. `shutdown` is cancelled on every exit, so the
/// server, the disconnect listener and both pollers never outlive the call.
pub async fn demo(
    config: &PeerboardConfig,
    file_config: &FileConfig,
    args: &DemoArgs,
    shutdown: CancellationToken,
) -> Result<DemoReport> {
    let _shutdown_guard = shutdown.clone().drop_guard();

    // Presence server on an ephemeral loopback port
    let directory: Arc<dyn PresenceDirectory> = Arc::new(InMemoryDirectory::new());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .context("Failed to bind demo presence server")?;
    let addr = listener.local_addr()?;
    let server = tokio::spawn(crate::serve(
        listener,
        AppState::new(directory.clone()),
        shutdown.clone(),
    ));
    info!("Demo presence server on http://{}", addr);

    let hub = MemoryHub::new();
    let listener_task = tokio::spawn(unregister_on_disconnect(
        directory.clone(),
        hub.subscribe_disconnects(),
        shutdown.child_token(),
    ));

    let presence = PresenceConfig {
        server_url: format!("http://{addr}"),
        poll_interval: Duration::from_millis(args.poll_interval_ms.max(10)),
        ..PresenceConfig::from_file(&file_config.presence)
    };
    let client = PresenceClient::new(&presence.server_url, presence.request_timeout)?;

    let mut alice = spawn_peer(&hub, "alice", file_config, &client, &presence, &shutdown)?;
    let mut bob = spawn_peer(&hub, "bob", file_config, &client, &presence, &shutdown)?;

    // Discovery
    futures::try_join!(
        wait_until_listed(&mut alice.peers, &bob.id),
        wait_until_listed(&mut bob.peers, &alice.id),
    )?;
    info!("{} and {} see each other", alice.name, bob.name);

    // Session
    alice.handle.connect_to(bob.id.clone()).await?;
    futures::try_join!(
        wait_for_update(&mut alice.updates, "alice connected", |u| is_state(
            u,
            SessionState::Connected
        )),
        wait_for_update(&mut bob.updates, "bob connected", |u| is_state(
            u,
            SessionState::Connected
        )),
    )?;

    // Chat
    alice.handle.send_chat("hi bob, can you see the board?").await?;
    wait_for_update(&mut bob.updates, "chat at bob", is_received_chat).await?;
    bob.handle.send_chat("yes, drawing now").await?;
    wait_for_update(&mut alice.updates, "chat at alice", is_received_chat).await?;

    // Whiteboard
    let (w, h) = (
        file_config.whiteboard.width as f32,
        file_config.whiteboard.height as f32,
    );
    bob.handle.set_color(Color::rgb(30, 90, 200)).await?;
    bob.handle.set_line_width(6.0).await?;
    bob.handle.pointer_down(Point::new(w * 0.1, h * 0.5)).await?;
    for step in 1..=8 {
        let t = step as f32 / 8.0;
        bob.handle
            .pointer_move(Point::new(w * (0.1 + 0.8 * t), h * (0.5 - 0.3 * t)))
            .await?;
    }
    bob.handle.pointer_up().await?;
    // Erasing is order sensitive: let the pen stroke land on both boards first.
    wait_for_convergence(&alice.handle, &bob.handle).await?;
    alice.handle.set_tool(Tool::Eraser).await?;
    alice.handle.set_line_width(20.0).await?;
    alice.handle.pointer_down(Point::new(w * 0.5, h * 0.1)).await?;
    alice.handle.pointer_move(Point::new(w * 0.5, h * 0.9)).await?;
    alice.handle.pointer_up().await?;

    let png = wait_for_convergence(&alice.handle, &bob.handle).await?;
    let export = if args.no_export {
        None
    } else {
        let path = config.export_path(alice.name);
        tokio::fs::write(&path, &png)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Some(path)
    };

    // Call
    alice.handle.start_call().await?;
    futures::try_join!(
        wait_for_update(&mut alice.updates, "alice call active", |u| is_call(
            u,
            CallState::Active
        )),
        wait_for_update(&mut bob.updates, "bob call active", |u| is_call(
            u,
            CallState::Active
        )),
    )?;
    info!("call active");
    bob.handle.end_call().await?;
    wait_for_update(&mut alice.updates, "alice call ended", |u| {
        is_call(u, CallState::NoCall)
    })
    .await?;

    // Bob leaves; the hub reports the disconnect and the directory drops him
    bob.handle.shutdown().await;
    wait_for_update(&mut alice.updates, "alice session closed", |u| {
        is_state(u, SessionState::Closed)
    })
    .await?;
    wait_until_absent(&mut alice.peers, &bob.id).await?;
    info!("{} left and was unregistered", bob.name);

    let chat_messages = alice.handle.snapshot().await?.chat.len();

    for peer in [alice, bob] {
        peer.poller_cancel.cancel();
        peer.poller.await.context("presence poller panicked")?;
        peer.handle.shutdown().await;
    }
    shutdown.cancel();
    listener_task.await.context("disconnect listener panicked")?;
    server.await.context("presence server panicked")??;

    Ok(DemoReport {
        chat_messages,
        export,
    })
}

fn spawn_peer(
    hub: &MemoryHub,
    name: &'static str,
    file_config: &FileConfig,
    client: &PresenceClient,
    presence: &PresenceConfig,
    shutdown: &CancellationToken,
) -> Result<DemoPeer> {
    let id = PeerId::new(Uuid::new_v4().to_string());
    let (transport, events) = hub.endpoint(id.clone())?;
    let session_config = file_config.whiteboard.session_config(Some(name.to_string()))?;
    let handle = SessionActor::spawn(
        session_config,
        transport,
        events,
        Arc::new(SimulatedMedia::new(name)),
    );
    let updates = handle.subscribe();

    let poller_cancel = shutdown.child_token();
    let (peers, poller) = PresencePoller::new(
        client.clone(),
        id.clone(),
        name,
        presence.poll_interval,
    )
    .spawn(poller_cancel.clone());

    Ok(DemoPeer {
        id,
        name,
        handle,
        updates,
        peers,
        poller,
        poller_cancel,
    })
}

fn is_state(update: &SessionUpdate, want: SessionState) -> bool {
    matches!(update, SessionUpdate::StateChanged { state, .. } if *state == want)
}

fn is_call(update: &SessionUpdate, want: CallState) -> bool {
    matches!(update, SessionUpdate::CallStateChanged(state) if *state == want)
}

fn is_received_chat(update: &SessionUpdate) -> bool {
    matches!(update, SessionUpdate::ChatAppended(entry) if entry.direction == Direction::Received)
}

async fn within<T>(what: &str, fut: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::time::timeout(STEP_TIMEOUT, fut)
        .await
        .with_context(|| format!("Timed out waiting for {what}"))?
}

async fn wait_for_update(
    updates: &mut broadcast::Receiver<SessionUpdate>,
    what: &str,
    pred: impl Fn(&SessionUpdate) -> bool,
) -> Result<()> {
    within(what, async {
        loop {
            match updates.recv().await {
                Ok(update) if pred(&update) => return Ok(()),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => {
                    bail!("session ended while waiting for {what}")
                }
            }
        }
    })
    .await
}

async fn wait_until_listed(
    peers: &mut watch::Receiver<Vec<PresenceEntry>>,
    id: &PeerId,
) -> Result<()> {
    within("presence listing", async {
        peers
            .wait_for(|list| list.iter().any(|entry| &entry.peer_id == id))
            .await
            .map(|_| ())
            .context("presence poller stopped")
    })
    .await
}

async fn wait_until_absent(
    peers: &mut watch::Receiver<Vec<PresenceEntry>>,
    id: &PeerId,
) -> Result<()> {
    within("presence removal", async {
        peers
            .wait_for(|list| list.iter().all(|entry| &entry.peer_id != id))
            .await
            .map(|_| ())
            .context("presence poller stopped")
    })
    .await
}

/// Poll both boards until their exports match.
async fn wait_for_convergence(a: &SessionHandle, b: &SessionHandle) -> Result<Vec<u8>> {
    within("whiteboard convergence", async {
        loop {
            let (left, right) = futures::try_join!(a.export_png(), b.export_png())?;
            if left == right {
                return Ok(left);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
}
