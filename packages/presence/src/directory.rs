use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, broadcast};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use peer_session::PeerId;

use crate::error::PresenceError;

/// One announced peer. Serialized the way browser clients expect it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceEntry {
    #[serde(rename = "peerId")]
    pub peer_id: PeerId,
    #[serde(rename = "username")]
    pub display_name: String,
    #[serde(rename = "connectedAt")]
    pub registered_at: DateTime<Utc>,
}

/// Registry of currently announced peers.
///
/// At most one entry exists per peer id. Implementations serialize their own
/// mutations; callers never coordinate.
#[async_trait]
pub trait PresenceDirectory: Send + Sync + 'static {
    /// Insert or overwrite the entry for `peer_id`.
    async fn register(
        &self,
        peer_id: PeerId,
        display_name: String,
    ) -> Result<PresenceEntry, PresenceError>;

    /// Remove `peer_id`. Returns whether an entry existed; absence is not an error.
    async fn unregister(&self, peer_id: &PeerId) -> bool;

    /// Snapshot of every entry, oldest registration first.
    async fn list(&self) -> Vec<PresenceEntry>;

    async fn len(&self) -> usize {
        self.list().await.len()
    }
}

/// Process-local directory behind a single lock.
#[derive(Default)]
pub struct InMemoryDirectory {
    entries: RwLock<HashMap<PeerId, PresenceEntry>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PresenceDirectory for InMemoryDirectory {
    async fn register(
        &self,
        peer_id: PeerId,
        display_name: String,
    ) -> Result<PresenceEntry, PresenceError> {
        if peer_id.as_str().trim().is_empty() {
            return Err(PresenceError::EmptyPeerId);
        }
        let entry = PresenceEntry {
            peer_id: peer_id.clone(),
            display_name,
            registered_at: Utc::now(),
        };
        let previous = self
            .entries
            .write()
            .await
            .insert(peer_id.clone(), entry.clone());
        if previous.is_some() {
            debug!(peer = %peer_id, name = %entry.display_name, "peer re-registered");
        } else {
            info!(peer = %peer_id, name = %entry.display_name, "peer registered");
        }
        Ok(entry)
    }

    async fn unregister(&self, peer_id: &PeerId) -> bool {
        let removed = self.entries.write().await.remove(peer_id).is_some();
        if removed {
            info!(peer = %peer_id, "peer unregistered");
        }
        removed
    }

    async fn list(&self) -> Vec<PresenceEntry> {
        let mut entries: Vec<PresenceEntry> =
            self.entries.read().await.values().cloned().collect();
        entries.sort_by(|a, b| {
            a.registered_at
                .cmp(&b.registered_at)
                .then_with(|| a.peer_id.cmp(&b.peer_id))
        });
        entries
    }

    async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

/// Everyone but `self_id`.
pub fn exclude_self(entries: Vec<PresenceEntry>, self_id: &PeerId) -> Vec<PresenceEntry> {
    entries
        .into_iter()
        .filter(|entry| &entry.peer_id != self_id)
        .collect()
}

/// Unregister every peer reported on `disconnects` until the stream closes or
/// `cancel` fires.
pub async fn unregister_on_disconnect(
    directory: Arc<dyn PresenceDirectory>,
    mut disconnects: broadcast::Receiver<PeerId>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            received = disconnects.recv() => match received {
                Ok(peer_id) => {
                    if directory.unregister(&peer_id).await {
                        debug!(peer = %peer_id, "unregistered after transport disconnect");
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "disconnect listener lagged, some peers may linger until they unregister");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
    debug!("disconnect listener stopped");
}
