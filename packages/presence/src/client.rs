use std::time::Duration;

use reqwest::Url;
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use peer_session::PeerId;

use crate::directory::{PresenceEntry, exclude_self};
use crate::error::PresenceError;
use crate::wire::{ErrorResponse, HealthResponse, RegisterRequest};

/// HTTP client for a presence server.
#[derive(Clone, Debug)]
pub struct PresenceClient {
    http: reqwest::Client,
    base_url: Url,
}

impl PresenceClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, PresenceError> {
        let base_url =
            Url::parse(base_url).map_err(|_| PresenceError::InvalidUrl(base_url.to_string()))?;
        if base_url.cannot_be_a_base() {
            return Err(PresenceError::InvalidUrl(base_url.to_string()));
        }
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(PresenceError::Http)?;
        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub async fn register(&self, peer_id: &PeerId, display_name: &str) -> Result<(), PresenceError> {
        let body = RegisterRequest {
            peer_id: peer_id.clone(),
            username: display_name.to_string(),
        };
        let resp = self
            .http
            .post(self.url(&["api", "register"])?)
            .json(&body)
            .send()
            .await
            .map_err(PresenceError::from_reqwest)?;
        check(resp).await?;
        Ok(())
    }

    pub async fn unregister(&self, peer_id: &PeerId) -> Result<(), PresenceError> {
        let resp = self
            .http
            .delete(self.url(&["api", "unregister", peer_id.as_str()])?)
            .send()
            .await
            .map_err(PresenceError::from_reqwest)?;
        check(resp).await?;
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<PresenceEntry>, PresenceError> {
        self.get_json(&["api", "users"]).await
    }

    /// Every announced peer except `self_id`.
    pub async fn list_others(&self, self_id: &PeerId) -> Result<Vec<PresenceEntry>, PresenceError> {
        Ok(exclude_self(self.list().await?, self_id))
    }

    pub async fn health(&self) -> Result<HealthResponse, PresenceError> {
        self.get_json(&["api", "health"]).await
    }

    async fn get_json<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T, PresenceError> {
        let resp = self
            .http
            .get(self.url(segments)?)
            .send()
            .await
            .map_err(PresenceError::from_reqwest)?;
        check(resp)
            .await?
            .json()
            .await
            .map_err(PresenceError::from_reqwest)
    }

    fn url(&self, segments: &[&str]) -> Result<Url, PresenceError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| PresenceError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

async fn check(resp: reqwest::Response) -> Result<reqwest::Response, PresenceError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let text = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorResponse>(&text)
        .map(|body| body.error)
        .unwrap_or(text);
    Err(PresenceError::Rejected {
        status: status.as_u16(),
        message,
    })
}

/// Keeps this peer announced and the list of other peers fresh.
///
/// Registers on start, polls every `interval`, and unregisters best-effort
/// when cancelled. Failures only log: the last good snapshot is kept and the
/// next tick tries again.
pub struct PresencePoller {
    client: PresenceClient,
    self_id: PeerId,
    display_name: String,
    interval: Duration,
}

impl PresencePoller {
    pub fn new(
        client: PresenceClient,
        self_id: PeerId,
        display_name: impl Into<String>,
        interval: Duration,
    ) -> Self {
        Self {
            client,
            self_id,
            display_name: display_name.into(),
            interval,
        }
    }

    pub fn spawn(
        self,
        cancel: CancellationToken,
    ) -> (watch::Receiver<Vec<PresenceEntry>>, JoinHandle<()>) {
        let (tx, rx) = watch::channel(Vec::new());
        let task = tokio::spawn(self.run(tx, cancel));
        (rx, task)
    }

    async fn run(self, tx: watch::Sender<Vec<PresenceEntry>>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut registered = false;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if !registered {
                match self.client.register(&self.self_id, &self.display_name).await {
                    Ok(()) => {
                        info!(peer = %self.self_id, "announced to presence server");
                        registered = true;
                    }
                    Err(e) => warn!(peer = %self.self_id, error = %e, "presence registration failed"),
                }
            }

            match self.client.list_others(&self.self_id).await {
                Ok(peers) => {
                    tx.send_if_modified(|current| {
                        if *current == peers {
                            false
                        } else {
                            *current = peers;
                            true
                        }
                    });
                }
                Err(e) => debug!(error = %e, "presence poll failed, keeping last snapshot"),
            }
        }

        if registered {
            if let Err(e) = self.client.unregister(&self.self_id).await {
                debug!(peer = %self.self_id, error = %e, "presence unregister failed");
            }
        }
        debug!(peer = %self.self_id, "presence poller stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_client() -> PresenceClient {
        // Port 1 is never served in test environments.
        PresenceClient::new("http://127.0.0.1:1", Duration::from_millis(500)).unwrap()
    }

    #[test]
    fn rejects_unusable_base_urls() {
        assert!(matches!(
            PresenceClient::new("not a url", Duration::from_secs(1)),
            Err(PresenceError::InvalidUrl(_))
        ));
        assert!(matches!(
            PresenceClient::new("mailto:someone@example.com", Duration::from_secs(1)),
            Err(PresenceError::InvalidUrl(_))
        ));
    }

    #[test]
    fn urls_are_joined_and_escaped() {
        let client = PresenceClient::new("http://host:3001/", Duration::from_secs(1)).unwrap();
        assert_eq!(
            client.url(&["api", "users"]).unwrap().as_str(),
            "http://host:3001/api/users"
        );
        assert_eq!(
            client.url(&["api", "unregister", "a/b c"]).unwrap().as_str(),
            "http://host:3001/api/unregister/a%2Fb%20c"
        );

        let prefixed = PresenceClient::new("http://host/presence", Duration::from_secs(1)).unwrap();
        assert_eq!(
            prefixed.url(&["api", "health"]).unwrap().as_str(),
            "http://host/presence/api/health"
        );
    }

    #[tokio::test]
    async fn unreachable_server_is_unavailable() {
        let err = unreachable_client().list().await.unwrap_err();
        assert!(matches!(err, PresenceError::Unavailable(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn poller_swallows_errors_and_stops_on_cancel() {
        let poller = PresencePoller::new(
            unreachable_client(),
            PeerId::from("me"),
            "me",
            Duration::from_millis(20),
        );
        let cancel = CancellationToken::new();
        let (rx, task) = poller.spawn(cancel.clone());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rx.borrow().is_empty());
        assert!(!task.is_finished());

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(3), task)
            .await
            .unwrap()
            .unwrap();
    }
}
