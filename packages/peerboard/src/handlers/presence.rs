use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    response::IntoResponse,
};
use tracing::{debug, warn};

use ::presence::PresenceError;
use ::presence::wire::{RegisterRequest, RegisterResponse, UnregisterResponse};
use peer_session::PeerId;

use super::ApiError;
use crate::AppState;

/// Announce a peer. Re-registering the same id overwrites its entry.
pub async fn register_handler(
    State(state): State<AppState>,
    body: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = body.map_err(|rejection| {
        state.metrics.registration_rejected();
        debug!(error = %rejection.body_text(), "malformed register request");
        ApiError::bad_request(rejection.body_text())
    })?;

    match state.directory.register(req.peer_id, req.username).await {
        Ok(entry) => {
            state.metrics.registered();
            Ok(Json(RegisterResponse {
                success: true,
                peer_id: entry.peer_id,
            }))
        }
        Err(e) => {
            if !matches!(e, PresenceError::EmptyPeerId) {
                warn!(error = %e, "register failed");
            }
            state.metrics.registration_rejected();
            Err(ApiError::bad_request(e.to_string()))
        }
    }
}

/// Remove a peer. Unknown ids succeed too.
pub async fn unregister_handler(
    State(state): State<AppState>,
    Path(peer_id): Path<String>,
) -> impl IntoResponse {
    let removed = state.directory.unregister(&PeerId::from(peer_id)).await;
    state.metrics.unregistered(removed);
    Json(UnregisterResponse { success: true })
}

/// Every announced peer. Clients filter themselves out.
pub async fn list_users_handler(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics.listed();
    Json(state.directory.list().await)
}
