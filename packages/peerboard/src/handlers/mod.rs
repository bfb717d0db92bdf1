pub mod health;
pub mod presence;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use ::presence::wire::ErrorResponse;

// Re-export all handlers for easy route registration
pub use self::health::{health_handler, metrics_handler};
pub use self::presence::{list_users_handler, register_handler, unregister_handler};

/// A failed API call: a status code and a `{success:false, error}` body.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorResponse::new(self.message))).into_response()
    }
}
