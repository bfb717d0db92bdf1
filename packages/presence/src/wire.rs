//! JSON bodies of the presence HTTP surface.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use peer_session::PeerId;

/// `POST /api/register`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub peer_id: PeerId,
    #[serde(default)]
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    pub success: bool,
    pub peer_id: PeerId,
}

/// `DELETE /api/unregister/{peerId}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnregisterResponse {
    pub success: bool,
}

/// Body of every 4xx/5xx response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
        }
    }
}

/// `GET /api/health`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_request_uses_browser_field_names() {
        let req: RegisterRequest =
            serde_json::from_str(r#"{"peerId":"A1","username":"alice"}"#).unwrap();
        assert_eq!(req.peer_id, PeerId::from("A1"));
        assert_eq!(req.username, "alice");

        let missing: RegisterRequest = serde_json::from_str(r#"{"peerId":"A1"}"#).unwrap();
        assert_eq!(missing.username, "");
    }

    #[test]
    fn register_response_shape() {
        let value = serde_json::to_value(RegisterResponse {
            success: true,
            peer_id: PeerId::from("A1"),
        })
        .unwrap();
        assert_eq!(value, serde_json::json!({"success": true, "peerId": "A1"}));
    }

    #[test]
    fn error_response_is_unsuccessful() {
        let value = serde_json::to_value(ErrorResponse::new("nope")).unwrap();
        assert_eq!(value, serde_json::json!({"success": false, "error": "nope"}));
    }
}
