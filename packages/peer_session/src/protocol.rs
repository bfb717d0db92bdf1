//! Application protocol multiplexed over the single peer data link.
//!
//! Every payload is a JSON object `{ "type": ..., "payload": ... }`:
//!
//! - `"message"` carries a [`ChatPayload`]
//! - `"whiteboard"` carries a [`StrokeEvent`]
//!
//! Unknown `type` values are dropped rather than treated as errors, so newer
//! peers can add message kinds without breaking older ones.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ProtocolError;
use crate::whiteboard::{Color, Point};

pub const CHAT_TAG: &str = "message";
pub const STROKE_TAG: &str = "whiteboard";

/// One chat message as it travels on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatPayload {
    /// Local millisecond timestamp of the sender, used only as a UI key.
    pub id: i64,
    pub text: String,
    pub sender: String,
    pub timestamp: DateTime<Utc>,
}

/// One whiteboard edit: a line segment or a full clear.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum StrokeEvent {
    Draw {
        from: Point,
        to: Point,
        color: Color,
        #[serde(rename = "lineWidth")]
        line_width: f32,
    },
    /// `line_width` is the tool width; the eraser removes `2 * line_width`.
    Erase {
        from: Point,
        to: Point,
        #[serde(rename = "lineWidth")]
        line_width: f32,
    },
    Clear,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ProtocolMessage {
    #[serde(rename = "message")]
    Chat(ChatPayload),
    #[serde(rename = "whiteboard")]
    Stroke(StrokeEvent),
}

impl ProtocolMessage {
    pub fn tag(&self) -> &'static str {
        match self {
            ProtocolMessage::Chat(_) => CHAT_TAG,
            ProtocolMessage::Stroke(_) => STROKE_TAG,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode one payload. Returns `Ok(None)` for well-formed messages of an
    /// unknown type.
    pub fn decode(bytes: &[u8]) -> Result<Option<Self>, ProtocolError> {
        let value: serde_json::Value = serde_json::from_slice(bytes)?;
        let tag = value
            .get("type")
            .and_then(|t| t.as_str())
            .ok_or(ProtocolError::MissingTag)?;

        match tag {
            CHAT_TAG | STROKE_TAG => Ok(Some(serde_json::from_value(value)?)),
            other => {
                debug!(tag = other, "ignoring message of unknown type");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn chat() -> ProtocolMessage {
        ProtocolMessage::Chat(ChatPayload {
            id: 1_700_000_000_000,
            text: "hello".into(),
            sender: "alice".into(),
            timestamp: Utc.timestamp_millis_opt(1_700_000_000_000).unwrap(),
        })
    }

    #[test]
    fn chat_wire_shape() {
        let value: serde_json::Value = serde_json::from_slice(&chat().encode().unwrap()).unwrap();
        assert_eq!(value["type"], "message");
        assert_eq!(value["payload"]["text"], "hello");
        assert_eq!(value["payload"]["sender"], "alice");
        assert_eq!(value["payload"]["id"], 1_700_000_000_000i64);
        assert!(value["payload"]["timestamp"].as_str().unwrap().starts_with("2023-11-14T"));
    }

    #[test]
    fn draw_wire_shape() {
        let msg = ProtocolMessage::Stroke(StrokeEvent::Draw {
            from: Point::new(1.0, 2.0),
            to: Point::new(3.0, 4.0),
            color: Color::rgb(0xff, 0x00, 0x80),
            line_width: 2.0,
        });
        let value: serde_json::Value = serde_json::from_slice(&msg.encode().unwrap()).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "type": "whiteboard",
                "payload": {
                    "action": "draw",
                    "from": { "x": 1.0, "y": 2.0 },
                    "to": { "x": 3.0, "y": 4.0 },
                    "color": "#ff0080",
                    "lineWidth": 2.0,
                }
            })
        );
    }

    #[test]
    fn clear_carries_only_the_tag() {
        let msg = ProtocolMessage::Stroke(StrokeEvent::Clear);
        let value: serde_json::Value = serde_json::from_slice(&msg.encode().unwrap()).unwrap();
        assert_eq!(
            value,
            serde_json::json!({ "type": "whiteboard", "payload": { "action": "clear" } })
        );
    }

    #[test]
    fn decodes_browser_erase_payload() {
        let raw = br#"{"type":"whiteboard","payload":{"action":"erase","from":{"x":10,"y":10},"to":{"x":20,"y":12.5},"lineWidth":4}}"#;
        let msg = ProtocolMessage::decode(raw).unwrap().unwrap();
        assert_eq!(
            msg,
            ProtocolMessage::Stroke(StrokeEvent::Erase {
                from: Point::new(10.0, 10.0),
                to: Point::new(20.0, 12.5),
                line_width: 4.0,
            })
        );
    }

    #[test]
    fn unknown_type_is_ignored() {
        let raw = br#"{"type":"reaction","payload":{"emoji":"+1"}}"#;
        assert!(ProtocolMessage::decode(raw).unwrap().is_none());
    }

    #[test]
    fn missing_type_is_an_error() {
        let raw = br#"{"payload":{"text":"hi"}}"#;
        assert!(matches!(
            ProtocolMessage::decode(raw),
            Err(ProtocolError::MissingTag)
        ));
    }

    #[test]
    fn bad_color_is_malformed() {
        let raw = br#"{"type":"whiteboard","payload":{"action":"draw","from":{"x":0,"y":0},"to":{"x":1,"y":1},"color":"teal","lineWidth":2}}"#;
        assert!(matches!(
            ProtocolMessage::decode(raw),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn garbage_is_malformed() {
        assert!(matches!(
            ProtocolMessage::decode(b"not json"),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn tag_matches_serialized_type() {
        let msg = chat();
        let value: serde_json::Value = serde_json::from_slice(&msg.encode().unwrap()).unwrap();
        assert_eq!(value["type"], msg.tag());
    }
}
