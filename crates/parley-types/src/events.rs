use serde::{Deserialize, Serialize};

use crate::models::Message;

/// Events sent FROM server TO client over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum GatewayEvent {
    /// A message was persisted and is being fanned out to the room
    NewMessage(Message),
}

/// Commands sent FROM client TO server over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum GatewayCommand {
    /// Bind a display name to this connection and enter the room
    Join { username: String },

    /// Post a message to the room
    SendMessage { content: String, sender: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use uuid::Uuid;

    #[test]
    fn new_message_wire_shape() {
        let id = Uuid::new_v4();
        let event = GatewayEvent::NewMessage(Message {
            id,
            content: "hi".into(),
            sender: "alice".into(),
            timestamp: chrono::Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap(),
        });

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "newMessage");
        assert_eq!(json["data"]["id"], id.to_string());
        assert_eq!(json["data"]["content"], "hi");
        assert_eq!(json["data"]["sender"], "alice");
        assert_eq!(json["data"]["timestamp"], "2024-01-02T03:04:05Z");
    }

    #[test]
    fn parses_client_commands() {
        let join: GatewayCommand =
            serde_json::from_str(r#"{"type":"join","data":{"username":"bob"}}"#).unwrap();
        assert!(matches!(join, GatewayCommand::Join { ref username } if username == "bob"));

        let send: GatewayCommand = serde_json::from_str(
            r#"{"type":"sendMessage","data":{"content":"yo","sender":"bob"}}"#,
        )
        .unwrap();
        match send {
            GatewayCommand::SendMessage { content, sender } => {
                assert_eq!(content, "yo");
                assert_eq!(sender, "bob");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn rejects_unknown_command() {
        assert!(serde_json::from_str::<GatewayCommand>(r#"{"type":"typing","data":{}}"#).is_err());
    }
}
