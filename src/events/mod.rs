pub mod channel;

pub use channel::{
    EventPublisher, EventSubscriber, MemoryChannel, MemorySubscriber, SocketPublisher,
    SocketSubscriber,
};

use serde::{Deserialize, Serialize};

/// Recognition outcome carried on the event topic. Never persisted.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum RecognitionEvent {
    Recognized {
        user_id: String,
        name: Option<String>,
        camera_id: String,
    },
    Unrecognized {
        camera_id: String,
    },
}

impl RecognitionEvent {
    pub fn camera_id(&self) -> &str {
        match self {
            RecognitionEvent::Recognized { camera_id, .. }
            | RecognitionEvent::Unrecognized { camera_id } => camera_id,
        }
    }

    pub fn to_json(&self) -> crate::common::Result<String> {
        serde_json::to_string(self)
            .map_err(|e| crate::common::GateError::Protocol(format!("event encode: {}", e)))
    }

    pub fn from_json(data: &[u8]) -> crate::common::Result<Self> {
        serde_json::from_slice(data)
            .map_err(|e| crate::common::GateError::Protocol(format!("event decode: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wire_format_matches_topic_contract() {
        let recognized = RecognitionEvent::Recognized {
            user_id: "alice".into(),
            name: Some("Alice".into()),
            camera_id: "entry-1".into(),
        };
        let value: serde_json::Value = serde_json::from_str(&recognized.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"event": "recognized", "user_id": "alice", "name": "Alice", "camera_id": "entry-1"})
        );

        let unrecognized = RecognitionEvent::Unrecognized { camera_id: "exit-2".into() };
        let value: serde_json::Value = serde_json::from_str(&unrecognized.to_json().unwrap()).unwrap();
        assert_eq!(value, json!({"event": "unrecognized", "camera_id": "exit-2"}));
    }

    #[test]
    fn decodes_events_from_other_publishers() {
        let event = RecognitionEvent::from_json(
            br#"{"event":"recognized","user_id":"u7","name":null,"camera_id":"fp"}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            RecognitionEvent::Recognized { user_id: "u7".into(), name: None, camera_id: "fp".into() }
        );
        assert!(RecognitionEvent::from_json(br#"{"event":"exploded"}"#).is_err());
    }
}
