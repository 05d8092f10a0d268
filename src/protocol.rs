//! WebSocket wire protocol.
//!
//! Every frame is a JSON text message tagged with a `type` field. Raw
//! terminal bytes travel base64-encoded so arbitrary binary output survives
//! the JSON layer intact.

use serde::{Deserialize, Serialize};

use crate::screen::state::{Format, SnapshotResponse};

/// Client → Server commands.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    /// Subscribe to a session's output stream.
    Join {
        session_id: String,
        #[serde(default)]
        format: Format,
    },
    /// Unsubscribe from a session without affecting the session itself.
    Leave { session_id: String },
    /// Write keyboard bytes to the session's subprocess.
    Input {
        session_id: String,
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },
    /// Change the session's terminal dimensions.
    Resize {
        session_id: String,
        cols: u16,
        rows: u16,
    },
    /// Tear the session down for every subscriber.
    Terminate { session_id: String },
}

/// Server → Client events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Join succeeded; `snapshot` is the screen contents at the moment of
    /// joining. Output events that follow carry only bytes produced after it.
    Joined {
        session_id: String,
        snapshot: serde_json::Value,
    },
    /// The connection is no longer subscribed to the session.
    Left { session_id: String },
    /// A chunk of raw subprocess output.
    Output {
        session_id: String,
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },
    /// Dimensions changed, whether by this subscriber or another.
    Resized {
        session_id: String,
        cols: u16,
        rows: u16,
    },
    /// The session ended. `exit_status` is absent when the subprocess's exit
    /// code could not be collected.
    Terminated {
        session_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        exit_status: Option<u32>,
    },
    /// A command failed. The connection stays open.
    Error {
        code: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
}

impl ServerEvent {
    pub fn joined(session_id: &str, snapshot: &SnapshotResponse) -> Self {
        Self::Joined {
            session_id: session_id.to_string(),
            snapshot: serde_json::to_value(snapshot).unwrap_or(serde_json::Value::Null),
        }
    }

    pub fn error(code: &str, message: impl Into<String>, session_id: Option<&str>) -> Self {
        Self::Error {
            code: code.to_string(),
            message: message.into(),
            session_id: session_id.map(str::to_string),
        }
    }
}

/// Serde helper for base64-encoded byte vectors in JSON.
pub mod base64_bytes {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
        serializer.serialize_str(&encoded)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(&s)
            .map_err(serde::de::Error::custom)
    }
}
