//! Message protocol definitions
//!
//! Newline-delimited JSON protocol using Serde's tagged enums for
//! type-safe serialization/deserialization. Every outbound event carries
//! an RFC 3339 UTC timestamp in its `ts` field.

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Current UTC timestamp in the wire format
pub fn utc_ts() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Client → Server message
///
/// All inbound message types. Fields default when absent so that
/// validation can produce specific errors instead of schema failures,
/// e.g. a `hello` without a name reports an invalid name.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Claim a display name (required before most operations)
    Hello {
        #[serde(default)]
        name: String,
    },
    /// Join (or switch to) a room
    Join {
        #[serde(default)]
        room: String,
    },
    /// Send a chat message to the current room
    Msg {
        #[serde(default)]
        text: String,
    },
    /// Send a private message to a named connection
    Pm {
        #[serde(default)]
        to: String,
        #[serde(default)]
        text: String,
    },
    /// Request the sorted list of rooms
    ListRooms,
    /// Request the sorted member list of the current room
    ListUsers,
    /// Begin relaying a file to the current room
    FileStart {
        #[serde(default)]
        filename: String,
        #[serde(default)]
        size: i64,
    },
    /// Relay one base64-encoded chunk of an active transfer
    FileChunk {
        #[serde(default)]
        id: String,
        #[serde(default)]
        seq: i64,
        #[serde(default)]
        data: String,
    },
    /// Finish an active transfer
    FileEnd {
        #[serde(default)]
        id: String,
    },
}

/// Server → Client event
///
/// All outbound event types. Uses tagged enum with snake_case naming.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Informational notice
    Info { text: String, ts: String },
    /// Error notice (connection usually stays open)
    Error { text: String, ts: String },
    /// Room chat message
    Msg {
        room: String,
        from: String,
        text: String,
        ts: String,
    },
    /// Private message
    Pm {
        from: String,
        text: String,
        ts: String,
    },
    /// Sorted room names
    RoomList { rooms: Vec<String>, ts: String },
    /// Sorted member names of a room (`room` omitted when not joined)
    UserList {
        #[serde(skip_serializing_if = "Option::is_none")]
        room: Option<String>,
        users: Vec<String>,
        ts: String,
    },
    /// Transfer id issued to the uploader
    FileAck { id: String, ts: String },
    /// Relayed transfer announcement
    FileStart {
        id: String,
        from: String,
        room: String,
        filename: String,
        size: u64,
        ts: String,
    },
    /// Relayed transfer chunk, unmodified
    FileChunk {
        id: String,
        seq: i64,
        data: String,
        from: String,
        ts: String,
    },
    /// Relayed end of transfer
    FileEnd {
        id: String,
        from: String,
        ts: String,
    },
}

impl ServerMessage {
    /// Informational notice stamped with the current time
    pub fn info(text: impl Into<String>) -> Self {
        Self::Info {
            text: text.into(),
            ts: utc_ts(),
        }
    }

    /// Error notice stamped with the current time
    pub fn error(text: impl Into<String>) -> Self {
        Self::Error {
            text: text.into(),
            ts: utc_ts(),
        }
    }
}

/// Convert AppError to ServerMessage for client notification
impl From<AppError> for ServerMessage {
    fn from(err: AppError) -> Self {
        ServerMessage::error(err.to_string())
    }
}
