//! Error types for the relay server
//!
//! Defines the protocol-level error taxonomy and delivery errors.
//! Uses thiserror for ergonomic error definitions; the Display string of
//! each variant is exactly the text sent to the client in an `error` event.

use thiserror::Error;

/// Protocol-level errors reported to the offending connection
///
/// None of these are fatal to the process. Framing errors (`LineTooLong`)
/// additionally close the connection, since byte-accurate resynchronization
/// after an oversize line is not attempted; everything else leaves the
/// connection open.
#[derive(Debug, Error)]
pub enum AppError {
    /// Line was not valid JSON, not an object, or missing the `type` field
    #[error("Invalid JSON or schema")]
    InvalidJson,

    /// Well-formed message with an unrecognized `type` tag
    #[error("Unknown type={0}")]
    UnknownType(String),

    /// Inbound line exceeded the framing limit (connection is closed)
    #[error("Message is too long")]
    LineTooLong,

    /// Name is empty, too long, or contains whitespace
    #[error("Invalid name (max 32 chars, no spaces)")]
    NameInvalid,

    /// Another connection already holds this name
    #[error("Name already taken")]
    NameTaken,

    /// Acting before a successful hello
    #[error("Send hello first")]
    NotAuthenticated,

    /// Room name is empty or too long
    #[error("Invalid room name")]
    RoomNameInvalid,

    /// Acting before joining a room
    #[error("Join a room first")]
    NotInRoom,

    /// Chat message exceeds the text length limit
    #[error("Message too long")]
    MessageTooLong,

    /// Private message is missing the recipient or the text
    #[error("PM format: to + text")]
    PmFormat,

    /// Private message recipient is not connected
    #[error("User {0} not found")]
    UserNotFound(String),

    /// File transfer attempted without a name and room
    #[error("File transfer requires hello + join")]
    FileNotInRoom,

    /// Bad filename or size on file_start
    #[error("Invalid file (name/size)")]
    FileMetadataInvalid,

    /// file_chunk/file_end referencing a transfer id that was never started
    #[error("Unknown file id")]
    UnknownTransfer,

    /// Transfer exists but belongs to a different connection or room
    #[error("Forbidden {0}")]
    Forbidden(&'static str),

    /// Chunk payload exceeds the encoded length limit
    #[error("Chunk too large")]
    ChunkTooLarge,

    /// Chunk payload is not valid base64
    #[error("Invalid base64")]
    InvalidBase64,

    /// Inbound event channel is full
    #[error("Server overloaded (events queue)")]
    Overloaded,
}

/// Outbound delivery errors
///
/// Returned by `Client::try_deliver` when the bounded outbound queue
/// cannot accept an event.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The recipient's outbound queue is at capacity (event is dropped)
    #[error("Outbound queue full")]
    QueueFull,

    /// The recipient's writer has terminated
    #[error("Connection closed")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_texts_match_wire_protocol() {
        assert_eq!(AppError::InvalidJson.to_string(), "Invalid JSON or schema");
        assert_eq!(
            AppError::UnknownType("frobnicate".to_string()).to_string(),
            "Unknown type=frobnicate"
        );
        assert_eq!(AppError::NotAuthenticated.to_string(), "Send hello first");
        assert_eq!(
            AppError::UserNotFound("carol".to_string()).to_string(),
            "User carol not found"
        );
        assert_eq!(
            AppError::Forbidden("file_chunk").to_string(),
            "Forbidden file_chunk"
        );
    }
}
