//! Line framing and inbound message decoding
//!
//! The wire protocol is one UTF-8 JSON object per newline-terminated line.
//! Framing itself is `tokio_util`'s `LinesCodec` with a maximum line length;
//! this module holds the limits and the decode step from a raw line to a
//! `ClientMessage`. Decoding never panics and never kills the stream:
//! malformed input is classified into an `AppError` the caller reports back
//! to the peer.

use serde_json::Value;

use crate::error::AppError;
use crate::message::ClientMessage;

/// Maximum accepted inbound line length in bytes (excluding the newline)
pub const MAX_LINE_BYTES: usize = 256 * 1024;

/// Message `type` tags the server understands
const KNOWN_TYPES: &[&str] = &[
    "hello",
    "join",
    "msg",
    "pm",
    "list_rooms",
    "list_users",
    "file_start",
    "file_chunk",
    "file_end",
];

/// Decode one line into a `ClientMessage`
///
/// Fails with `InvalidJson` when the line is not JSON, not an object, lacks
/// a string `type` field, or has a wrongly-typed field; fails with
/// `UnknownType` when the object is well-formed but the tag is unrecognized.
pub fn decode_line(line: &str) -> Result<ClientMessage, AppError> {
    let value: Value = serde_json::from_str(line).map_err(|_| AppError::InvalidJson)?;

    let mtype = value
        .as_object()
        .and_then(|obj| obj.get("type"))
        .and_then(Value::as_str)
        .ok_or(AppError::InvalidJson)?;

    if !KNOWN_TYPES.contains(&mtype) {
        return Err(AppError::UnknownType(mtype.to_string()));
    }

    serde_json::from_value(value).map_err(|_| AppError::InvalidJson)
}
