//! File-transfer registry
//!
//! Tracks in-flight relayed transfers by id. The server is a pure relay: it
//! never buffers or reassembles file bytes, it only validates that chunks
//! belong to an active transfer owned by the sending connection and forwards
//! them. State machine per id: absent → active (file_start) → absent
//! (file_end); records are also reaped when their uploader disconnects.

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::error::AppError;
use crate::types::{ClientId, TransferId};

/// Maximum filename length in characters (longer names are truncated)
pub const MAX_FILENAME_CHARS: usize = 200;

/// Maximum declared file size in bytes
pub const MAX_FILE_SIZE: i64 = 200 * 1024 * 1024;

/// Maximum encoded chunk payload length in characters
pub const MAX_CHUNK_CHARS: usize = 200_000;

/// Metadata of one active transfer
#[derive(Debug, Clone)]
pub struct Transfer {
    /// Connection that started the transfer
    pub uploader: ClientId,
    /// Uploader's display name at transfer start
    pub from: String,
    /// Room the transfer is bound to
    pub room: String,
    pub filename: String,
    pub size: u64,
    /// Timestamp of file_start, echoed in the relayed announcement
    pub started_ts: String,
}

/// Active transfers keyed by server-issued id
#[derive(Debug, Default)]
pub struct TransferRegistry {
    active: HashMap<TransferId, Transfer>,
}

impl TransferRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate metadata and open a new transfer
    ///
    /// The filename is trimmed and truncated to `MAX_FILENAME_CHARS` before
    /// the emptiness check; the declared size must be within `0..=MAX_FILE_SIZE`.
    pub fn start(
        &mut self,
        uploader: ClientId,
        from: String,
        room: String,
        raw_filename: &str,
        size: i64,
    ) -> Result<(TransferId, Transfer), AppError> {
        let filename: String = raw_filename.trim().chars().take(MAX_FILENAME_CHARS).collect();
        if filename.is_empty() || size < 0 || size > MAX_FILE_SIZE {
            return Err(AppError::FileMetadataInvalid);
        }

        let id = TransferId::generate();
        let transfer = Transfer {
            uploader,
            from,
            room,
            filename,
            size: size as u64,
            started_ts: crate::message::utc_ts(),
        };
        self.active.insert(id.clone(), transfer.clone());
        Ok((id, transfer))
    }

    /// Validate a chunk against an active transfer
    ///
    /// The record must exist and be owned by the calling connection in the
    /// same room; the payload must be bounded and strictly valid base64.
    /// Nothing is mutated; a valid chunk is simply cleared for relaying.
    pub fn check_chunk(
        &self,
        id: &TransferId,
        sender: ClientId,
        room: Option<&str>,
        data: &str,
    ) -> Result<&Transfer, AppError> {
        let transfer = self.owned(id, sender, room, "file_chunk")?;
        if data.chars().count() > MAX_CHUNK_CHARS {
            return Err(AppError::ChunkTooLarge);
        }
        if BASE64.decode(data).is_err() {
            return Err(AppError::InvalidBase64);
        }
        Ok(transfer)
    }

    /// Close a transfer, removing its record
    pub fn finish(
        &mut self,
        id: &TransferId,
        sender: ClientId,
        room: Option<&str>,
    ) -> Result<Transfer, AppError> {
        self.owned(id, sender, room, "file_end")?;
        self.active.remove(id).ok_or(AppError::UnknownTransfer)
    }

    /// Drop every transfer started by a departing connection
    ///
    /// Returns the number of reaped records. Without this, an uploader that
    /// disconnects before file_end would leak its record forever.
    pub fn reap_uploader(&mut self, uploader: ClientId) -> usize {
        let before = self.active.len();
        self.active.retain(|_, t| t.uploader != uploader);
        before - self.active.len()
    }

    /// Number of in-flight transfers
    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    fn owned(
        &self,
        id: &TransferId,
        sender: ClientId,
        room: Option<&str>,
        op: &'static str,
    ) -> Result<&Transfer, AppError> {
        let transfer = self.active.get(id).ok_or(AppError::UnknownTransfer)?;
        if transfer.uploader != sender || room != Some(transfer.room.as_str()) {
            return Err(AppError::Forbidden(op));
        }
        Ok(transfer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start_one(reg: &mut TransferRegistry, uploader: ClientId) -> TransferId {
        let (id, _) = reg
            .start(uploader, "alice".to_string(), "room1".to_string(), "pic.png", 1024)
            .unwrap();
        id
    }

    #[test]
    fn test_start_records_metadata() {
        let mut reg = TransferRegistry::new();
        let a = ClientId::new();

        let (id, transfer) = reg
            .start(a, "alice".to_string(), "room1".to_string(), "  pic.png  ", 1024)
            .unwrap();
        assert_eq!(transfer.filename, "pic.png");
        assert_eq!(transfer.size, 1024);
        assert_eq!(transfer.uploader, a);
        assert_eq!(reg.len(), 1);
        assert_eq!(id.0.len(), 32);
    }

    #[test]
    fn test_start_rejects_bad_metadata() {
        let mut reg = TransferRegistry::new();
        let a = ClientId::new();

        assert!(matches!(
            reg.start(a, "alice".into(), "room1".into(), "   ", 10),
            Err(AppError::FileMetadataInvalid)
        ));
        assert!(matches!(
            reg.start(a, "alice".into(), "room1".into(), "f", -1),
            Err(AppError::FileMetadataInvalid)
        ));
        assert!(matches!(
            reg.start(a, "alice".into(), "room1".into(), "f", MAX_FILE_SIZE + 1),
            Err(AppError::FileMetadataInvalid)
        ));
        assert!(reg.is_empty());
    }

    #[test]
    fn test_long_filename_truncated() {
        let mut reg = TransferRegistry::new();
        let a = ClientId::new();
        let long = "x".repeat(500);

        let (_, transfer) = reg
            .start(a, "alice".into(), "room1".into(), &long, 1)
            .unwrap();
        assert_eq!(transfer.filename.chars().count(), MAX_FILENAME_CHARS);
    }

    #[test]
    fn test_chunk_ownership() {
        let mut reg = TransferRegistry::new();
        let a = ClientId::new();
        let b = ClientId::new();
        let id = start_one(&mut reg, a);

        // Valid chunk from the uploader in the right room
        assert!(reg.check_chunk(&id, a, Some("room1"), "aGVsbG8=").is_ok());

        // Different connection
        assert!(matches!(
            reg.check_chunk(&id, b, Some("room1"), "aGVsbG8="),
            Err(AppError::Forbidden("file_chunk"))
        ));
        // Uploader, but wrong room
        assert!(matches!(
            reg.check_chunk(&id, a, Some("room2"), "aGVsbG8="),
            Err(AppError::Forbidden("file_chunk"))
        ));
        // Never-started id
        assert!(matches!(
            reg.check_chunk(&TransferId::generate(), a, Some("room1"), "aGVsbG8="),
            Err(AppError::UnknownTransfer)
        ));
    }

    #[test]
    fn test_chunk_payload_validation() {
        let mut reg = TransferRegistry::new();
        let a = ClientId::new();
        let id = start_one(&mut reg, a);

        assert!(matches!(
            reg.check_chunk(&id, a, Some("room1"), "not base64!!"),
            Err(AppError::InvalidBase64)
        ));
        let huge = "A".repeat(MAX_CHUNK_CHARS + 4);
        assert!(matches!(
            reg.check_chunk(&id, a, Some("room1"), &huge),
            Err(AppError::ChunkTooLarge)
        ));
        // Empty payload is valid base64
        assert!(reg.check_chunk(&id, a, Some("room1"), "").is_ok());
    }

    #[test]
    fn test_finish_terminates_state_machine() {
        let mut reg = TransferRegistry::new();
        let a = ClientId::new();
        let id = start_one(&mut reg, a);

        let transfer = reg.finish(&id, a, Some("room1")).unwrap();
        assert_eq!(transfer.filename, "pic.png");
        assert!(reg.is_empty());

        // Chunks and a second end after the transfer closed are rejected
        assert!(matches!(
            reg.check_chunk(&id, a, Some("room1"), "aGVsbG8="),
            Err(AppError::UnknownTransfer)
        ));
        assert!(matches!(
            reg.finish(&id, a, Some("room1")),
            Err(AppError::UnknownTransfer)
        ));
    }

    #[test]
    fn test_finish_requires_ownership() {
        let mut reg = TransferRegistry::new();
        let a = ClientId::new();
        let b = ClientId::new();
        let id = start_one(&mut reg, a);

        assert!(matches!(
            reg.finish(&id, b, Some("room1")),
            Err(AppError::Forbidden("file_end"))
        ));
        // The record survives a forbidden attempt
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_reap_uploader() {
        let mut reg = TransferRegistry::new();
        let a = ClientId::new();
        let b = ClientId::new();
        start_one(&mut reg, a);
        start_one(&mut reg, a);
        let kept = start_one(&mut reg, b);

        assert_eq!(reg.reap_uploader(a), 2);
        assert_eq!(reg.len(), 1);
        assert!(reg.check_chunk(&kept, b, Some("room1"), "").is_ok());
    }
}
