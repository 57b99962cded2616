//! Room and identity registry
//!
//! Maps room name → member set and display name → connection. Mutated only
//! from the dispatcher's serialized context, so no locking is needed.
//!
//! Invariants:
//! - a connection appears in at most one room;
//! - a name maps to exactly one connection, and releasing a name only
//!   succeeds for the connection that holds it (symmetry on rename and
//!   disconnect).

use std::collections::{HashMap, HashSet};

use crate::error::AppError;
use crate::types::ClientId;

/// Maximum display name length in characters
pub const MAX_NAME_CHARS: usize = 32;

/// Maximum room name length in characters
pub const MAX_ROOM_CHARS: usize = 40;

/// Room membership and name index
#[derive(Debug, Default)]
pub struct Registry {
    /// Room name -> member set; rooms are ephemeral, deleted when empty
    rooms: HashMap<String, HashSet<ClientId>>,
    /// Display name -> owning connection
    names: HashMap<String, ClientId>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and claim a display name for `id`
    ///
    /// `current` is the name the connection holds right now, if any; it is
    /// released on success. Renaming to the name already held by self is a
    /// no-op success. Returns the trimmed name that was bound.
    pub fn claim_name(
        &mut self,
        id: ClientId,
        current: Option<&str>,
        raw: &str,
    ) -> Result<String, AppError> {
        let name = raw.trim();
        if name.is_empty()
            || name.chars().count() > MAX_NAME_CHARS
            || name.chars().any(char::is_whitespace)
        {
            return Err(AppError::NameInvalid);
        }
        if let Some(&owner) = self.names.get(name) {
            if owner != id {
                return Err(AppError::NameTaken);
            }
        }

        // Release the previous binding, but only if it is really ours
        if let Some(old) = current {
            if self.names.get(old) == Some(&id) {
                self.names.remove(old);
            }
        }

        let name = name.to_string();
        self.names.insert(name.clone(), id);
        Ok(name)
    }

    /// Drop the name binding on disconnect, if `id` still owns it
    pub fn release_name(&mut self, id: ClientId, name: &str) {
        if self.names.get(name) == Some(&id) {
            self.names.remove(name);
        }
    }

    /// Connection currently holding `name`, if any
    pub fn owner_of(&self, name: &str) -> Option<ClientId> {
        self.names.get(name).copied()
    }

    /// Validate a room name, returning the trimmed form
    pub fn validate_room(raw: &str) -> Result<String, AppError> {
        let room = raw.trim();
        if room.is_empty() || room.chars().count() > MAX_ROOM_CHARS {
            return Err(AppError::RoomNameInvalid);
        }
        Ok(room.to_string())
    }

    /// Add `id` to `room`, creating the room if absent
    pub fn enter_room(&mut self, room: &str, id: ClientId) {
        self.rooms.entry(room.to_string()).or_default().insert(id);
    }

    /// Remove `id` from `room`; the room is deleted once empty
    ///
    /// Returns true when the room was garbage-collected.
    pub fn leave_room(&mut self, room: &str, id: ClientId) -> bool {
        let Some(members) = self.rooms.get_mut(room) else {
            return false;
        };
        members.remove(&id);
        if members.is_empty() {
            self.rooms.remove(room);
            true
        } else {
            false
        }
    }

    /// Snapshot of a room's membership at call time
    pub fn members(&self, room: &str) -> Vec<ClientId> {
        self.rooms
            .get(room)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Room names, sorted ascending
    pub fn rooms_sorted(&self) -> Vec<String> {
        let mut rooms: Vec<String> = self.rooms.keys().cloned().collect();
        rooms.sort();
        rooms
    }

    /// Number of active rooms
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}
