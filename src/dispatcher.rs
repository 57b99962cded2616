//! Dispatcher actor implementation
//!
//! The single serialization point of the server: all inbound events from all
//! connections flow through one bounded mpsc channel into this actor, which
//! owns every registry (clients, rooms, names, transfers). Events are
//! processed one at a time in arrival order, so registry access needs no
//! locks and per-connection FIFO is preserved end to end.
//!
//! A failing handler never stops the loop: validation and authorization
//! errors are converted into an `error` event to the offending connection
//! and processing continues with the next event.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::Client;
use crate::error::{AppError, DeliveryError};
use crate::message::{utc_ts, ClientMessage, ServerMessage};
use crate::registry::Registry;
use crate::transfer::TransferRegistry;
use crate::types::{ClientId, TransferId};

/// Room auto-joined after the first successful hello
pub const DEFAULT_ROOM: &str = "lobby";

/// Maximum chat message length in characters
pub const MAX_TEXT_CHARS: usize = 2000;

/// One unit of work for the dispatcher
///
/// Connect and disconnect flow through the same channel as parsed messages,
/// so a connection's whole lifecycle is serialized with its traffic.
#[derive(Debug)]
pub enum Event {
    /// A connection handler came up
    Connected {
        id: ClientId,
        addr: String,
        sender: mpsc::Sender<ServerMessage>,
    },
    /// A decoded message arrived from a connection
    Inbound { id: ClientId, msg: ClientMessage },
    /// Both halves of a connection terminated
    Disconnected { id: ClientId },
}

/// The dispatcher actor
///
/// Owns all mutable server state and processes commands from connection
/// handlers. Uses HashMap for O(1) lookups on clients, rooms, and names.
pub struct Dispatcher {
    /// All connected clients: ClientId -> Client
    clients: HashMap<ClientId, Client>,
    /// Room membership and name index
    registry: Registry,
    /// In-flight file transfers
    transfers: TransferRegistry,
    /// Event receiver channel
    events: mpsc::Receiver<Event>,
}

impl Dispatcher {
    /// Create a new dispatcher reading from the given event channel
    pub fn new(events: mpsc::Receiver<Event>) -> Self {
        Self {
            clients: HashMap::new(),
            registry: Registry::new(),
            transfers: TransferRegistry::new(),
            events,
        }
    }

    /// Run the event loop until cancelled or all senders are dropped
    pub async fn run(mut self, cancel: CancellationToken) {
        info!("dispatcher started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                ev = self.events.recv() => match ev {
                    Some(ev) => self.handle_event(ev),
                    None => break,
                },
            }
        }

        info!(
            "dispatcher stopped ({} clients, {} rooms, {} transfers released)",
            self.clients.len(),
            self.registry.room_count(),
            self.transfers.len()
        );
    }

    /// Process a single event to completion
    pub fn handle_event(&mut self, ev: Event) {
        match ev {
            Event::Connected { id, addr, sender } => self.on_connected(id, addr, sender),
            Event::Disconnected { id } => self.on_disconnected(id),
            Event::Inbound { id, msg } => {
                if let Err(err) = self.on_message(id, msg) {
                    debug!("rejected event from {}: {}", id, err);
                    self.deliver(id, err.into());
                }
            }
        }
    }

    /// Route a parsed message by type
    fn on_message(&mut self, id: ClientId, msg: ClientMessage) -> Result<(), AppError> {
        match msg {
            ClientMessage::Hello { name } => self.on_hello(id, name),
            ClientMessage::Join { room } => self.on_join(id, room),
            ClientMessage::Msg { text } => self.on_msg(id, text),
            ClientMessage::Pm { to, text } => self.on_pm(id, to, text),
            ClientMessage::ListRooms => self.on_list_rooms(id),
            ClientMessage::ListUsers => self.on_list_users(id),
            ClientMessage::FileStart { filename, size } => self.on_file_start(id, filename, size),
            ClientMessage::FileChunk { id: tid, seq, data } => {
                self.on_file_chunk(id, tid, seq, data)
            }
            ClientMessage::FileEnd { id: tid } => self.on_file_end(id, tid),
        }
    }

    // lifecycle events

    fn on_connected(&mut self, id: ClientId, addr: String, sender: mpsc::Sender<ServerMessage>) {
        info!("client {} connected from {}", id, addr);
        self.clients.insert(id, Client::new(id, addr, sender));
        debug!(
            "total clients: {}, total rooms: {}",
            self.clients.len(),
            self.registry.room_count()
        );
    }

    fn on_disconnected(&mut self, id: ClientId) {
        let Some(client) = self.clients.remove(&id) else {
            return;
        };

        if let Some(room) = &client.room {
            self.registry.leave_room(room, id);
        }
        if let Some(name) = &client.name {
            self.registry.release_name(id, name);
        }
        let reaped = self.transfers.reap_uploader(id);
        if reaped > 0 {
            warn!(
                "reaped {} abandoned transfer(s) from {}",
                reaped,
                client.display_name()
            );
        }

        info!("client {} ({}) disconnected", client.id, client.addr);
        debug!(
            "total clients: {}, total rooms: {}",
            self.clients.len(),
            self.registry.room_count()
        );
    }

    // message handlers

    fn on_hello(&mut self, id: ClientId, raw_name: String) -> Result<(), AppError> {
        let Some(client) = self.clients.get(&id) else {
            return Ok(());
        };
        let current = client.name.clone();

        let name = self.registry.claim_name(id, current.as_deref(), &raw_name)?;
        if let Some(client) = self.clients.get_mut(&id) {
            client.name = Some(name.clone());
        }
        info!("client {} is now known as '{}'", id, name);

        self.deliver(
            id,
            ServerMessage::info(format!(
                "You are logged in as {name}. Use join to pick a room."
            )),
        );

        // Convenience: first hello drops the client into the default room
        let in_room = self.clients.get(&id).is_some_and(|c| c.room.is_some());
        if !in_room {
            self.join_room(id, DEFAULT_ROOM.to_string());
        }
        Ok(())
    }

    fn on_join(&mut self, id: ClientId, raw_room: String) -> Result<(), AppError> {
        let Some(client) = self.clients.get(&id) else {
            return Ok(());
        };
        if !client.has_name() {
            return Err(AppError::NotAuthenticated);
        }
        let room = Registry::validate_room(&raw_room)?;
        self.join_room(id, room);
        Ok(())
    }

    /// Move a client into `room`, leaving its old room first
    ///
    /// Joining the room one is already in acknowledges without emitting any
    /// membership notices.
    fn join_room(&mut self, id: ClientId, room: String) {
        let Some(client) = self.clients.get(&id) else {
            return;
        };
        let name = client.display_name().to_string();
        let old = client.room.clone();

        if old.as_deref() == Some(room.as_str()) {
            self.deliver(id, ServerMessage::info(format!("You are already in room {room}")));
            return;
        }

        if let Some(old) = old {
            self.registry.leave_room(&old, id);
            self.broadcast(
                &old,
                ServerMessage::info(format!("{name} left room {old}")),
                Some(id),
            );
        }

        self.registry.enter_room(&room, id);
        if let Some(client) = self.clients.get_mut(&id) {
            client.room = Some(room.clone());
        }
        info!("client {} joined room {}", id, room);

        self.deliver(id, ServerMessage::info(format!("You joined room {room}")));
        self.broadcast(
            &room,
            ServerMessage::info(format!("{name} joined room {room}")),
            Some(id),
        );
    }

    fn on_msg(&mut self, id: ClientId, text: String) -> Result<(), AppError> {
        let Some(client) = self.clients.get(&id) else {
            return Ok(());
        };
        if !client.has_name() {
            return Err(AppError::NotAuthenticated);
        }
        let Some(room) = client.room.clone() else {
            return Err(AppError::NotInRoom);
        };
        let from = client.display_name().to_string();

        let text = text.trim_end_matches('\n');
        if text.is_empty() {
            return Ok(());
        }
        if text.chars().count() > MAX_TEXT_CHARS {
            return Err(AppError::MessageTooLong);
        }

        let payload = ServerMessage::Msg {
            room: room.clone(),
            from,
            text: text.to_string(),
            ts: utc_ts(),
        };
        // The sender receives its own message too
        self.broadcast(&room, payload, None);
        Ok(())
    }

    fn on_pm(&mut self, id: ClientId, to: String, text: String) -> Result<(), AppError> {
        let Some(client) = self.clients.get(&id) else {
            return Ok(());
        };
        if !client.has_name() {
            return Err(AppError::NotAuthenticated);
        }
        let from = client.display_name().to_string();

        let to = to.trim();
        let text = text.trim_end_matches('\n');
        if to.is_empty() || text.is_empty() {
            return Err(AppError::PmFormat);
        }
        let Some(dst) = self.registry.owner_of(to) else {
            return Err(AppError::UserNotFound(to.to_string()));
        };

        self.deliver(
            dst,
            ServerMessage::Pm {
                from,
                text: text.to_string(),
                ts: utc_ts(),
            },
        );
        self.deliver(id, ServerMessage::info(format!("PM sent -> {to}")));
        Ok(())
    }

    fn on_list_rooms(&mut self, id: ClientId) -> Result<(), AppError> {
        self.deliver(
            id,
            ServerMessage::RoomList {
                rooms: self.registry.rooms_sorted(),
                ts: utc_ts(),
            },
        );
        Ok(())
    }

    fn on_list_users(&mut self, id: ClientId) -> Result<(), AppError> {
        let Some(client) = self.clients.get(&id) else {
            return Ok(());
        };

        let msg = match client.room.clone() {
            None => ServerMessage::UserList {
                room: None,
                users: Vec::new(),
                ts: utc_ts(),
            },
            Some(room) => {
                let mut users: Vec<String> = self
                    .registry
                    .members(&room)
                    .into_iter()
                    .filter_map(|mid| self.clients.get(&mid).and_then(|c| c.name.clone()))
                    .collect();
                users.sort();
                ServerMessage::UserList {
                    room: Some(room),
                    users,
                    ts: utc_ts(),
                }
            }
        };
        self.deliver(id, msg);
        Ok(())
    }

    // file transfer handlers

    fn on_file_start(&mut self, id: ClientId, filename: String, size: i64) -> Result<(), AppError> {
        let (name, room) = self.require_named_in_room(id)?;

        let (tid, transfer) = self
            .transfers
            .start(id, name, room.clone(), &filename, size)?;
        info!(
            "client {} started transfer {} ('{}', {} bytes) in room {}",
            id, tid, transfer.filename, transfer.size, room
        );

        self.deliver(
            id,
            ServerMessage::FileAck {
                id: tid.to_string(),
                ts: utc_ts(),
            },
        );
        self.broadcast(
            &room,
            ServerMessage::FileStart {
                id: tid.to_string(),
                from: transfer.from,
                room: transfer.room,
                filename: transfer.filename,
                size: transfer.size,
                ts: transfer.started_ts,
            },
            Some(id),
        );
        Ok(())
    }

    fn on_file_chunk(
        &mut self,
        id: ClientId,
        raw_id: String,
        seq: i64,
        data: String,
    ) -> Result<(), AppError> {
        let (name, room) = self.require_named_in_room(id)?;

        let tid = TransferId::from_string(raw_id.trim().to_string());
        self.transfers.check_chunk(&tid, id, Some(&room), &data)?;

        // Relay unmodified: seq and data are the uploader's, no reordering
        self.broadcast(
            &room,
            ServerMessage::FileChunk {
                id: tid.to_string(),
                seq,
                data,
                from: name,
                ts: utc_ts(),
            },
            Some(id),
        );
        Ok(())
    }

    fn on_file_end(&mut self, id: ClientId, raw_id: String) -> Result<(), AppError> {
        let (name, room) = self.require_named_in_room(id)?;

        let tid = TransferId::from_string(raw_id.trim().to_string());
        let transfer = self.transfers.finish(&tid, id, Some(&room))?;
        info!("client {} finished transfer {} ('{}')", id, tid, transfer.filename);

        self.broadcast(
            &room,
            ServerMessage::FileEnd {
                id: tid.to_string(),
                from: name,
                ts: utc_ts(),
            },
            Some(id),
        );
        Ok(())
    }

    /// File transfers require both a name and a room
    fn require_named_in_room(&self, id: ClientId) -> Result<(String, String), AppError> {
        let Some(client) = self.clients.get(&id) else {
            return Err(AppError::FileNotInRoom);
        };
        match (client.name.clone(), client.room.clone()) {
            (Some(name), Some(room)) => Ok((name, room)),
            _ => Err(AppError::FileNotInRoom),
        }
    }

    // delivery

    /// Non-blocking delivery to one connection
    ///
    /// A full outbound queue drops the event for that recipient only; a slow
    /// consumer must never stall the dispatcher.
    fn deliver(&self, id: ClientId, msg: ServerMessage) {
        let Some(client) = self.clients.get(&id) else {
            return;
        };
        match client.try_deliver(msg) {
            Ok(()) => {}
            Err(DeliveryError::QueueFull) => {
                debug!(
                    "dropping event for slow client {} ({})",
                    client.id,
                    client.display_name()
                );
            }
            Err(DeliveryError::Closed) => {}
        }
    }

    /// Deliver to every member of `room` except `exclude`
    ///
    /// Iterates a membership snapshot taken at call time, so membership
    /// changes during iteration do not affect the ongoing broadcast.
    fn broadcast(&self, room: &str, msg: ServerMessage, exclude: Option<ClientId>) {
        for target in self.registry.members(room) {
            if Some(target) == exclude {
                continue;
            }
            self.deliver(target, msg.clone());
        }
    }
}
