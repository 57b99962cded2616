//! Chat Relay Server Library
//!
//! A room-based chat relay speaking newline-delimited JSON over TCP,
//! built with tokio using the Actor pattern for state management.
//!
//! # Features
//! - Display name registration (`hello`, process-unique)
//! - Named ephemeral rooms with join/leave notices
//! - Room broadcast messages and private messages
//! - Room and member listings
//! - Chunked file relay between clients, never buffered server-side
//! - Lossy delivery to slow consumers instead of head-of-line blocking
//!
//! # Architecture
//! Uses the Actor pattern with `mpsc` channels:
//! - `Dispatcher` is the central actor owning all state (clients, rooms,
//!   names, transfers); every inbound event crosses one ordered channel
//! - Each connection runs a reader and a writer task; the first to finish
//!   cancels the other through a `CancellationToken`
//! - No locks needed - all state access goes through message passing
//!
//! # Example
//! ```ignore
//! use tokio_util::sync::CancellationToken;
//! use chatrelay::ChatServer;
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let server = ChatServer::bind("127.0.0.1:7777").await?;
//!     let cancel = CancellationToken::new();
//!     // cancel.cancel() from a signal handler stops the server
//!     server.run(cancel).await;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod codec;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod message;
pub mod registry;
pub mod server;
pub mod transfer;
pub mod types;

// Re-export main types for convenience
pub use client::Client;
pub use dispatcher::{Dispatcher, Event, DEFAULT_ROOM};
pub use error::{AppError, DeliveryError};
pub use handler::handle_connection;
pub use message::{ClientMessage, ServerMessage};
pub use registry::Registry;
pub use server::ChatServer;
pub use transfer::{Transfer, TransferRegistry};
pub use types::{ClientId, TransferId};
