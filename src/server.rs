//! Server lifecycle
//!
//! Binds the listener, spawns the dispatcher actor and one handler per
//! accepted connection, and tears everything down on the stop signal:
//! cancel propagates to the dispatcher and every connection task, all of
//! them are awaited, and the registries are released when the dispatcher
//! returns.

use std::io;
use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::dispatcher::{Dispatcher, Event};
use crate::handler::handle_connection;

/// Capacity of the dispatcher's inbound event channel
pub const EVENT_QUEUE_CAPACITY: usize = 5000;

/// A bound, not-yet-running chat relay server
///
/// `bind` and `run` are separate so callers (and tests, via port 0) can
/// learn the listen address before any connection is accepted.
pub struct ChatServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    events_tx: mpsc::Sender<Event>,
    dispatcher: Dispatcher,
}

impl ChatServer {
    /// Bind the listen address and set up the event channel
    pub async fn bind(addr: &str) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);

        Ok(Self {
            listener,
            local_addr,
            events_tx,
            dispatcher: Dispatcher::new(events_rx),
        })
    }

    /// The address actually bound, useful when binding port 0
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept connections until `cancel` fires, then shut down
    ///
    /// Shutdown is cooperative and deterministic: the accept loop stops
    /// first, every connection task winds down through its child token and
    /// is awaited, and the dispatcher exits last, dropping all registries.
    pub async fn run(self, cancel: CancellationToken) {
        info!("server listening on {}", self.local_addr);

        let dispatcher = tokio::spawn(self.dispatcher.run(cancel.clone()));
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        connections.spawn(handle_connection(
                            stream,
                            addr,
                            self.events_tx.clone(),
                            cancel.clone(),
                        ));
                    }
                    Err(e) => {
                        error!("failed to accept connection: {}", e);
                    }
                },
            }
        }

        info!("stopping server");
        drop(self.listener);

        while connections.join_next().await.is_some() {}

        // No senders left: the dispatcher drains and exits even if it raced
        // past the cancel signal
        drop(self.events_tx);
        let _ = dispatcher.await;

        info!("server stopped");
    }
}
