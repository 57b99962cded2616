//! Connection handler
//!
//! Owns one accepted TCP connection: a reader task feeding decoded messages
//! into the dispatcher's event channel and a writer task draining this
//! connection's outbound queue back onto the wire. The first task to finish
//! cancels the other through a child token and is then awaited, so cleanup
//! runs exactly once and no task is leaked.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::timeout;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::codec::{self, MAX_LINE_BYTES};
use crate::dispatcher::Event;
use crate::error::AppError;
use crate::message::ServerMessage;
use crate::types::ClientId;

/// Greeting sent to every freshly accepted connection
const WELCOME_TEXT: &str = r#"Welcome! First send: {"type":"hello","name":"..."}"#;

/// Per-connection outbound queue capacity
pub const OUT_QUEUE_CAPACITY: usize = 200;

/// How long the writer may keep flushing after cancellation
const FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

type LineSink = SplitSink<Framed<TcpStream, LinesCodec>, String>;
type LineStream = SplitStream<Framed<TcpStream, LinesCodec>>;

/// Handle one accepted connection until it ends or the server shuts down
///
/// Read or write failures never propagate; the handler always runs its
/// cleanup path, which announces the disconnect to the dispatcher.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    events: mpsc::Sender<Event>,
    cancel: CancellationToken,
) {
    let framed = Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_BYTES));
    let (sink, lines) = framed.split();

    let id = ClientId::new();
    let (out_tx, out_rx) = mpsc::channel::<ServerMessage>(OUT_QUEUE_CAPACITY);

    // Register with the dispatcher before any traffic flows
    let connected = Event::Connected {
        id,
        addr: addr.to_string(),
        sender: out_tx.clone(),
    };
    if events.send(connected).await.is_err() {
        error!("failed to register client {} - dispatcher closed", id);
        return;
    }

    // Queue is empty at this point, the welcome always fits
    let _ = out_tx.try_send(ServerMessage::info(WELCOME_TEXT));

    let conn_cancel = cancel.child_token();
    let mut read_task = tokio::spawn(read_loop(
        lines,
        id,
        events.clone(),
        out_tx,
        conn_cancel.clone(),
    ));
    let mut write_task = tokio::spawn(write_loop(sink, out_rx, conn_cancel.clone()));

    // First to finish cancels its sibling, which is then awaited so both
    // halves are down before cleanup
    tokio::select! {
        _ = &mut read_task => {
            conn_cancel.cancel();
            let _ = write_task.await;
        }
        _ = &mut write_task => {
            conn_cancel.cancel();
            let _ = read_task.await;
        }
    }

    // Dispatcher may already be gone during shutdown; that is fine
    let _ = events.send(Event::Disconnected { id }).await;
    info!("connection {} from {} closed", id, addr);
}

/// Stream → decode → dispatcher event channel
async fn read_loop(
    mut lines: LineStream,
    id: ClientId,
    events: mpsc::Sender<Event>,
    out_tx: mpsc::Sender<ServerMessage>,
    cancel: CancellationToken,
) {
    loop {
        let item = tokio::select! {
            _ = cancel.cancelled() => break,
            item = lines.next() => item,
        };

        match item {
            None => break,
            Some(Ok(line)) => match codec::decode_line(&line) {
                Ok(msg) => match events.try_send(Event::Inbound { id, msg }) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        // Inbound backpressure: reject rather than block the reader
                        let _ = out_tx.try_send(AppError::Overloaded.into());
                    }
                    Err(TrySendError::Closed(_)) => break,
                },
                Err(err) => {
                    // Malformed input is reported, the connection stays usable
                    let _ = out_tx.try_send(err.into());
                }
            },
            Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                // Framing cannot resynchronize after an oversize line
                let _ = out_tx.try_send(AppError::LineTooLong.into());
                break;
            }
            Some(Err(LinesCodecError::Io(e))) => {
                debug!("read error on {}: {}", id, e);
                break;
            }
        }
    }
    debug!("read loop ended for {}", id);
}

/// Outbound queue → encode → stream
async fn write_loop(mut sink: LineSink, mut out_rx: mpsc::Receiver<ServerMessage>, cancel: CancellationToken) {
    loop {
        let msg = tokio::select! {
            _ = cancel.cancelled() => break,
            msg = out_rx.recv() => msg,
        };

        match msg {
            None => break,
            Some(msg) => match serde_json::to_string(&msg) {
                Ok(json) => {
                    // A peer that stops reading leaves the socket buffer
                    // full; the send must stay cancellable or shutdown
                    // would wait on it indefinitely
                    let sent = tokio::select! {
                        _ = cancel.cancelled() => break,
                        sent = sink.send(json) => sent,
                    };
                    if let Err(e) = sent {
                        debug!("write failed, ending write loop: {}", e);
                        break;
                    }
                }
                Err(e) => {
                    // Keep draining; one bad message must not kill the writer
                    error!("failed to serialize outbound message: {}", e);
                }
            },
        }
    }

    // Flush anything already queued (e.g. the error explaining why the
    // connection is closing) before dropping the stream, but never past
    // the deadline: the peer may not be reading at all
    let flush = async {
        while let Ok(msg) = out_rx.try_recv() {
            if let Ok(json) = serde_json::to_string(&msg) {
                if sink.send(json).await.is_err() {
                    return;
                }
            }
        }
        // Swallow close-time errors
        let _ = sink.close().await;
    };
    if timeout(FLUSH_TIMEOUT, flush).await.is_err() {
        debug!("flush deadline hit, dropping stream");
    }
    debug!("write loop ended");
}
