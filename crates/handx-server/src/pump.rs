//! Per-connection read and write loops.
//!
//! The read loop feeds inbound frames to the router under a read deadline
//! that restarts on every frame, pongs included. The write loop drains the
//! client's outbound queue in FIFO order and pings when the socket has been
//! idle. Either loop ending unregisters the client; the hub makes that
//! idempotent, and the other loop notices and stops.

use crate::hub::{ClientSession, EnqueueError, Hub};
use crate::router::{ConnectionState, Routed, Router};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use handx_core::{encode, Envelope, ErrorCode};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsStream = SplitStream<WebSocketStream<TcpStream>>;

/// Most frames written before a single flush.
const MAX_BATCH: usize = 64;

#[derive(Debug, Clone, Copy)]
pub struct PumpConfig {
    pub read_timeout: Duration,
    pub ping_interval: Duration,
    pub write_timeout: Duration,
    pub max_message_size: usize,
}

/// Drive one registered client until either side gives up.
pub async fn run(
    ws_stream: WebSocketStream<TcpStream>,
    client: Arc<ClientSession>,
    outbound: mpsc::Receiver<String>,
    hub: Arc<Hub>,
    router: Arc<Router>,
    state: ConnectionState,
    config: PumpConfig,
) {
    let (sink, stream) = ws_stream.split();

    let writer = tokio::spawn(write_loop(
        sink,
        outbound,
        client.clone(),
        hub.clone(),
        config,
    ));
    read_loop(stream, client.clone(), hub, router, state, config).await;

    if let Err(e) = writer.await {
        warn!(client_id = %client.id(), error = %e, "write loop panicked");
    }
    info!(client_id = %client.id(), "connection finished");
}

/// Queue a reply. Overflow drops the reply rather than blocking the reader.
fn reply(client: &ClientSession, envelope: &Envelope) {
    let frame = match encode(envelope) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(client_id = %client.id(), error = %e, "failed to encode reply");
            return;
        }
    };
    match client.enqueue(frame) {
        Ok(()) => {}
        Err(EnqueueError::Full) => {
            warn!(client_id = %client.id(), kind = %envelope.msg_type(), "outbound queue full, dropping reply")
        }
        Err(EnqueueError::Closed) => {
            debug!(client_id = %client.id(), "reply after close discarded")
        }
    }
}

async fn read_loop(
    mut stream: WsStream,
    client: Arc<ClientSession>,
    hub: Arc<Hub>,
    router: Arc<Router>,
    mut state: ConnectionState,
    config: PumpConfig,
) {
    loop {
        let next = tokio::select! {
            _ = client.closed() => break,
            next = time::timeout(config.read_timeout, stream.next()) => next,
        };

        let message = match next {
            Ok(Some(Ok(message))) => message,
            Ok(Some(Err(e))) => {
                debug!(client_id = %client.id(), error = %e, "read failed");
                break;
            }
            Ok(None) => break,
            Err(_) => {
                info!(client_id = %client.id(), timeout = ?config.read_timeout, "read deadline exceeded");
                break;
            }
        };

        let text = match message {
            Message::Text(text) => text,
            Message::Binary(data) => match String::from_utf8(data) {
                Ok(text) => text,
                Err(_) => {
                    reply(
                        &client,
                        &Envelope::error(ErrorCode::InvalidMessage, "Binary frame is not UTF-8 JSON", None),
                    );
                    continue;
                }
            },
            Message::Close(_) => break,
            // Liveness traffic only restarts the deadline.
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
        };

        if text.len() > config.max_message_size {
            warn!(client_id = %client.id(), size = text.len(), "inbound frame too large");
            reply(
                &client,
                &Envelope::error(
                    ErrorCode::InvalidMessage,
                    format!("Message too large: {} bytes (max {})", text.len(), config.max_message_size),
                    None,
                ),
            );
            continue;
        }

        match router.route(&mut state, &text).await {
            Routed::Reply(envelope) => reply(&client, &envelope),
            Routed::Close => break,
        }
    }

    hub.unregister(&client).await;
}

async fn write_loop(
    mut sink: WsSink,
    mut outbound: mpsc::Receiver<String>,
    client: Arc<ClientSession>,
    hub: Arc<Hub>,
    config: PumpConfig,
) {
    let mut ping = time::interval_at(Instant::now() + config.ping_interval, config.ping_interval);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(first) = frame else {
                    // Queue closed: say goodbye, best effort.
                    let _ = time::timeout(config.write_timeout, sink.send(Message::Close(None))).await;
                    break;
                };

                let mut batch = vec![first];
                while batch.len() < MAX_BATCH {
                    match outbound.try_recv() {
                        Ok(frame) => batch.push(frame),
                        Err(_) => break,
                    }
                }
                let count = batch.len();

                let write = async {
                    for frame in batch {
                        sink.feed(Message::Text(frame)).await?;
                    }
                    sink.flush().await
                };
                match time::timeout(config.write_timeout, write).await {
                    Ok(Ok(())) => {
                        debug!(client_id = %client.id(), frames = count, "flushed");
                        ping.reset();
                    }
                    Ok(Err(e)) => {
                        debug!(client_id = %client.id(), error = %e, "write failed");
                        break;
                    }
                    Err(_) => {
                        warn!(client_id = %client.id(), timeout = ?config.write_timeout, "write deadline exceeded");
                        break;
                    }
                }
            }
            _ = ping.tick() => {
                match time::timeout(config.write_timeout, sink.send(Message::Ping(Vec::new()))).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        debug!(client_id = %client.id(), error = %e, "ping failed");
                        break;
                    }
                    Err(_) => {
                        warn!(client_id = %client.id(), "ping deadline exceeded");
                        break;
                    }
                }
            }
        }
    }

    hub.unregister(&client).await;
}
