//! Per-connection task
//!
//! Each upgraded socket gets one task that drains the session's outbound
//! queue into the socket and feeds inbound frames to the hub, one at a time
//! and in arrival order. The same task runs the close path, so message and
//! close handling never overlap for a connection.

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, warn, Instrument};

use crate::hub::RelayHub;
use crate::session::{Session, SessionError};
use didrelay_observability::logging::connection_span;
use didrelay_observability::ConnectionMetrics;

/// Run a session over an upgraded socket until either side closes it
pub(crate) async fn serve(socket: WebSocket, hub: Arc<RelayHub>, peer: Option<SocketAddr>) {
    let (session, mut outbound) = Session::new(peer, hub.options().outbound_queue);
    let span = connection_span(session.id(), peer);

    async move {
        let (mut sender, mut receiver) = socket.split();
        ConnectionMetrics::record_accepted();
        debug!("Session accepted");

        // TODO: add server-initiated ping/timeout so half-open peers are
        // eventually reaped; idle connections currently live until the
        // transport reports a close.
        let close_requested = session.close_requested();
        tokio::pin!(close_requested);

        loop {
            tokio::select! {
                // Handle close requests from the hub
                _ = &mut close_requested => {
                    let _ = sender.send(Message::Close(None)).await;
                    debug!("Session closed by relay");
                    break;
                }

                // Handle outgoing frames
                frame = outbound.recv() => match frame {
                    Some(frame) => {
                        if let Err(e) = sender.send(Message::Text(frame)).await {
                            warn!("Write failed, closing session: {}", e);
                            break;
                        }
                    }
                    None => break,
                },

                // Handle incoming frames
                inbound = receiver.next() => match inbound {
                    Some(Ok(Message::Text(text))) => handle_frame(&session, &hub, text.as_bytes()),
                    Some(Ok(Message::Binary(bytes))) => handle_frame(&session, &hub, &bytes),
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("Connection closed by peer");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("WebSocket error: {}", e);
                        break;
                    }
                },
            }
        }

        session.on_close(&hub);
        ConnectionMetrics::record_closed();
    }
    .instrument(span)
    .await
}

fn handle_frame(session: &Arc<Session>, hub: &RelayHub, raw: &[u8]) {
    match session.on_message(hub, raw) {
        Ok(outcome) => debug!("Dispatched: {:?}", outcome),
        Err(SessionError::Decode(e)) => warn!("Error parsing message: {}", e),
        Err(e) => warn!("Message rejected: {}", e),
    }
}
