//! Manages the WebSocket connection lifecycle for a simulated interview.

use super::protocol::{ClientMessage, ServerMessage};
use crate::{models::SessionStatus, state::AppState};
use anyhow::Result;
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use intake_core::events::EventReceiver;
use intake_core::session::run_session;
use intake_core::state::AnalysisState;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{Instrument, error, info, instrument, warn};

const EVENT_BUFFER: usize = 256;

/// Axum handler to upgrade an HTTP connection to a WebSocket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Why the event forwarding loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ForwardOutcome {
    /// The session dropped its last event sender.
    SessionEnded,
    /// The client closed the socket or could no longer be written to.
    ClientGone,
}

/// Runs one interview per connection, once the client has sent `start`.
#[instrument(name = "ws_session", skip_all, fields(session_id))]
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    info!("New WebSocket connection. Awaiting start...");
    let (mut socket_tx, mut socket_rx) = socket.split();

    if !wait_for_start(&mut socket_rx).await {
        info!("Client disconnected before sending start.");
        return;
    }

    let analysis = Arc::new(AnalysisState::new(state.question_config.clone()));
    let session_id = state.registry.register(analysis.clone()).await;
    tracing::Span::current().record("session_id", tracing::field::display(session_id));

    let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
    let session = tokio::spawn(
        run_session(state.session_deps.clone(), analysis, events_tx).in_current_span(),
    );

    // Dropping the receiver here is what tells the session the client is gone.
    let outcome = forward_events(&mut socket_tx, &mut socket_rx, events_rx).await;
    if outcome == ForwardOutcome::ClientGone {
        info!("Client disconnected. Waiting for the session to wind down.");
    }

    let status = match session.await {
        Ok(Ok(reason)) => {
            info!(?reason, "Session ended.");
            SessionStatus::Completed
        }
        Ok(Err(e)) => {
            error!(error = %e, "Session failed.");
            SessionStatus::Failed
        }
        Err(e) => {
            error!(error = ?e, "Session task aborted.");
            SessionStatus::Failed
        }
    };
    state.registry.finish(session_id, status).await;

    if outcome == ForwardOutcome::SessionEnded {
        let _ = socket_tx.close().await;
    }
}

/// Reads client frames until a `start` command. Returns `false` if the
/// client went away first.
pub(crate) async fn wait_for_start<S, E>(socket_rx: &mut S) -> bool
where
    S: Stream<Item = Result<Message, E>> + Unpin,
{
    while let Some(frame) = socket_rx.next().await {
        match frame {
            Ok(Message::Text(text)) => match ClientMessage::parse(text.as_str()) {
                Some(ClientMessage::Start) => return true,
                None => warn!(frame = %text, "Ignoring unknown message before start."),
            },
            Ok(Message::Close(_)) | Err(_) => return false,
            Ok(_) => {}
        }
    }
    false
}

/// Streams session events to the client until either side goes away.
pub(crate) async fn forward_events<Tx, Rx, E>(
    socket_tx: &mut Tx,
    socket_rx: &mut Rx,
    mut events_rx: EventReceiver,
) -> ForwardOutcome
where
    Tx: Sink<Message> + Unpin,
    Tx::Error: std::error::Error + Send + Sync + 'static,
    Rx: Stream<Item = Result<Message, E>> + Unpin,
{
    loop {
        tokio::select! {
            event = events_rx.recv() => {
                let Some(event) = event else {
                    return ForwardOutcome::SessionEnded;
                };
                if let Err(e) = send_msg(socket_tx, ServerMessage::from(event)).await {
                    warn!(error = ?e, "Failed to send event to client.");
                    return ForwardOutcome::ClientGone;
                }
            }
            frame = socket_rx.next() => match frame {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                    return ForwardOutcome::ClientGone;
                }
                // The client has nothing more to say once the interview runs.
                Some(Ok(_)) => {}
            }
        }
    }
}

/// Serializes a `ServerMessage` and sends it as a text frame.
pub(crate) async fn send_msg<S>(socket_tx: &mut S, msg: ServerMessage) -> Result<()>
where
    S: Sink<Message> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    let serialized = serde_json::to_string(&msg)?;
    socket_tx.send(Message::Text(serialized.into())).await?;
    Ok(())
}
