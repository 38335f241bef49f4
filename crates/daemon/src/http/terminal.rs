//! Terminal WebSocket endpoint.
//!
//! Each connection gets its own shell. The socket carries raw terminal bytes
//! in both directions; there is no envelope and no sub-protocol.

use std::borrow::Cow;
use std::sync::Arc;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::Json;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use protocol::SessionSummary;
use tracing::{info, warn};

use super::AppState;
use crate::terminal::{
    InputSource, OutputFrame, OutputSink, PtySession, Relay, RelayError, SessionError,
};

/// Longest close reason a control frame can carry.
const MAX_CLOSE_REASON: usize = 123;

pub(super) async fn upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| serve_terminal(socket, state))
}

pub(super) async fn list_sessions(State(state): State<AppState>) -> Json<Vec<SessionSummary>> {
    Json(state.sessions.list())
}

async fn serve_terminal(socket: WebSocket, state: AppState) {
    let mut slot = match state.sessions.reserve() {
        Ok(slot) => slot,
        Err(e) => return refuse(socket, &e).await,
    };

    let config = state.config.terminal.clone();
    let cwd = state.sandbox.root().to_path_buf();
    let opened = tokio::task::spawn_blocking(move || PtySession::open(&config, Some(&cwd)))
        .await
        .unwrap_or_else(|e| {
            Err(SessionError::ResourceExhausted(format!(
                "session start task failed: {e}"
            )))
        });
    let (session, io) = match opened {
        Ok(opened) => opened,
        Err(e) => return refuse(socket, &e).await,
    };
    slot.attach(&session);

    let session_id = session.id().clone();
    info!(session_id = %session_id, pid = ?session.pid(), "Terminal relay started");

    let (sink, stream) = socket.split();
    let mut output = WsOutput { sink };
    let mut input = WsInput { stream };

    let report = Relay::new(Arc::clone(&session), &state.config.terminal)
        .run(io, &mut output, &mut input)
        .await;

    info!(
        session_id = %session_id,
        trigger = ?report.trigger,
        released = report.close.is_released(),
        bytes_in = report.bytes_in,
        bytes_out = report.bytes_out,
        "Terminal relay finished"
    );

    output.close().await;
    drop(slot);
}

/// Closes a socket for which no session could be started.
async fn refuse(mut socket: WebSocket, error: &SessionError) {
    warn!(error = %error, "Refusing terminal connection");

    let mut reason = error.to_string();
    if reason.len() > MAX_CLOSE_REASON {
        let mut end = MAX_CLOSE_REASON;
        while !reason.is_char_boundary(end) {
            end -= 1;
        }
        reason.truncate(end);
    }

    let frame = CloseFrame {
        code: close_code::ERROR,
        reason: Cow::Owned(reason),
    };
    let _ = socket.send(Message::Close(Some(frame))).await;
}

/// Outbound half of the terminal socket.
struct WsOutput {
    sink: SplitSink<WebSocket, Message>,
}

impl WsOutput {
    /// Sends a normal close frame, ignoring a client that is already gone.
    async fn close(&mut self) {
        let frame = CloseFrame {
            code: close_code::NORMAL,
            reason: Cow::Borrowed("session closed"),
        };
        let _ = self.sink.send(Message::Close(Some(frame))).await;
        let _ = self.sink.close().await;
    }
}

impl OutputSink for WsOutput {
    async fn send_output(&mut self, frame: OutputFrame) -> Result<(), RelayError> {
        let message = match frame {
            OutputFrame::Text(text) => Message::Text(text),
            OutputFrame::Binary(bytes) => Message::Binary(bytes.to_vec()),
        };
        self.sink
            .send(message)
            .await
            .map_err(|e| RelayError::Channel(e.to_string()))
    }
}

/// Inbound half of the terminal socket.
struct WsInput {
    stream: SplitStream<WebSocket>,
}

impl InputSource for WsInput {
    async fn next_input(&mut self) -> Option<Result<Bytes, RelayError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(Bytes::from(text))),
                Ok(Message::Binary(data)) => return Some(Ok(Bytes::from(data))),
                Ok(Message::Close(_)) => return None,
                Ok(Message::Ping(_) | Message::Pong(_)) => continue,
                Err(e) => return Some(Err(RelayError::Channel(e.to_string()))),
            }
        }
    }
}
