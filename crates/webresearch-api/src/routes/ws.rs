use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webresearch_core::{DynProgressSink, ProgressUpdate};

use crate::payload::SessionPayload;
use crate::state::{AppState, ResearchRequest};

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientFrame {
    Query(ResearchRequest),
    Ping,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerFrame {
    Progress {
        step: u32,
        total: u32,
        status: &'static str,
        message: String,
    },
    Result(SessionPayload),
    Error {
        message: String,
    },
    Pong,
}

impl From<ProgressUpdate> for ServerFrame {
    fn from(update: ProgressUpdate) -> Self {
        ServerFrame::Progress {
            step: update.step_number,
            total: update.total_steps,
            status: update.status.as_str(),
            message: update.message,
        }
    }
}

pub(super) async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    info!("websocket connection established");

    while let Some(message) = socket.recv().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(err) => {
                warn!(error = %err, "websocket receive failed");
                break;
            }
        };

        let frame = match serde_json::from_str::<ClientFrame>(&text) {
            Ok(frame) => frame,
            Err(err) => {
                debug!(error = %err, "unrecognised websocket frame");
                let reply = ServerFrame::Error {
                    message: format!("Invalid message: {err}"),
                };
                if send_frame(&mut socket, &reply).await.is_err() {
                    break;
                }
                continue;
            }
        };

        let connection = match frame {
            ClientFrame::Ping => match send_frame(&mut socket, &ServerFrame::Pong).await {
                Ok(()) => Connection::Open,
                Err(_) => Connection::Closed,
            },
            ClientFrame::Query(request) => run_query(&mut socket, &state, request).await,
        };
        if connection == Connection::Closed {
            break;
        }
    }

    info!("websocket connection closed");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Connection {
    Open,
    Closed,
}

/// What a client frame means while a session is already streaming.
#[derive(Debug, PartialEq, Eq)]
enum Interjection {
    Closed,
    Ping,
    Busy,
    Ignore,
}

fn interjection(message: Option<Result<Message, axum::Error>>) -> Interjection {
    match message {
        None | Some(Err(_)) | Some(Ok(Message::Close(_))) => Interjection::Closed,
        Some(Ok(Message::Text(text))) => match serde_json::from_str::<ClientFrame>(&text) {
            Ok(ClientFrame::Ping) => Interjection::Ping,
            _ => Interjection::Busy,
        },
        Some(Ok(_)) => Interjection::Ignore,
    }
}

/// Streams progress frames while the session runs, then the result or error.
/// The socket is read concurrently so a client close aborts the session
/// immediately.
async fn run_query(socket: &mut WebSocket, state: &AppState, request: ResearchRequest) -> Connection {
    let (tx, mut rx) = mpsc::unbounded_channel::<ProgressUpdate>();
    let sink: DynProgressSink = std::sync::Arc::new(tx);

    let runner = state.clone();
    let task = tokio::spawn(async move { runner.run_session(request, Some(sink)).await });

    loop {
        tokio::select! {
            update = rx.recv() => {
                let Some(update) = update else { break };
                if let Err(err) = send_frame(socket, &ServerFrame::from(update)).await {
                    warn!(error = %err, "client went away, aborting research session");
                    task.abort();
                    return Connection::Closed;
                }
            }
            incoming = socket.recv() => {
                let reply = match interjection(incoming) {
                    Interjection::Closed => {
                        info!("client closed the socket, aborting research session");
                        task.abort();
                        return Connection::Closed;
                    }
                    Interjection::Ping => ServerFrame::Pong,
                    Interjection::Busy => ServerFrame::Error {
                        message: "A research session is already running on this connection".into(),
                    },
                    Interjection::Ignore => continue,
                };
                if send_frame(socket, &reply).await.is_err() {
                    task.abort();
                    return Connection::Closed;
                }
            }
        }
    }

    let reply = match task.await {
        Ok(Ok(session)) => ServerFrame::Result(SessionPayload::from(&session)),
        Ok(Err(err)) => ServerFrame::Error {
            message: err.message().to_string(),
        },
        Err(err) => ServerFrame::Error {
            message: format!("research task failed: {err}"),
        },
    };
    match send_frame(socket, &reply).await {
        Ok(()) => Connection::Open,
        Err(_) => Connection::Closed,
    }
}

async fn send_frame(socket: &mut WebSocket, frame: &ServerFrame) -> Result<(), axum::Error> {
    let payload = match serde_json::to_string(frame) {
        Ok(payload) => payload,
        Err(err) => {
            warn!(error = %err, "failed to encode websocket frame");
            return Ok(());
        }
    };
    socket.send(Message::Text(payload)).await
}
