//! WebSocket feed of deployment job updates.

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use pkgdeploy_core::{JobSnapshot, UserId};
use pkgdeploy_scheduler::{DEPLOYMENT_CHANNEL, Observer};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::AppState;
use crate::requester::Requester;

/// WebSocket upgrade handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Requester(user): Requester,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, user))
}

async fn handle_socket(socket: WebSocket, state: AppState, user: UserId) {
    info!(%user, "WebSocket connection established");

    let (mut sender, mut receiver) = socket.split();
    let mut updates = state.notifier.subscribe();
    let mut observer = Observer::new(user);

    loop {
        tokio::select! {
            msg = receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let Ok(cmd) = serde_json::from_str::<WsCommand>(&text) else {
                        debug!(%user, "Ignoring malformed WebSocket command");
                        continue;
                    };
                    let reply = handle_command(&mut observer, cmd);
                    if send(&mut sender, &reply).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    info!(%user, "WebSocket connection closed");
                    break;
                }
                Some(Err(e)) => {
                    warn!(error = %e, "WebSocket error");
                    break;
                }
                Some(Ok(_)) => {}
            },
            update = updates.recv() => match update {
                Ok(job) => {
                    if !observer.accepts(&job, state.nodes.as_ref()) {
                        continue;
                    }
                    let msg = WsMessage::JobUpdate {
                        channel: DEPLOYMENT_CHANNEL.to_string(),
                        job,
                    };
                    if send(&mut sender, &msg).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(%user, skipped, "WebSocket observer fell behind, updates dropped");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
}

async fn send(
    sender: &mut SplitSink<WebSocket, Message>,
    msg: &WsMessage,
) -> Result<(), axum::Error> {
    match serde_json::to_string(msg) {
        Ok(json) => sender.send(Message::Text(json.into())).await,
        Err(e) => {
            warn!(error = %e, "Failed to encode WebSocket message");
            Ok(())
        }
    }
}

fn handle_command(observer: &mut Observer, cmd: WsCommand) -> WsMessage {
    match cmd {
        WsCommand::Subscribe { channel } if channel == DEPLOYMENT_CHANNEL => {
            info!(user = %observer.user, channel = %channel, "Client subscribed");
            observer.subscribe(channel.clone());
            WsMessage::Subscribed { channel }
        }
        WsCommand::Subscribe { channel } => WsMessage::Error {
            message: format!("unknown channel {}", channel),
        },
        WsCommand::Unsubscribe { channel } => {
            info!(user = %observer.user, channel = %channel, "Client unsubscribed");
            observer.unsubscribe(&channel);
            WsMessage::Unsubscribed { channel }
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WsCommand {
    Subscribe { channel: String },
    Unsubscribe { channel: String },
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WsMessage {
    Subscribed { channel: String },
    Unsubscribed { channel: String },
    JobUpdate { channel: String, job: JobSnapshot },
    Error { message: String },
}
