//! 实时连接
//!
//! 每个 WebSocket 在分发器里注册一个连接，自动订阅调用方的用户主题；
//! 会话主题需要客户端显式订阅，并在订阅时校验成员身份；成员被移除或会话删除后，
//! 分发器会收回这些订阅。
//! 连接建立后服务器先下发 `connection_id`，客户端发消息时通过
//! `X-Connection-Id` 带回，用来排除自己的回显。

use application::{Connection, ConnectionId, Topic};
use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use domain::UserId;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::{auth::CurrentUser, error::ApiError, state::AppState};

const REPLY_BUFFER: usize = 16;

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum ClientCommand {
    Subscribe { conversation_id: String },
    Unsubscribe { conversation_id: String },
    /// 心跳，同时刷新在线状态
    Ping,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerFrame {
    Connected { connection_id: ConnectionId },
    Subscribed { conversation_id: String },
    Unsubscribed { conversation_id: String },
    Pong,
    Error { code: &'static str, message: String },
}

impl From<ApiError> for ServerFrame {
    fn from(error: ApiError) -> Self {
        ServerFrame::Error {
            code: error.code(),
            message: error.message().to_owned(),
        }
    }
}

fn encode(frame: &ServerFrame) -> Option<String> {
    match serde_json::to_string(frame) {
        Ok(json) => Some(json),
        Err(err) => {
            tracing::warn!(error = %err, "failed to serialize websocket frame");
            None
        }
    }
}

pub async fn websocket_upgrade(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| websocket_handler(socket, state, user_id))
}

async fn websocket_handler(socket: WebSocket, state: AppState, user_id: UserId) {
    let Connection { id, mut events } = state.dispatcher.connect_user(user_id.clone()).await;
    let user_topic = Topic::User(user_id.clone());
    if let Err(err) = state.presence.mark_online(&user_id).await {
        tracing::warn!(error = %err, user_id = %user_id, "failed to mark user online");
    }
    tracing::info!(connection_id = %id, user_id = %user_id, "websocket connected");

    let (mut sender, mut incoming) = socket.split();
    let (reply_tx, mut reply_rx) = mpsc::channel::<String>(REPLY_BUFFER);

    let hello = encode(&ServerFrame::Connected { connection_id: id });
    let send_task = tokio::spawn(async move {
        if let Some(hello) = hello {
            if sender.send(WsMessage::Text(hello.into())).await.is_err() {
                return;
            }
        }
        loop {
            let payload = tokio::select! {
                event = events.recv() => match event {
                    Some(event) => match serde_json::to_string(event.as_ref()) {
                        Ok(json) => json,
                        Err(err) => {
                            tracing::warn!(error = %err, "failed to serialize realtime event");
                            continue;
                        }
                    },
                    None => break,
                },
                reply = reply_rx.recv() => match reply {
                    Some(reply) => reply,
                    None => break,
                },
            };
            if sender.send(WsMessage::Text(payload.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(message)) = incoming.next().await {
        match message {
            WsMessage::Text(text) => {
                let frame = handle_command(&state, id, &user_id, text.as_str()).await;
                let Some(reply) = encode(&frame) else {
                    continue;
                };
                if reply_tx.send(reply).await.is_err() {
                    break;
                }
            }
            WsMessage::Close(_) => break,
            _ => {}
        }
    }

    drop(reply_tx);
    state.dispatcher.disconnect(id).await;
    send_task.abort();

    // 同一用户可能还有其他终端在线
    if state.dispatcher.subscriber_count(&user_topic).await == 0 {
        if let Err(err) = state.presence.mark_offline(&user_id).await {
            tracing::warn!(error = %err, user_id = %user_id, "failed to mark user offline");
        }
    }
    tracing::info!(connection_id = %id, user_id = %user_id, "websocket disconnected");
}

async fn handle_command(
    state: &AppState,
    connection_id: ConnectionId,
    user_id: &UserId,
    text: &str,
) -> ServerFrame {
    let command = match serde_json::from_str::<ClientCommand>(text) {
        Ok(command) => command,
        Err(err) => return ApiError::bad_request(format!("invalid command: {err}")).into(),
    };

    let result: Result<ServerFrame, ApiError> = async {
        match command {
            ClientCommand::Subscribe { conversation_id } => {
                let conversation_id = state.identity.locate_conversation(&conversation_id).await?;
                state
                    .conversation_service
                    .ensure_member(&conversation_id, user_id)
                    .await?;
                let topic = Topic::Conversation(conversation_id.clone());
                state.dispatcher.subscribe(connection_id, topic.clone()).await;
                // 校验与订阅之间被移出会话时，移除方的撤销可能早于这次订阅
                if let Err(err) = state
                    .conversation_service
                    .ensure_member(&conversation_id, user_id)
                    .await
                {
                    state.dispatcher.unsubscribe(connection_id, &topic).await;
                    return Err(err.into());
                }
                Ok(ServerFrame::Subscribed {
                    conversation_id: conversation_id.to_string(),
                })
            }
            ClientCommand::Unsubscribe { conversation_id } => {
                let conversation_id = state.identity.locate_conversation(&conversation_id).await?;
                state
                    .dispatcher
                    .unsubscribe(connection_id, &Topic::Conversation(conversation_id.clone()))
                    .await;
                Ok(ServerFrame::Unsubscribed {
                    conversation_id: conversation_id.to_string(),
                })
            }
            ClientCommand::Ping => {
                state.presence.mark_online(user_id).await?;
                Ok(ServerFrame::Pong)
            }
        }
    }
    .await;

    result.unwrap_or_else(ServerFrame::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_use_action_tag() {
        let command: ClientCommand =
            serde_json::from_str(r#"{"action":"subscribe","conversation_id":"42"}"#).unwrap();
        assert!(matches!(command, ClientCommand::Subscribe { conversation_id } if conversation_id == "42"));
        assert!(matches!(
            serde_json::from_str::<ClientCommand>(r#"{"action":"ping"}"#).unwrap(),
            ClientCommand::Ping
        ));
    }

    #[test]
    fn error_frames_carry_api_code() {
        let frame = ServerFrame::from(ApiError::bad_request("nope"));
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["code"], "BAD_REQUEST");
    }
}
