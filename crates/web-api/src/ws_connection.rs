use application::{AuthenticatedUser, ClientEvent, ConnectionId, LiveConnection};
use axum::extract::ws::{Message as WsMessage, WebSocket};
use domain::ChatId;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::state::AppState;

/// WebSocket 连接
///
/// 持有已认证的 `LiveConnection`，负责：
/// - 把出站队列中的服务端事件写给客户端
/// - 解析客户端事件并交给消息管道
/// - 结束时注销连接
pub struct WebSocketConnection {
    socket: WebSocket,
    state: AppState,
    live: LiveConnection,
}

impl WebSocketConnection {
    pub fn new(socket: WebSocket, state: AppState, live: LiveConnection) -> Self {
        Self {
            socket,
            state,
            live,
        }
    }

    /// 运行连接主循环，直到任一方向结束
    pub async fn run(self) {
        let Self {
            socket,
            state,
            mut live,
        } = self;

        let Some(mut outbound) = live.take_receiver() else {
            tracing::warn!(connection_id = %live.id(), "出站队列已被取走");
            return;
        };
        let user = live.user().clone();
        let connection_id = live.id();

        let (mut sender, mut incoming) = socket.split();

        // 心跳回应与业务事件共用同一个写端
        let (cmd_tx, mut cmd_rx) = mpsc::channel::<WsCommand>(32);

        let mut send_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(cmd) = cmd_rx.recv() => {
                        let WsCommand::SendPong(data) = cmd;
                        if sender.send(WsMessage::Pong(data.into())).await.is_err() {
                            tracing::warn!("Failed to send pong message");
                            break;
                        }
                    }
                    event = outbound.recv() => {
                        // 发送端全部释放：连接被注销或被同一用户的新连接替换
                        let Some(event) = event else {
                            let _ = sender.send(WsMessage::Close(None)).await;
                            break;
                        };
                        let payload = match serde_json::to_string(event.as_ref()) {
                            Ok(json) => json,
                            Err(err) => {
                                tracing::warn!(error = %err, "failed to serialize websocket payload");
                                continue;
                            }
                        };
                        if sender.send(WsMessage::Text(payload.into())).await.is_err() {
                            tracing::warn!("Failed to send text message");
                            break;
                        }
                    }
                }
            }
        });

        let mut recv_task = tokio::spawn(async move {
            while let Some(Ok(message)) = incoming.next().await {
                match message {
                    WsMessage::Close(_) => {
                        tracing::debug!("WebSocket收到关闭消息");
                        break;
                    }
                    WsMessage::Ping(data) => {
                        if cmd_tx.send(WsCommand::SendPong(data.to_vec())).await.is_err() {
                            break;
                        }
                    }
                    WsMessage::Text(text) => {
                        handle_client_event(&state, &user, connection_id, text.as_str()).await;
                    }
                    WsMessage::Pong(_) | WsMessage::Binary(_) => {}
                }
            }
        });

        tokio::select! {
            _ = &mut send_task => recv_task.abort(),
            _ = &mut recv_task => send_task.abort(),
        }

        live.disconnect();
    }
}

/// 处理单个客户端帧。错误只记录日志，不回传给任何连接。
async fn handle_client_event(
    state: &AppState,
    user: &AuthenticatedUser,
    connection_id: ConnectionId,
    frame: &str,
) {
    let event = match serde_json::from_str::<ClientEvent>(frame) {
        Ok(event) => event,
        Err(err) => {
            tracing::warn!(
                user_id = %user.id,
                connection_id = %connection_id,
                error = %err,
                "无法解析客户端事件"
            );
            return;
        }
    };

    match event {
        ClientEvent::NewMessage {
            chat_id, message, ..
        } => match state.pipeline.send_text(user, chat_id, &message).await {
            Ok(sent) => tracing::debug!(
                chat_id = %chat_id,
                delivered = sent.report.delivered,
                offline = sent.report.offline,
                "消息已扇出"
            ),
            Err(err) => tracing::warn!(
                user_id = %user.id,
                chat_id = %chat_id,
                error = %err,
                "发送消息失败"
            ),
        },
        ClientEvent::StartTyping { chat_id, .. } => {
            forward_typing(state, user, connection_id, chat_id, true).await
        }
        ClientEvent::StopTyping { chat_id, .. } => {
            forward_typing(state, user, connection_id, chat_id, false).await
        }
    }
}

async fn forward_typing(
    state: &AppState,
    user: &AuthenticatedUser,
    connection_id: ConnectionId,
    chat_id: ChatId,
    started: bool,
) {
    if let Err(err) = state
        .pipeline
        .typing(user, connection_id, chat_id, started)
        .await
    {
        tracing::warn!(
            user_id = %user.id,
            chat_id = %chat_id,
            error = %err,
            "输入状态转发失败"
        );
    }
}

/// WebSocket 写操作命令
#[derive(Debug)]
enum WsCommand {
    SendPong(Vec<u8>),
}
