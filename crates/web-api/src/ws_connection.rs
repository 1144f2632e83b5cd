use application::RoomSession;
use axum::extract::ws::{CloseFrame, Message as WsMessage, Utf8Bytes, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

/// WebSocket 写操作命令
///
/// 接收循环通过命令通道请求写操作，sender 只由发送任务持有
#[derive(Debug)]
enum WsCommand {
    SendPong(Vec<u8>),
}

/// 运行一个已通过授权的房间会话，直到任一方向断开
pub async fn serve(socket: WebSocket, mut session: RoomSession) {
    let room_id = session.room().id.clone();
    let user_id = session.user().id;

    let mut events = match session.subscribe().await {
        Ok(events) => events,
        Err(err) => {
            tracing::error!(room_id = %room_id, user_id = %user_id, error = %err, "订阅房间失败");
            session.close().await;
            return;
        }
    };
    tracing::info!(room_id = %room_id, user_id = %user_id, "WebSocket 连接已建立");

    let (mut sender, mut incoming) = socket.split();
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<WsCommand>(32);

    // 发送任务：统一处理所有对 WebSocket sender 的写操作
    let mut send_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(cmd) = cmd_rx.recv() => {
                    match cmd {
                        WsCommand::SendPong(data) => {
                            if sender.send(WsMessage::Pong(data.into())).await.is_err() {
                                tracing::warn!("Failed to send pong message");
                                break;
                            }
                        }
                    }
                }
                Some(frame) = events.recv() => {
                    if sender.send(WsMessage::Text(frame.to_string().into())).await.is_err() {
                        tracing::debug!("客户端已断开，停止转发");
                        break;
                    }
                }
                else => break,
            }
        }
        tracing::debug!("WebSocket发送任务结束");
    });

    // 接收循环留在当前任务，会话由它独占
    loop {
        tokio::select! {
            message = incoming.next() => {
                let Some(message) = message else { break };
                match message {
                    Ok(WsMessage::Text(text)) => session.receive_text(text.as_str()).await,
                    Ok(WsMessage::Binary(bytes)) => session.receive_binary(&bytes).await,
                    Ok(WsMessage::Ping(data)) => {
                        if cmd_tx.send(WsCommand::SendPong(data.to_vec())).await.is_err() {
                            break;
                        }
                    }
                    Ok(WsMessage::Pong(_)) => {}
                    Ok(WsMessage::Close(_)) => {
                        tracing::debug!("WebSocket收到关闭消息");
                        break;
                    }
                    Err(err) => {
                        tracing::debug!(error = %err, "WebSocket读取失败");
                        break;
                    }
                }
            }
            _ = &mut send_task => break,
        }
    }

    send_task.abort();
    session.close().await;
    tracing::info!(room_id = %room_id, user_id = %user_id, "WebSocket连接已断开，在线状态已清理");
}

/// 非房间成员：接受连接后立即以关闭码关闭
pub async fn reject(mut socket: WebSocket, code: u16) {
    let frame = CloseFrame {
        code,
        reason: Utf8Bytes::from_static("not a room member"),
    };
    if let Err(err) = socket.send(WsMessage::Close(Some(frame))).await {
        tracing::debug!(error = %err, "发送关闭帧失败");
    }
}
