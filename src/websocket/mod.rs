//! WebSocket 连接桥
//!
//! 把 axum WebSocket 拆成两条泵：读泵把帧翻译为 `ClientFrame`，写泵把 `ServerFrame`
//! 写回套接字；会话本身由 `SessionOrchestrator` 在当前任务中驱动。

use axum::{
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};

use crate::api::app_state::AppState;
use crate::api::validation::validate_id;
use crate::error::AppError;
use crate::session::{ClientFrame, ClientMessage, ServerFrame, ServerMessage};

const FRAME_BUFFER: usize = 64;

/// `GET /ws/:user_id/:persona_id`
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path((user_id, persona_id)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Result<Response, AppError> {
    validate_id("user_id", &user_id)?;
    validate_id("persona_id", &persona_id)?;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, user_id, persona_id)))
}

async fn handle_socket(socket: WebSocket, state: AppState, user_id: String, persona_id: String) {
    let connection_id = uuid::Uuid::new_v4().to_string();
    info!(%connection_id, %user_id, %persona_id, "WebSocket connected");

    let (sink, stream) = socket.split();
    let (in_tx, in_rx) = mpsc::channel(FRAME_BUFFER);
    let (out_tx, out_rx) = mpsc::channel(FRAME_BUFFER);

    let reader = tokio::spawn(read_frames(stream, in_tx, out_tx.clone()));
    let writer = tokio::spawn(write_frames(sink, out_rx));

    match state
        .sessions
        .run(&user_id, &persona_id, in_rx, out_tx.clone())
        .await
    {
        Ok(summary) => debug!(
            %connection_id,
            model = %summary.model,
            turns = summary.turns,
            "Session finished"
        ),
        Err(e) => {
            warn!(%connection_id, error = %e, "Session ended with error");
            let message = ServerMessage::Error {
                message: e.to_string(),
            };
            let _ = out_tx.send(ServerFrame::Message(message)).await;
        }
    }

    reader.abort();
    drop(out_tx);
    if tokio::time::timeout(Duration::from_secs(2), writer).await.is_err() {
        warn!(%connection_id, "WebSocket writer did not drain in time");
    }
    info!(%connection_id, "WebSocket closed");
}

/// 读泵：二进制帧为音频，文本帧为 JSON；解析失败回一条错误消息
async fn read_frames(
    mut stream: SplitStream<WebSocket>,
    frames: mpsc::Sender<ClientFrame>,
    replies: mpsc::Sender<ServerFrame>,
) {
    while let Some(msg) = stream.next().await {
        let frame = match msg {
            Ok(Message::Binary(pcm)) => ClientFrame::Audio(pcm),
            Ok(Message::Text(text)) => match ClientMessage::parse(&text) {
                Ok(message) => ClientFrame::Message(message),
                Err(e) => {
                    let message = ServerMessage::Error {
                        message: e.to_string(),
                    };
                    let _ = replies.send(ServerFrame::Message(message)).await;
                    continue;
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!(error = %e, "WebSocket read error");
                break;
            }
        };
        if frames.send(frame).await.is_err() {
            break;
        }
    }
}

/// 写泵：直到所有发送端关闭
async fn write_frames(mut sink: SplitSink<WebSocket, Message>, frames: mpsc::Receiver<ServerFrame>) {
    let mut frames = ReceiverStream::new(frames);
    while let Some(frame) = frames.next().await {
        let msg = match frame {
            ServerFrame::Audio(bytes) => Message::Binary(bytes),
            ServerFrame::Message(message) => match serde_json::to_string(&message) {
                Ok(text) => Message::Text(text),
                Err(e) => {
                    error!(error = %e, "Failed to encode server message");
                    continue;
                }
            },
        };
        if sink.send(msg).await.is_err() {
            break;
        }
    }
    let _ = sink.close().await;
}
