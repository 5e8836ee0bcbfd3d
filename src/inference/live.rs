//! WebSocket 实时流连接器

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tracing::{debug, info, warn};

use crate::config::config::InferenceConfig;
use crate::error::{AppError, Result};
use crate::inference::{InferencePart, LiveConnector, LiveInput, LiveSession, LiveSetup};

const CHANNEL_CAPACITY: usize = 256;

pub struct WebSocketLiveConnector {
    config: InferenceConfig,
}

impl WebSocketLiveConnector {
    pub fn new(config: InferenceConfig) -> Self {
        Self { config }
    }

    fn url(&self) -> String {
        if self.config.api_key.is_empty() {
            self.config.live_url.clone()
        } else {
            format!("{}?key={}", self.config.live_url, self.config.api_key)
        }
    }

    async fn try_model(&self, model: &str, setup: &LiveSetup) -> Result<LiveSession> {
        let connect_timeout = Duration::from_secs(self.config.connect_timeout_secs.max(1));

        let (ws_stream, _) = tokio::time::timeout(connect_timeout, connect_async(self.url()))
            .await?
            .map_err(|e| AppError::Connection(format!("Live stream connect failed: {}", e)))?;
        let (mut write, mut read) = ws_stream.split();

        write
            .send(WsMessage::Text(setup_frame(model, setup).to_string()))
            .await
            .map_err(|e| AppError::Connection(e.to_string()))?;

        // 等待服务端确认 setup；模型不可用时服务端直接关闭连接
        match tokio::time::timeout(connect_timeout, read.next()).await? {
            Some(Ok(WsMessage::Text(text))) if text.contains("setupComplete") => {}
            Some(Ok(WsMessage::Binary(bytes)))
                if String::from_utf8_lossy(&bytes).contains("setupComplete") => {}
            Some(Ok(WsMessage::Close(frame))) => {
                return Err(AppError::Inference(format!(
                    "Live model {} rejected setup: {:?}",
                    model, frame
                )));
            }
            Some(Ok(other)) => {
                return Err(AppError::Inference(format!(
                    "Unexpected setup reply from {}: {:?}",
                    model, other
                )));
            }
            Some(Err(e)) => return Err(AppError::Connection(e.to_string())),
            None => {
                return Err(AppError::Connection(
                    "Live stream closed during setup".to_string(),
                ));
            }
        }

        let (input_tx, mut input_rx) = mpsc::channel::<LiveInput>(CHANNEL_CAPACITY);
        let (output_tx, output_rx) = mpsc::channel::<InferencePart>(CHANNEL_CAPACITY);
        let sample_rate = self.config.input_sample_rate;
        let persona_id = setup.persona_id.clone();

        tokio::spawn(async move {
            'pump: loop {
                tokio::select! {
                    input = input_rx.recv() => match input {
                        Some(input) => {
                            let frame = input_frame(&input, sample_rate).to_string();
                            if let Err(e) = write.send(WsMessage::Text(frame)).await {
                                warn!(persona_id = %persona_id, error = %e, "Live stream write failed");
                                break 'pump;
                            }
                        }
                        None => {
                            let _ = write.send(WsMessage::Close(None)).await;
                            break 'pump;
                        }
                    },
                    msg = read.next() => {
                        let text = match msg {
                            Some(Ok(WsMessage::Text(text))) => text,
                            Some(Ok(WsMessage::Binary(bytes))) => match String::from_utf8(bytes) {
                                Ok(text) => text,
                                Err(_) => continue,
                            },
                            Some(Ok(WsMessage::Ping(data))) => {
                                let _ = write.send(WsMessage::Pong(data)).await;
                                continue;
                            }
                            Some(Ok(WsMessage::Close(_))) | None => {
                                debug!(persona_id = %persona_id, "Live stream closed by server");
                                break 'pump;
                            }
                            Some(Ok(_)) => continue,
                            Some(Err(e)) => {
                                warn!(persona_id = %persona_id, error = %e, "Live stream read failed");
                                break 'pump;
                            }
                        };
                        for part in parse_server_message(&text) {
                            if output_tx.send(part).await.is_err() {
                                break 'pump;
                            }
                        }
                    }
                }
            }
        });

        Ok(LiveSession {
            model: model.to_string(),
            input: input_tx,
            output: output_rx,
        })
    }
}

#[async_trait]
impl LiveConnector for WebSocketLiveConnector {
    /// 依次尝试实时模型，直到有一个建立成功
    async fn connect(&self, setup: &LiveSetup) -> Result<LiveSession> {
        let mut last_error = AppError::Config("No live models configured".to_string());

        for model in &self.config.live_models {
            match self.try_model(model, setup).await {
                Ok(session) => {
                    info!(model = %model, persona_id = %setup.persona_id, "Live stream established");
                    return Ok(session);
                }
                Err(e) => {
                    warn!(model = %model, error = %e, "Live model unavailable, trying next");
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }
}

fn setup_frame(model: &str, setup: &LiveSetup) -> Value {
    json!({
        "setup": {
            "model": format!("models/{}", model),
            "generationConfig": { "responseModalities": ["AUDIO"] },
            "systemInstruction": { "parts": [{ "text": setup.system_instruction }] },
            "outputAudioTranscription": {}
        }
    })
}

pub(crate) fn input_frame(input: &LiveInput, sample_rate: u32) -> Value {
    match input {
        LiveInput::Audio(pcm) => json!({
            "realtimeInput": {
                "mediaChunks": [{
                    "mimeType": format!("audio/pcm;rate={}", sample_rate),
                    "data": BASE64.encode(pcm)
                }]
            }
        }),
        LiveInput::Image { mime_type, data } => json!({
            "realtimeInput": {
                "mediaChunks": [{ "mimeType": mime_type, "data": BASE64.encode(data) }]
            }
        }),
        LiveInput::Text(text) => json!({
            "clientContent": {
                "turns": [{ "role": "user", "parts": [{ "text": text }] }],
                "turnComplete": true
            }
        }),
        LiveInput::Hint(text) => json!({
            "clientContent": {
                "turns": [{ "role": "user", "parts": [{ "text": format!("[SYSTEM] {}", text) }] }],
                "turnComplete": false
            }
        }),
    }
}

/// 解析服务端消息为有序分片；无法识别的消息返回空
pub(crate) fn parse_server_message(raw: &str) -> Vec<InferencePart> {
    let Ok(message) = serde_json::from_str::<Value>(raw) else {
        return Vec::new();
    };
    let mut parts = Vec::new();

    if let Some(calls) = message["toolCall"]["functionCalls"].as_array() {
        for call in calls {
            parts.push(InferencePart::ToolCall {
                name: call["name"].as_str().unwrap_or_default().to_string(),
                args: call["args"].clone(),
            });
        }
    }

    let content = &message["serverContent"];
    if content.is_null() {
        return parts;
    }

    if content["interrupted"].as_bool() == Some(true) {
        parts.push(InferencePart::Interrupted);
    }

    if let Some(model_parts) = content["modelTurn"]["parts"].as_array() {
        for part in model_parts {
            if let Some(text) = part["text"].as_str() {
                parts.push(InferencePart::Text(text.to_string()));
            }
            if let Some(data) = part["inlineData"]["data"].as_str() {
                match BASE64.decode(data) {
                    Ok(bytes) => parts.push(InferencePart::Audio(bytes)),
                    Err(e) => debug!(error = %e, "Dropping undecodable audio part"),
                }
            }
        }
    }

    // 模型语音的文字转写
    if let Some(text) = content["outputTranscription"]["text"].as_str() {
        parts.push(InferencePart::Text(text.to_string()));
    }

    if content["turnComplete"].as_bool() == Some(true) {
        parts.push(InferencePart::TurnComplete);
    }

    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_parse_model_turn_with_audio_and_completion() {
        let audio = BASE64.encode([1u8, 2, 3, 4]);
        let raw = json!({
            "serverContent": {
                "modelTurn": { "parts": [
                    { "text": "hello" },
                    { "inlineData": { "mimeType": "audio/pcm", "data": audio } }
                ]},
                "turnComplete": true
            }
        })
        .to_string();

        assert_eq!(
            parse_server_message(&raw),
            vec![
                InferencePart::Text("hello".to_string()),
                InferencePart::Audio(vec![1, 2, 3, 4]),
                InferencePart::TurnComplete,
            ]
        );
    }

    #[test]
    fn test_parse_tool_call_and_interrupt() {
        let raw = json!({
            "toolCall": { "functionCalls": [{ "name": "look_up", "args": { "q": "tea" } }] }
        })
        .to_string();
        assert_eq!(
            parse_server_message(&raw),
            vec![InferencePart::ToolCall {
                name: "look_up".to_string(),
                args: json!({ "q": "tea" })
            }]
        );

        let raw = json!({ "serverContent": { "interrupted": true } }).to_string();
        assert_eq!(parse_server_message(&raw), vec![InferencePart::Interrupted]);
        assert!(parse_server_message("not json").is_empty());
    }

    #[test]
    fn test_audio_frame_is_base64_pcm() {
        let frame = input_frame(&LiveInput::Audio(vec![0, 1]), 16000);
        let chunk = &frame["realtimeInput"]["mediaChunks"][0];
        assert_eq!(chunk["mimeType"], "audio/pcm;rate=16000");
        assert_eq!(chunk["data"], BASE64.encode([0u8, 1]));

        let hint = input_frame(&LiveInput::Hint("be brief".into()), 16000);
        assert_eq!(hint["clientContent"]["turnComplete"], false);
    }

    #[tokio::test]
    async fn test_connect_falls_through_to_working_model() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            // 第一个连接：拒绝模型
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let _setup = ws.next().await;
            let _ = ws.send(WsMessage::Close(None)).await;

            // 第二个连接：正常会话
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let setup = ws.next().await.unwrap().unwrap();
            assert!(setup.to_text().unwrap().contains("models/good-model"));
            ws.send(WsMessage::Text(json!({ "setupComplete": {} }).to_string()))
                .await
                .unwrap();
            let _input = ws.next().await;
            ws.send(WsMessage::Text(
                json!({ "serverContent": { "modelTurn": { "parts": [{ "text": "hi" }] }, "turnComplete": true } })
                    .to_string(),
            ))
            .await
            .unwrap();
        });

        let connector = WebSocketLiveConnector::new(InferenceConfig {
            live_url: format!("ws://{}", addr),
            live_models: vec!["bad-model".into(), "good-model".into()],
            connect_timeout_secs: 5,
            input_sample_rate: 16000,
            ..Default::default()
        });

        let mut session = connector.connect(&LiveSetup::default()).await.unwrap();
        assert_eq!(session.model, "good-model");
        session.input.send(LiveInput::Text("hello".into())).await.unwrap();

        assert_eq!(session.output.recv().await, Some(InferencePart::Text("hi".into())));
        assert_eq!(session.output.recv().await, Some(InferencePart::TurnComplete));
    }
}
