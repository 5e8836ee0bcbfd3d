//! 客户端连接协议
//!
//! 二进制帧是 16 位 PCM 音频；文本帧是带 `type` 标签的 JSON。

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlAction {
    Interrupt,
    #[serde(other)]
    Unknown,
}

/// 客户端发来的 JSON 消息
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Control {
        action: ControlAction,
    },
    /// 客户端本地语音识别得到的用户转录
    NativeTranscript {
        text: String,
    },
    /// base64 编码的图片
    Image {
        data: String,
        #[serde(default = "default_image_mime")]
        mime_type: String,
    },
    /// 用户键入的文本
    Text {
        text: String,
    },
}

fn default_image_mime() -> String {
    "image/jpeg".to_string()
}

impl ClientMessage {
    pub fn parse(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| AppError::Validation(format!("Invalid client message: {}", e)))
    }

    /// 解码图片负载，允许带 `data:*;base64,` 前缀
    pub fn decode_image(data: &str) -> Result<Vec<u8>> {
        let payload = data.split_once(";base64,").map_or(data, |(_, rest)| rest);
        BASE64
            .decode(payload.trim())
            .map_err(|e| AppError::Validation(format!("Invalid image payload: {}", e)))
    }
}

/// 发给客户端的 JSON 消息
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Text { text: String },
    TurnComplete,
    Interrupted,
    ToolCall { name: String, args: serde_json::Value },
    Error { message: String },
}

/// 与传输无关的入站帧
#[derive(Debug, Clone, PartialEq)]
pub enum ClientFrame {
    Audio(Vec<u8>),
    Message(ClientMessage),
}

/// 与传输无关的出站帧
#[derive(Debug, Clone, PartialEq)]
pub enum ServerFrame {
    Audio(Vec<u8>),
    Message(ServerMessage),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(r#"{"type":"control","action":"interrupt"}"#, ClientMessage::Control { action: ControlAction::Interrupt })]
    #[case(r#"{"type":"control","action":"mute"}"#, ClientMessage::Control { action: ControlAction::Unknown })]
    #[case(r#"{"type":"native_transcript","text":"hi"}"#, ClientMessage::NativeTranscript { text: "hi".into() })]
    #[case(r#"{"type":"text","text":"hello"}"#, ClientMessage::Text { text: "hello".into() })]
    #[case(
        r#"{"type":"image","data":"AAEC"}"#,
        ClientMessage::Image { data: "AAEC".into(), mime_type: "image/jpeg".into() }
    )]
    fn test_parse_client_messages(#[case] raw: &str, #[case] expected: ClientMessage) {
        assert_eq!(ClientMessage::parse(raw).unwrap(), expected);
    }

    #[test]
    fn test_unknown_type_is_validation_error() {
        let err = ClientMessage::parse(r#"{"type":"dance"}"#).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn test_decode_image_accepts_data_url() {
        assert_eq!(ClientMessage::decode_image("AAEC").unwrap(), vec![0, 1, 2]);
        assert_eq!(
            ClientMessage::decode_image("data:image/png;base64,AAEC").unwrap(),
            vec![0, 1, 2]
        );
        assert!(ClientMessage::decode_image("%%%").is_err());
    }

    #[test]
    fn test_server_message_shape() {
        let json = serde_json::to_value(ServerMessage::TurnComplete).unwrap();
        assert_eq!(json, serde_json::json!({"type": "turn_complete"}));
        let json = serde_json::to_value(ServerMessage::Text { text: "hey".into() }).unwrap();
        assert_eq!(json, serde_json::json!({"type": "text", "text": "hey"}));
    }
}
