//! 推理服务接缝
//!
//! 实时双向流（音频/文本进，分片流出）与一次性文本推理都视为外部黑盒，
//! 这里只定义 trait 与数据类型，以及基于 WebSocket / REST 的默认实现。

pub mod dream;
pub mod live;
pub mod text;
pub mod waterfall;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;

pub use dream::InferenceDreamGenerator;
pub use live::WebSocketLiveConnector;
pub use text::{HttpTextInference, TextInference};
pub use waterfall::ModelWaterfall;

/// 实时流输出的一个分片
#[derive(Debug, Clone, PartialEq)]
pub enum InferencePart {
    Text(String),
    /// 原始 16 位 PCM
    Audio(Vec<u8>),
    ToolCall {
        name: String,
        args: serde_json::Value,
    },
    /// 一个输出回合结束
    TurnComplete,
    /// 模型侧检测到用户插话
    Interrupted,
}

/// 发往实时流的输入
#[derive(Debug, Clone, PartialEq)]
pub enum LiveInput {
    /// 原始 16 位 PCM
    Audio(Vec<u8>),
    /// 用户输入的文本，结束用户回合
    Text(String),
    /// 系统提示注入，不结束回合
    Hint(String),
    Image { mime_type: String, data: Vec<u8> },
}

/// 建立实时流时的会话参数
#[derive(Debug, Clone, Default)]
pub struct LiveSetup {
    pub user_id: String,
    pub persona_id: String,
    pub system_instruction: String,
}

/// 一条已建立的实时流
///
/// 丢弃 `input` 即关闭上行；`output` 关闭表示流已结束。
pub struct LiveSession {
    pub model: String,
    pub input: mpsc::Sender<LiveInput>,
    pub output: mpsc::Receiver<InferencePart>,
}

#[async_trait]
pub trait LiveConnector: Send + Sync {
    async fn connect(&self, setup: &LiveSetup) -> Result<LiveSession>;
}
