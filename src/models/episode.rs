//! 记忆数据模型
//!
//! 情景记忆（MemoryEpisode）在每个对话轮次或整个会话结束时创建；
//! 整合为梦境后通过保留的情绪效价哨兵值标记为“已消费”，
//! 已消费的情景不会再出现在“相关/最近”查询中。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 已消费情景的保留效价
pub const CONSUMED_VALENCE: f32 = -999.0;

/// 情景记忆
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEpisode {
    pub id: String,
    pub user_id: String,
    /// 参与的人格
    pub persona_id: Option<String>,
    /// 摘要
    pub summary: String,
    /// 原始转录
    pub transcript: Option<String>,
    /// 情绪效价 [-1, 1]，或 CONSUMED_VALENCE
    pub valence: f32,
    /// 向量表示
    pub embedding: Option<Vec<f32>>,
    pub created_at: DateTime<Utc>,
}

impl MemoryEpisode {
    pub fn new(user_id: &str, persona_id: Option<&str>, summary: &str, valence: f32) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            persona_id: persona_id.map(str::to_string),
            summary: summary.to_string(),
            transcript: None,
            valence: valence.clamp(-1.0, 1.0),
            embedding: None,
            created_at: Utc::now(),
        }
    }

    /// 从完整会话转录创建情景
    pub fn from_transcript(
        user_id: &str,
        persona_id: Option<&str>,
        transcript: &str,
        valence: f32,
    ) -> Self {
        let mut episode = Self::new(user_id, persona_id, &summarize(transcript, 280), valence);
        episode.transcript = Some(transcript.to_string());
        episode
    }

    pub fn with_transcript(mut self, transcript: &str) -> Self {
        self.transcript = Some(transcript.to_string());
        self
    }

    pub fn is_consumed(&self) -> bool {
        self.valence == CONSUMED_VALENCE
    }

    pub fn mark_consumed(&mut self) {
        self.valence = CONSUMED_VALENCE;
    }
}

/// 截取摘要：按字符截断并在词边界处收尾
pub fn summarize(text: &str, max_chars: usize) -> String {
    let cleaned = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if cleaned.chars().count() <= max_chars {
        return cleaned;
    }
    let cut: String = cleaned.chars().take(max_chars).collect();
    match cut.rfind(' ') {
        Some(pos) if pos > max_chars / 2 => format!("{}...", &cut[..pos]),
        _ => format!("{}...", cut),
    }
}

/// 梦境：仅在整合期间由一批未消费情景产生
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dream {
    pub id: String,
    pub user_id: String,
    pub theme: String,
    /// 强度 [0, 1]
    pub intensity: f32,
    /// 超现实度 [0, 1]
    pub surrealism: f32,
    pub embedding: Option<Vec<f32>>,
    pub created_at: DateTime<Utc>,
}

impl Dream {
    pub fn from_draft(user_id: &str, draft: DreamDraft) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            theme: draft.theme,
            intensity: draft.intensity.clamp(0.0, 1.0),
            surrealism: draft.surrealism.clamp(0.0, 1.0),
            embedding: None,
            created_at: Utc::now(),
        }
    }
}

/// 梦境生成器返回的草稿
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DreamDraft {
    pub theme: String,
    pub intensity: f32,
    pub surrealism: f32,
}

/// 事实节点
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fact {
    pub id: String,
    pub user_id: String,
    pub content: String,
    pub embedding: Option<Vec<f32>>,
    pub created_at: DateTime<Utc>,
}

impl Fact {
    pub fn new(user_id: &str, content: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            content: content.to_string(),
            embedding: None,
            created_at: Utc::now(),
        }
    }
}

/// 可做相似度检索的记忆种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemoryKind {
    #[serde(rename = "episode")]
    Episode,
    #[serde(rename = "fact")]
    Fact,
    #[serde(rename = "event")]
    Event,
    #[serde(rename = "dream")]
    Dream,
}

impl MemoryKind {
    pub const RETRIEVABLE: [MemoryKind; 3] = [MemoryKind::Episode, MemoryKind::Fact, MemoryKind::Event];
}

impl std::fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemoryKind::Episode => write!(f, "episode"),
            MemoryKind::Fact => write!(f, "fact"),
            MemoryKind::Event => write!(f, "event"),
            MemoryKind::Dream => write!(f, "dream"),
        }
    }
}

/// 相似度检索结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredMemory {
    pub kind: MemoryKind,
    pub id: String,
    pub text: String,
    pub score: f32,
    pub created_at: DateTime<Utc>,
}

/// 一次整合的结果
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsolidationReport {
    pub user_id: String,
    /// 本次折叠的情景数
    pub episodes_consumed: usize,
    pub dream_id: Option<String>,
    pub mean_valence: Option<f32>,
    /// (persona_id, 旧亲和度, 新亲和度)
    pub affinity_updates: Vec<(String, f32, f32)>,
}
