//! 关系边模型
//!
//! ResonanceEdge 连接用户与人格，PersonaAffinityEdge 连接两个人格。
//! 每对节点恰好一条边，首次访问时以固定默认值惰性创建。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::clamp_level;

/// 用户与人格首次真实接触时的亲和度
pub const NEUTRAL_AFFINITY: f32 = 10.0;

/// 人格之间的中性亲和度
pub const PEER_NEUTRAL_AFFINITY: f32 = 50.0;

/// 用户 ↔ 人格 关系边
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResonanceEdge {
    pub user_id: String,
    pub persona_id: String,
    /// 亲和度 (0-100)
    pub affinity: f32,
    /// 最后一次真实互动时间
    pub last_interaction: DateTime<Utc>,
    /// 共享记忆（情景 ID 列表）
    pub shared_memories: Vec<String>,
}

impl ResonanceEdge {
    pub fn new(user_id: &str, persona_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            persona_id: persona_id.to_string(),
            affinity: NEUTRAL_AFFINITY,
            last_interaction: Utc::now(),
            shared_memories: Vec::new(),
        }
    }

    /// 存储键
    pub fn key(user_id: &str, persona_id: &str) -> String {
        format!("{}::{}", user_id, persona_id)
    }

    /// 应用增量（限制范围），返回新值
    pub fn apply_delta(&mut self, delta: f32) -> f32 {
        self.affinity = clamp_level(self.affinity + delta);
        self.affinity
    }

    pub fn link_memory(&mut self, episode_id: &str) {
        if !self.shared_memories.iter().any(|id| id == episode_id) {
            self.shared_memories.push(episode_id.to_string());
        }
    }
}

/// 人格 ↔ 人格 亲和边（离线模拟使用）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaAffinityEdge {
    pub source_persona: String,
    pub target_persona: String,
    pub affinity: f32,
    pub updated_at: DateTime<Utc>,
}

impl PersonaAffinityEdge {
    /// 节点顺序规范化，保证一对人格只有一条边
    pub fn new(a: &str, b: &str) -> Self {
        let (source, target) = Self::ordered(a, b);
        Self {
            source_persona: source.to_string(),
            target_persona: target.to_string(),
            affinity: PEER_NEUTRAL_AFFINITY,
            updated_at: Utc::now(),
        }
    }

    pub fn ordered<'a>(a: &'a str, b: &'a str) -> (&'a str, &'a str) {
        if a <= b { (a, b) } else { (b, a) }
    }

    pub fn key(a: &str, b: &str) -> String {
        let (source, target) = Self::ordered(a, b);
        format!("{}::{}", source, target)
    }

    pub fn apply_delta(&mut self, delta: f32) -> f32 {
        self.affinity = clamp_level(self.affinity + delta);
        self.updated_at = Utc::now();
        self.affinity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resonance_defaults_and_clamp() {
        let mut edge = ResonanceEdge::new("u1", "p1");
        assert_eq!(edge.affinity, NEUTRAL_AFFINITY);
        assert_eq!(edge.apply_delta(-50.0), 0.0);
        assert_eq!(edge.apply_delta(250.0), 100.0);
    }

    #[test]
    fn test_link_memory_is_idempotent() {
        let mut edge = ResonanceEdge::new("u1", "p1");
        edge.link_memory("e1");
        edge.link_memory("e1");
        assert_eq!(edge.shared_memories.len(), 1);
    }

    #[test]
    fn test_peer_key_is_symmetric() {
        assert_eq!(
            PersonaAffinityEdge::key("b", "a"),
            PersonaAffinityEdge::key("a", "b")
        );
        let edge = PersonaAffinityEdge::new("zeta", "alpha");
        assert_eq!(edge.source_persona, "alpha");
        assert_eq!(edge.affinity, PEER_NEUTRAL_AFFINITY);
    }
}
