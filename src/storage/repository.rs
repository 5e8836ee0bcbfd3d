use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::error::Result;
use crate::models::{
    CollectiveEvent, ConsolidationReport, Dream, DreamDraft, EdgeFilter, EdgeType, Fact,
    GraphEdge, Location, MemoryEpisode, MemoryKind, Persona, PersonaAffinityEdge,
    ResonanceEdge, ScoredMemory, SystemConfig, User,
};

/// 梦境生成回调（整合时可选调用）
#[async_trait]
pub trait DreamGenerator: Send + Sync {
    async fn generate(&self, user_id: &str, episodes: &[MemoryEpisode]) -> Result<DreamDraft>;
}

/// 关系图仓储 trait
///
/// 图存储独占所有实体和边；其它组件只通过该接口访问。
/// 每个写操作在内部获取一次粗粒度锁（或事务），调用方无需持锁。
#[async_trait]
pub trait GraphRepository: Send + Sync {
    // === 用户 ===

    /// 获取用户，不存在时创建
    async fn get_or_create_user(&self, user_id: &str) -> Result<User>;

    /// 更新最后在线时间
    async fn touch_user(&self, user_id: &str, seen_at: DateTime<Utc>) -> Result<User>;

    // === 人格 ===

    async fn upsert_persona(&self, persona: &Persona) -> Result<Persona>;

    async fn get_persona(&self, persona_id: &str) -> Result<Option<Persona>>;

    async fn list_personas(&self) -> Result<Vec<Persona>>;

    /// 写入社交电量（限制在 [0,100]），返回写入后的值
    async fn update_battery(&self, persona_id: &str, level: f32) -> Result<f32>;

    /// 调整摩擦值（限制在 [0,100]），返回写入后的值
    async fn adjust_friction(&self, persona_id: &str, delta: f32) -> Result<f32>;

    // === 关系边 ===

    /// 获取用户与人格的关系边，首次访问时以中性默认值创建
    async fn get_resonance(&self, user_id: &str, persona_id: &str) -> Result<ResonanceEdge>;

    /// 按增量更新亲和度（限制在 [0,100]）
    async fn update_resonance(
        &self,
        user_id: &str,
        persona_id: &str,
        delta: f32,
    ) -> Result<ResonanceEdge>;

    async fn get_peer_affinity(&self, a: &str, b: &str) -> Result<PersonaAffinityEdge>;

    async fn update_peer_affinity(&self, a: &str, b: &str, delta: f32)
    -> Result<PersonaAffinityEdge>;

    /// 与用户存在关系边的人格
    async fn get_active_peers(&self, user_id: &str) -> Result<Vec<ResonanceEdge>>;

    /// 记录一次真实互动（按 (source, target, type) 原地更新计数边）
    async fn record_interaction(&self, user_id: &str, persona_id: &str) -> Result<GraphEdge>;

    /// 最后一次真实互动时间
    async fn get_last_interaction(
        &self,
        user_id: &str,
        persona_id: &str,
    ) -> Result<Option<DateTime<Utc>>>;

    // === 记忆 ===

    /// 保存情景：计算嵌入并链接到关系边的共享记忆列表
    async fn save_episode(&self, episode: MemoryEpisode) -> Result<MemoryEpisode>;

    /// 最近的未消费情景（新到旧）
    async fn get_recent_episodes(
        &self,
        user_id: &str,
        persona_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<MemoryEpisode>>;

    /// 与查询文本最相关的未消费情景
    async fn get_relevant_episodes(
        &self,
        user_id: &str,
        query: &str,
        k: usize,
    ) -> Result<Vec<ScoredMemory>>;

    /// 跨种类的向量相似度检索
    async fn search_memories(
        &self,
        user_id: &str,
        query: &str,
        kinds: &[MemoryKind],
        k: usize,
    ) -> Result<Vec<ScoredMemory>>;

    async fn save_fact(&self, fact: Fact) -> Result<Fact>;

    async fn get_last_dream(&self, user_id: &str) -> Result<Option<Dream>>;

    /// 整合用户的未消费情景：生成梦境、EMA 更新亲和度、标记情景已消费
    async fn consolidate_memories(
        &self,
        user_id: &str,
        dream_generator: Option<Arc<dyn DreamGenerator>>,
    ) -> Result<ConsolidationReport>;

    // === 事件与地点 ===

    /// 保存事件并为每个参与者创建 PARTICIPATED_IN 边，地点创建 OCCURRED_AT 边
    async fn save_event(
        &self,
        event: CollectiveEvent,
        participants: &[String],
    ) -> Result<CollectiveEvent>;

    async fn get_event(&self, event_id: &str) -> Result<Option<CollectiveEvent>>;

    async fn get_or_create_location(&self, name: &str) -> Result<Location>;

    async fn list_locations(&self) -> Result<Vec<Location>>;

    // === 通用边与配置 ===

    async fn create_edge(&self, edge: GraphEdge) -> Result<GraphEdge>;

    async fn get_edges(&self, filter: &EdgeFilter) -> Result<Vec<GraphEdge>>;

    async fn get_system_config(&self) -> Result<SystemConfig>;

    async fn save_system_config(&self, config: &SystemConfig) -> Result<()>;
}

/// 根据参与者列表生成事件相关的边
pub(crate) fn event_edges(event: &CollectiveEvent, participants: &[String]) -> Vec<GraphEdge> {
    let mut edges: Vec<GraphEdge> = participants
        .iter()
        .map(|p| GraphEdge::new(p, &event.id, EdgeType::ParticipatedIn))
        .collect();
    if let Some(location_id) = &event.location_id {
        edges.push(GraphEdge::new(&event.id, location_id, EdgeType::OccurredAt));
    }
    for edge in &mut edges {
        edge.timestamp = event.occurred_at;
    }
    edges
}
