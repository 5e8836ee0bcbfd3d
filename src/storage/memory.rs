//! 进程内图存储
//!
//! 整个图由一把 tokio 互斥锁保护，每个逻辑写操作持锁一次。
//! 嵌入计算和梦境生成等外部调用都在锁外完成，写回前重新检查状态。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{AppError, Result};
use crate::index::{EmbeddingModel, rank_top_k};
use crate::models::{
    CollectiveEvent, ConsolidationReport, Dream, EdgeFilter, EdgeType, Fact, GraphEdge,
    Location, MemoryEpisode, MemoryKind, Persona, PersonaAffinityEdge, ResonanceEdge,
    ScoredMemory, SystemConfig, User,
};
use crate::storage::dynamics::{self, GraphSettings};
use crate::storage::repository::{DreamGenerator, GraphRepository, event_edges};

#[derive(Default)]
struct GraphState {
    users: HashMap<String, User>,
    personas: HashMap<String, Persona>,
    resonance: HashMap<String, ResonanceEdge>,
    peers: HashMap<String, PersonaAffinityEdge>,
    episodes: Vec<MemoryEpisode>,
    facts: Vec<Fact>,
    dreams: Vec<Dream>,
    events: Vec<CollectiveEvent>,
    locations: Vec<Location>,
    edges: Vec<GraphEdge>,
    system: Option<SystemConfig>,
}

impl GraphState {
    fn resonance_mut(&mut self, user_id: &str, persona_id: &str) -> &mut ResonanceEdge {
        self.resonance
            .entry(ResonanceEdge::key(user_id, persona_id))
            .or_insert_with(|| ResonanceEdge::new(user_id, persona_id))
    }

    fn peer_mut(&mut self, a: &str, b: &str) -> &mut PersonaAffinityEdge {
        self.peers
            .entry(PersonaAffinityEdge::key(a, b))
            .or_insert_with(|| PersonaAffinityEdge::new(a, b))
    }

    fn persona_mut(&mut self, persona_id: &str) -> Result<&mut Persona> {
        self.personas
            .get_mut(persona_id)
            .ok_or_else(|| AppError::NotFound(format!("Persona not found: {}", persona_id)))
    }
}

/// 进程内图存储实现
pub struct InMemoryGraphStore {
    state: Mutex<GraphState>,
    embedder: Arc<dyn EmbeddingModel>,
    settings: GraphSettings,
    consolidation_calls: AtomicUsize,
}

impl InMemoryGraphStore {
    pub fn new(embedder: Arc<dyn EmbeddingModel>, settings: GraphSettings) -> Self {
        Self {
            state: Mutex::new(GraphState::default()),
            embedder,
            settings,
            consolidation_calls: AtomicUsize::new(0),
        }
    }

    /// consolidate_memories 被调用的次数
    pub fn consolidation_calls(&self) -> usize {
        self.consolidation_calls.load(Ordering::SeqCst)
    }

    /// 用户全部情景（含已消费）
    pub async fn all_episodes(&self, user_id: &str) -> Vec<MemoryEpisode> {
        let state = self.state.lock().await;
        state
            .episodes
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect()
    }

    async fn embed_if_missing(&self, embedding: &mut Option<Vec<f32>>, text: &str) -> Result<()> {
        if embedding.is_none() && !text.trim().is_empty() {
            *embedding = Some(self.embedder.encode(text).await?);
        }
        Ok(())
    }
}

#[async_trait]
impl GraphRepository for InMemoryGraphStore {
    async fn get_or_create_user(&self, user_id: &str) -> Result<User> {
        let mut state = self.state.lock().await;
        let user = state
            .users
            .entry(user_id.to_string())
            .or_insert_with(|| {
                info!(user_id, "First contact, creating user");
                User::new(user_id)
            });
        Ok(user.clone())
    }

    async fn touch_user(&self, user_id: &str, seen_at: DateTime<Utc>) -> Result<User> {
        let mut state = self.state.lock().await;
        let user = state
            .users
            .entry(user_id.to_string())
            .or_insert_with(|| User::new(user_id));
        user.last_seen = seen_at;
        Ok(user.clone())
    }

    async fn upsert_persona(&self, persona: &Persona) -> Result<Persona> {
        let mut persona = persona.clone();
        persona.social_battery = crate::models::clamp_level(persona.social_battery);
        persona.friction = crate::models::clamp_level(persona.friction);
        let mut state = self.state.lock().await;
        state.personas.insert(persona.id.clone(), persona.clone());
        Ok(persona)
    }

    async fn get_persona(&self, persona_id: &str) -> Result<Option<Persona>> {
        let state = self.state.lock().await;
        Ok(state.personas.get(persona_id).cloned())
    }

    async fn list_personas(&self) -> Result<Vec<Persona>> {
        let state = self.state.lock().await;
        let mut personas: Vec<Persona> = state.personas.values().cloned().collect();
        personas.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(personas)
    }

    async fn update_battery(&self, persona_id: &str, level: f32) -> Result<f32> {
        let mut state = self.state.lock().await;
        Ok(state.persona_mut(persona_id)?.set_battery(level))
    }

    async fn adjust_friction(&self, persona_id: &str, delta: f32) -> Result<f32> {
        let mut state = self.state.lock().await;
        Ok(state.persona_mut(persona_id)?.adjust_friction(delta))
    }

    async fn get_resonance(&self, user_id: &str, persona_id: &str) -> Result<ResonanceEdge> {
        let mut state = self.state.lock().await;
        Ok(state.resonance_mut(user_id, persona_id).clone())
    }

    async fn update_resonance(
        &self,
        user_id: &str,
        persona_id: &str,
        delta: f32,
    ) -> Result<ResonanceEdge> {
        let mut state = self.state.lock().await;
        let edge = state.resonance_mut(user_id, persona_id);
        let before = edge.affinity;
        edge.apply_delta(delta);
        debug!(user_id, persona_id, before, after = edge.affinity, "Resonance updated");
        Ok(edge.clone())
    }

    async fn get_peer_affinity(&self, a: &str, b: &str) -> Result<PersonaAffinityEdge> {
        let mut state = self.state.lock().await;
        Ok(state.peer_mut(a, b).clone())
    }

    async fn update_peer_affinity(
        &self,
        a: &str,
        b: &str,
        delta: f32,
    ) -> Result<PersonaAffinityEdge> {
        let mut state = self.state.lock().await;
        let edge = state.peer_mut(a, b);
        edge.apply_delta(delta);
        Ok(edge.clone())
    }

    async fn get_active_peers(&self, user_id: &str) -> Result<Vec<ResonanceEdge>> {
        let state = self.state.lock().await;
        let mut peers: Vec<ResonanceEdge> = state
            .resonance
            .values()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect();
        peers.sort_by(|a, b| a.persona_id.cmp(&b.persona_id));
        Ok(peers)
    }

    async fn record_interaction(&self, user_id: &str, persona_id: &str) -> Result<GraphEdge> {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        state.resonance_mut(user_id, persona_id).last_interaction = now;

        if let Some(edge) = state
            .edges
            .iter_mut()
            .find(|e| e.same_link(user_id, persona_id, EdgeType::InteractedWith))
        {
            edge.bump(now);
            return Ok(edge.clone());
        }

        let mut edge = GraphEdge::new(user_id, persona_id, EdgeType::InteractedWith);
        edge.bump(now);
        state.edges.push(edge.clone());
        Ok(edge)
    }

    async fn get_last_interaction(
        &self,
        user_id: &str,
        persona_id: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        let state = self.state.lock().await;
        let from_edge = state
            .edges
            .iter()
            .filter(|e| e.same_link(user_id, persona_id, EdgeType::InteractedWith))
            .map(|e| e.timestamp)
            .max();
        Ok(from_edge.or_else(|| {
            state
                .resonance
                .get(&ResonanceEdge::key(user_id, persona_id))
                .map(|e| e.last_interaction)
        }))
    }

    async fn save_episode(&self, mut episode: MemoryEpisode) -> Result<MemoryEpisode> {
        let text = episode.summary.clone();
        self.embed_if_missing(&mut episode.embedding, &text).await?;

        let mut state = self.state.lock().await;
        if let Some(persona_id) = episode.persona_id.clone() {
            state
                .resonance_mut(&episode.user_id, &persona_id)
                .link_memory(&episode.id);
        }
        state.edges.push(GraphEdge::new(
            &episode.user_id,
            &episode.id,
            EdgeType::Remembers,
        ));
        state.episodes.push(episode.clone());
        debug!(user_id = %episode.user_id, episode_id = %episode.id, "Episode saved");
        Ok(episode)
    }

    async fn get_recent_episodes(
        &self,
        user_id: &str,
        persona_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<MemoryEpisode>> {
        let state = self.state.lock().await;
        let mut episodes: Vec<MemoryEpisode> = state
            .episodes
            .iter()
            .filter(|e| e.user_id == user_id && !e.is_consumed())
            .filter(|e| persona_id.is_none_or(|p| e.persona_id.as_deref() == Some(p)))
            .cloned()
            .collect();
        episodes.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        episodes.truncate(limit);
        Ok(episodes)
    }

    async fn get_relevant_episodes(
        &self,
        user_id: &str,
        query: &str,
        k: usize,
    ) -> Result<Vec<ScoredMemory>> {
        self.search_memories(user_id, query, &[MemoryKind::Episode], k)
            .await
    }

    async fn search_memories(
        &self,
        user_id: &str,
        query: &str,
        kinds: &[MemoryKind],
        k: usize,
    ) -> Result<Vec<ScoredMemory>> {
        let query_vec = self.embedder.encode(query).await?;
        let state = self.state.lock().await;

        let mut candidates: Vec<(ScoredMemory, Option<&[f32]>)> = Vec::new();
        let stub = |kind, id: &str, text: &str, created_at| ScoredMemory {
            kind,
            id: id.to_string(),
            text: text.to_string(),
            score: 0.0,
            created_at,
        };

        if kinds.contains(&MemoryKind::Episode) {
            candidates.extend(
                state
                    .episodes
                    .iter()
                    .filter(|e| e.user_id == user_id && !e.is_consumed())
                    .map(|e| {
                        (
                            stub(MemoryKind::Episode, &e.id, &e.summary, e.created_at),
                            e.embedding.as_deref(),
                        )
                    }),
            );
        }
        if kinds.contains(&MemoryKind::Fact) {
            candidates.extend(state.facts.iter().filter(|f| f.user_id == user_id).map(|f| {
                (
                    stub(MemoryKind::Fact, &f.id, &f.content, f.created_at),
                    f.embedding.as_deref(),
                )
            }));
        }
        if kinds.contains(&MemoryKind::Event) {
            candidates.extend(state.events.iter().filter(|e| e.user_id == user_id).map(|e| {
                (
                    stub(MemoryKind::Event, &e.id, &e.summary, e.occurred_at),
                    e.embedding.as_deref(),
                )
            }));
        }
        if kinds.contains(&MemoryKind::Dream) {
            candidates.extend(state.dreams.iter().filter(|d| d.user_id == user_id).map(|d| {
                (
                    stub(MemoryKind::Dream, &d.id, &d.theme, d.created_at),
                    d.embedding.as_deref(),
                )
            }));
        }

        Ok(rank_top_k(&query_vec, candidates, k)
            .into_iter()
            .map(|(mut memory, score)| {
                memory.score = score;
                memory
            })
            .collect())
    }

    async fn save_fact(&self, mut fact: Fact) -> Result<Fact> {
        let text = fact.content.clone();
        self.embed_if_missing(&mut fact.embedding, &text).await?;
        let mut state = self.state.lock().await;
        state.facts.push(fact.clone());
        Ok(fact)
    }

    async fn get_last_dream(&self, user_id: &str) -> Result<Option<Dream>> {
        let state = self.state.lock().await;
        Ok(state
            .dreams
            .iter()
            .filter(|d| d.user_id == user_id)
            .max_by_key(|d| d.created_at)
            .cloned())
    }

    async fn consolidate_memories(
        &self,
        user_id: &str,
        dream_generator: Option<Arc<dyn DreamGenerator>>,
    ) -> Result<ConsolidationReport> {
        self.consolidation_calls.fetch_add(1, Ordering::SeqCst);

        let batch: Vec<MemoryEpisode> = {
            let state = self.state.lock().await;
            state
                .episodes
                .iter()
                .filter(|e| e.user_id == user_id && !e.is_consumed())
                .cloned()
                .collect()
        };

        let mut report = ConsolidationReport {
            user_id: user_id.to_string(),
            ..Default::default()
        };
        if batch.is_empty() {
            debug!(user_id, "Nothing to consolidate");
            return Ok(report);
        }

        let draft = match &dream_generator {
            Some(generator) => match generator.generate(user_id, &batch).await {
                Ok(draft) => draft,
                Err(e) => {
                    warn!(user_id, error = %e, "Dream generator failed, using local dream");
                    dynamics::fallback_dream(&batch)
                }
            },
            None => dynamics::fallback_dream(&batch),
        };
        let mut dream = Dream::from_draft(user_id, draft);
        let theme = dream.theme.clone();
        self.embed_if_missing(&mut dream.embedding, &theme).await?;

        let mut state = self.state.lock().await;

        // 锁外生成期间可能已被并发整合消费，重新筛选
        let batch_ids: Vec<&str> = batch.iter().map(|e| e.id.as_str()).collect();
        let current: Vec<MemoryEpisode> = state
            .episodes
            .iter()
            .filter(|e| batch_ids.contains(&e.id.as_str()) && !e.is_consumed())
            .cloned()
            .collect();

        let Some(plan) = dynamics::plan_consolidation(&current) else {
            debug!(user_id, "Batch already consumed by a concurrent consolidation");
            return Ok(report);
        };

        for persona_id in &plan.persona_ids {
            let edge = state.resonance_mut(user_id, persona_id);
            let old = edge.affinity;
            edge.affinity = dynamics::ema(old, plan.target, self.settings.ema_alpha);
            report
                .affinity_updates
                .push((persona_id.clone(), old, edge.affinity));
        }

        for episode in state
            .episodes
            .iter_mut()
            .filter(|e| plan.episode_ids.contains(&e.id))
        {
            episode.mark_consumed();
        }
        for episode_id in &plan.episode_ids {
            state
                .edges
                .push(GraphEdge::new(episode_id, &dream.id, EdgeType::ConsolidatedInto));
        }

        report.episodes_consumed = plan.episode_ids.len();
        report.mean_valence = Some(plan.mean_valence);
        report.dream_id = Some(dream.id.clone());
        state.dreams.push(dream);

        info!(
            user_id,
            episodes = report.episodes_consumed,
            mean_valence = plan.mean_valence,
            "Memories consolidated"
        );
        Ok(report)
    }

    async fn save_event(
        &self,
        mut event: CollectiveEvent,
        participants: &[String],
    ) -> Result<CollectiveEvent> {
        let text = event.summary.clone();
        self.embed_if_missing(&mut event.embedding, &text).await?;
        let mut state = self.state.lock().await;
        state.edges.extend(event_edges(&event, participants));
        state.events.push(event.clone());
        Ok(event)
    }

    async fn get_event(&self, event_id: &str) -> Result<Option<CollectiveEvent>> {
        let state = self.state.lock().await;
        Ok(state.events.iter().find(|e| e.id == event_id).cloned())
    }

    async fn get_or_create_location(&self, name: &str) -> Result<Location> {
        let mut state = self.state.lock().await;
        if let Some(location) = state.locations.iter().find(|l| l.name == name) {
            return Ok(location.clone());
        }
        let location = Location::new(name);
        state.locations.push(location.clone());
        Ok(location)
    }

    async fn list_locations(&self) -> Result<Vec<Location>> {
        let state = self.state.lock().await;
        Ok(state.locations.clone())
    }

    async fn create_edge(&self, edge: GraphEdge) -> Result<GraphEdge> {
        let mut state = self.state.lock().await;
        state.edges.push(edge.clone());
        Ok(edge)
    }

    async fn get_edges(&self, filter: &EdgeFilter) -> Result<Vec<GraphEdge>> {
        let state = self.state.lock().await;
        Ok(state
            .edges
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect())
    }

    async fn get_system_config(&self) -> Result<SystemConfig> {
        let state = self.state.lock().await;
        Ok(state.system.clone().unwrap_or_default())
    }

    async fn save_system_config(&self, config: &SystemConfig) -> Result<()> {
        let mut state = self.state.lock().await;
        state.system = Some(config.clone());
        Ok(())
    }
}
