//! SurrealDB 图存储
//!
//! 每个实体存为 `{ data: T }` 文档，记录 id 即实体 id。
//! 读-改-写操作由一把写锁串行化；相似度排序在进程内完成。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use surrealdb::{
    Surreal,
    engine::any::{Any, connect},
    opt::auth::Root,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::config::DatabaseConfig;
use crate::error::{AppError, Result};
use crate::index::{EmbeddingModel, rank_top_k};
use crate::migration::backfill_event_edges;
use crate::models::{
    CollectiveEvent, ConsolidationReport, Dream, EdgeFilter, EdgeType, EventIntent, EventOutcome,
    Fact, GraphEdge, Location, MemoryEpisode, MemoryKind, Persona, PersonaAffinityEdge,
    ResonanceEdge, ScoredMemory, SystemConfig, User,
};
use crate::storage::dynamics::{self, GraphSettings};
use crate::storage::repository::{DreamGenerator, GraphRepository, event_edges};

const USER: &str = "user";
const PERSONA: &str = "persona";
const RESONANCE: &str = "resonance";
const PEER: &str = "peer_affinity";
const EPISODE: &str = "episode";
const FACT: &str = "fact";
const DREAM: &str = "dream";
const EVENT: &str = "event";
const LOCATION: &str = "location";
const EDGE: &str = "edge";
const SYSTEM: &str = "system";
const SYSTEM_ID: &str = "singleton";

#[derive(Serialize, Deserialize)]
struct Doc<T> {
    data: T,
}

/// 事件表中的记录。旧版记录带内嵌的 `participants`，规范记录没有
#[derive(Deserialize)]
struct StoredEvent {
    id: String,
    user_id: String,
    event_type: EventIntent,
    outcome: EventOutcome,
    summary: String,
    #[serde(default)]
    location_id: Option<String>,
    #[serde(default)]
    embedding: Option<Vec<f32>>,
    occurred_at: DateTime<Utc>,
    #[serde(default)]
    participants: Option<Vec<String>>,
}

impl StoredEvent {
    fn split(self) -> (CollectiveEvent, Option<Vec<String>>) {
        let event = CollectiveEvent {
            id: self.id,
            user_id: self.user_id,
            event_type: self.event_type,
            outcome: self.outcome,
            summary: self.summary,
            location_id: self.location_id,
            embedding: self.embedding,
            occurred_at: self.occurred_at,
        };
        (event, self.participants)
    }
}

/// 建立 SurrealDB 连接：认证并选择命名空间和数据库
///
/// `mem://` 地址跳过认证。
pub async fn connect_surreal(config: &DatabaseConfig) -> Result<Surreal<Any>> {
    let db: Surreal<Any> = connect(&config.url).await?;

    if !config.url.starts_with("mem://") {
        db.signin(Root {
            username: &config.username,
            password: &config.password,
        })
        .await?;
    }

    db.use_ns(&config.namespace)
        .use_db(&config.database)
        .await?;

    Ok(db)
}

pub struct SurrealGraphStore {
    db: Surreal<Any>,
    embedder: Arc<dyn EmbeddingModel>,
    settings: GraphSettings,
    write_lock: Mutex<()>,
    consolidation_calls: AtomicUsize,
}

impl SurrealGraphStore {
    pub async fn connect(
        config: &DatabaseConfig,
        embedder: Arc<dyn EmbeddingModel>,
        settings: GraphSettings,
    ) -> Result<Self> {
        let db = connect_surreal(config).await?;
        info!(url = %config.url, namespace = %config.namespace, "SurrealDB graph store connected");
        Ok(Self::with_db(db, embedder, settings))
    }

    pub fn with_db(db: Surreal<Any>, embedder: Arc<dyn EmbeddingModel>, settings: GraphSettings) -> Self {
        Self {
            db,
            embedder,
            settings,
            write_lock: Mutex::new(()),
            consolidation_calls: AtomicUsize::new(0),
        }
    }

    pub fn consolidation_calls(&self) -> usize {
        self.consolidation_calls.load(Ordering::SeqCst)
    }

    async fn put<T>(&self, table: &'static str, id: &str, data: T) -> Result<()>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        let _: Option<Doc<T>> = self
            .db
            .upsert((table, id.to_string()))
            .content(Doc { data })
            .await?;
        Ok(())
    }

    async fn get<T>(&self, table: &'static str, id: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        let doc: Option<Doc<T>> = self.db.select((table, id.to_string())).await?;
        Ok(doc.map(|d| d.data))
    }

    /// 按 `data.user_id` 取出某表的全部实体
    async fn list_for_user<T>(&self, table: &'static str, user_id: &str) -> Result<Vec<T>>
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        let rows: Vec<T> = self
            .db
            .query(format!(
                "SELECT VALUE data FROM {} WHERE data.user_id = $user_id",
                table
            ))
            .bind(("user_id", user_id.to_string()))
            .await?
            .take(0)?;
        Ok(rows)
    }

    async fn list_all<T>(&self, table: &'static str) -> Result<Vec<T>>
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        let rows: Vec<T> = self
            .db
            .query(format!("SELECT VALUE data FROM {}", table))
            .await?
            .take(0)?;
        Ok(rows)
    }

    async fn embed_if_missing(&self, embedding: &mut Option<Vec<f32>>, text: &str) -> Result<()> {
        if embedding.is_none() && !text.trim().is_empty() {
            *embedding = Some(self.embedder.encode(text).await?);
        }
        Ok(())
    }

    /// 规范记录原样返回；旧版记录补齐边后以规范形式写回
    async fn load_event(&self, stored: StoredEvent) -> Result<CollectiveEvent> {
        let (mut event, participants) = stored.split();
        let Some(participants) = participants else {
            return Ok(event);
        };

        let text = event.summary.clone();
        self.embed_if_missing(&mut event.embedding, &text).await?;
        let _guard = self.write_lock.lock().await;
        let edges = backfill_event_edges(self, &event, &participants).await?;
        self.put(EVENT, &event.id.clone(), event.clone()).await?;
        info!(event_id = %event.id, edges, "Legacy event upgraded on load");
        Ok(event)
    }

    async fn load_resonance(&self, user_id: &str, persona_id: &str) -> Result<ResonanceEdge> {
        let key = ResonanceEdge::key(user_id, persona_id);
        match self.get::<ResonanceEdge>(RESONANCE, &key).await? {
            Some(edge) => Ok(edge),
            None => {
                let edge = ResonanceEdge::new(user_id, persona_id);
                self.put(RESONANCE, &key, edge.clone()).await?;
                Ok(edge)
            }
        }
    }

    async fn load_peer(&self, a: &str, b: &str) -> Result<PersonaAffinityEdge> {
        let key = PersonaAffinityEdge::key(a, b);
        match self.get::<PersonaAffinityEdge>(PEER, &key).await? {
            Some(edge) => Ok(edge),
            None => {
                let edge = PersonaAffinityEdge::new(a, b);
                self.put(PEER, &key, edge.clone()).await?;
                Ok(edge)
            }
        }
    }

    async fn load_persona(&self, persona_id: &str) -> Result<Persona> {
        self.get::<Persona>(PERSONA, persona_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Persona not found: {}", persona_id)))
    }

    fn interaction_key(user_id: &str, persona_id: &str) -> String {
        format!("interacted::{}", ResonanceEdge::key(user_id, persona_id))
    }
}

#[async_trait]
impl GraphRepository for SurrealGraphStore {
    async fn get_or_create_user(&self, user_id: &str) -> Result<User> {
        let _guard = self.write_lock.lock().await;
        if let Some(user) = self.get::<User>(USER, user_id).await? {
            return Ok(user);
        }
        info!(user_id, "First contact, creating user");
        let user = User::new(user_id);
        self.put(USER, user_id, user.clone()).await?;
        Ok(user)
    }

    async fn touch_user(&self, user_id: &str, seen_at: DateTime<Utc>) -> Result<User> {
        let _guard = self.write_lock.lock().await;
        let mut user = self
            .get::<User>(USER, user_id)
            .await?
            .unwrap_or_else(|| User::new(user_id));
        user.last_seen = seen_at;
        self.put(USER, user_id, user.clone()).await?;
        Ok(user)
    }

    async fn upsert_persona(&self, persona: &Persona) -> Result<Persona> {
        let mut persona = persona.clone();
        persona.social_battery = crate::models::clamp_level(persona.social_battery);
        persona.friction = crate::models::clamp_level(persona.friction);
        let _guard = self.write_lock.lock().await;
        self.put(PERSONA, &persona.id.clone(), persona.clone()).await?;
        Ok(persona)
    }

    async fn get_persona(&self, persona_id: &str) -> Result<Option<Persona>> {
        self.get(PERSONA, persona_id).await
    }

    async fn list_personas(&self) -> Result<Vec<Persona>> {
        let mut personas: Vec<Persona> = self.list_all(PERSONA).await?;
        personas.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(personas)
    }

    async fn update_battery(&self, persona_id: &str, level: f32) -> Result<f32> {
        let _guard = self.write_lock.lock().await;
        let mut persona = self.load_persona(persona_id).await?;
        let written = persona.set_battery(level);
        self.put(PERSONA, persona_id, persona).await?;
        Ok(written)
    }

    async fn adjust_friction(&self, persona_id: &str, delta: f32) -> Result<f32> {
        let _guard = self.write_lock.lock().await;
        let mut persona = self.load_persona(persona_id).await?;
        let written = persona.adjust_friction(delta);
        self.put(PERSONA, persona_id, persona).await?;
        Ok(written)
    }

    async fn get_resonance(&self, user_id: &str, persona_id: &str) -> Result<ResonanceEdge> {
        let _guard = self.write_lock.lock().await;
        self.load_resonance(user_id, persona_id).await
    }

    async fn update_resonance(
        &self,
        user_id: &str,
        persona_id: &str,
        delta: f32,
    ) -> Result<ResonanceEdge> {
        let _guard = self.write_lock.lock().await;
        let mut edge = self.load_resonance(user_id, persona_id).await?;
        let before = edge.affinity;
        edge.apply_delta(delta);
        debug!(user_id, persona_id, before, after = edge.affinity, "Resonance updated");
        self.put(RESONANCE, &ResonanceEdge::key(user_id, persona_id), edge.clone())
            .await?;
        Ok(edge)
    }

    async fn get_peer_affinity(&self, a: &str, b: &str) -> Result<PersonaAffinityEdge> {
        let _guard = self.write_lock.lock().await;
        self.load_peer(a, b).await
    }

    async fn update_peer_affinity(
        &self,
        a: &str,
        b: &str,
        delta: f32,
    ) -> Result<PersonaAffinityEdge> {
        let _guard = self.write_lock.lock().await;
        let mut edge = self.load_peer(a, b).await?;
        edge.apply_delta(delta);
        self.put(PEER, &PersonaAffinityEdge::key(a, b), edge.clone()).await?;
        Ok(edge)
    }

    async fn get_active_peers(&self, user_id: &str) -> Result<Vec<ResonanceEdge>> {
        let mut peers: Vec<ResonanceEdge> = self.list_for_user(RESONANCE, user_id).await?;
        peers.sort_by(|a, b| a.persona_id.cmp(&b.persona_id));
        Ok(peers)
    }

    async fn record_interaction(&self, user_id: &str, persona_id: &str) -> Result<GraphEdge> {
        let now = Utc::now();
        let _guard = self.write_lock.lock().await;

        let mut resonance = self.load_resonance(user_id, persona_id).await?;
        resonance.last_interaction = now;
        self.put(RESONANCE, &ResonanceEdge::key(user_id, persona_id), resonance)
            .await?;

        let key = Self::interaction_key(user_id, persona_id);
        let mut edge = match self.get::<GraphEdge>(EDGE, &key).await? {
            Some(edge) => edge,
            None => {
                let mut edge = GraphEdge::new(user_id, persona_id, EdgeType::InteractedWith);
                edge.id = key.clone();
                edge
            }
        };
        edge.bump(now);
        self.put(EDGE, &key, edge.clone()).await?;
        Ok(edge)
    }

    async fn get_last_interaction(
        &self,
        user_id: &str,
        persona_id: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        let key = Self::interaction_key(user_id, persona_id);
        if let Some(edge) = self.get::<GraphEdge>(EDGE, &key).await? {
            return Ok(Some(edge.timestamp));
        }
        let resonance: Option<ResonanceEdge> = self
            .get(RESONANCE, &ResonanceEdge::key(user_id, persona_id))
            .await?;
        Ok(resonance.map(|e| e.last_interaction))
    }

    async fn save_episode(&self, mut episode: MemoryEpisode) -> Result<MemoryEpisode> {
        let text = episode.summary.clone();
        self.embed_if_missing(&mut episode.embedding, &text).await?;

        let _guard = self.write_lock.lock().await;
        if let Some(persona_id) = episode.persona_id.clone() {
            let mut edge = self.load_resonance(&episode.user_id, &persona_id).await?;
            edge.link_memory(&episode.id);
            self.put(RESONANCE, &ResonanceEdge::key(&episode.user_id, &persona_id), edge)
                .await?;
        }
        let remembers = GraphEdge::new(&episode.user_id, &episode.id, EdgeType::Remembers);
        self.put(EDGE, &remembers.id.clone(), remembers).await?;
        self.put(EPISODE, &episode.id.clone(), episode.clone()).await?;
        debug!(user_id = %episode.user_id, episode_id = %episode.id, "Episode saved");
        Ok(episode)
    }

    async fn get_recent_episodes(
        &self,
        user_id: &str,
        persona_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<MemoryEpisode>> {
        let mut episodes: Vec<MemoryEpisode> = self
            .list_for_user::<MemoryEpisode>(EPISODE, user_id)
            .await?
            .into_iter()
            .filter(|e| !e.is_consumed())
            .filter(|e| persona_id.is_none_or(|p| e.persona_id.as_deref() == Some(p)))
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

        // (kind, id, text, created_at, embedding)
        let mut rows: Vec<(MemoryKind, String, String, DateTime<Utc>, Option<Vec<f32>>)> =
            Vec::new();
        if kinds.contains(&MemoryKind::Episode) {
            let episodes: Vec<MemoryEpisode> = self.list_for_user(EPISODE, user_id).await?;
            rows.extend(
                episodes
                    .into_iter()
                    .filter(|e| !e.is_consumed())
                    .map(|e| (MemoryKind::Episode, e.id, e.summary, e.created_at, e.embedding)),
            );
        }
        if kinds.contains(&MemoryKind::Fact) {
            let facts: Vec<Fact> = self.list_for_user(FACT, user_id).await?;
            rows.extend(
                facts
                    .into_iter()
                    .map(|f| (MemoryKind::Fact, f.id, f.content, f.created_at, f.embedding)),
            );
        }
        if kinds.contains(&MemoryKind::Event) {
            let stored: Vec<StoredEvent> = self.list_for_user(EVENT, user_id).await?;
            for record in stored {
                let e = self.load_event(record).await?;
                rows.push((MemoryKind::Event, e.id, e.summary, e.occurred_at, e.embedding));
            }
        }
        if kinds.contains(&MemoryKind::Dream) {
            let dreams: Vec<Dream> = self.list_for_user(DREAM, user_id).await?;
            rows.extend(
                dreams
                    .into_iter()
                    .map(|d| (MemoryKind::Dream, d.id, d.theme, d.created_at, d.embedding)),
            );
        }

        let candidates = rows.iter().map(|(kind, id, text, created_at, embedding)| {
            (
                ScoredMemory {
                    kind: *kind,
                    id: id.clone(),
                    text: text.clone(),
                    score: 0.0,
                    created_at: *created_at,
                },
                embedding.as_deref(),
            )
        });

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
        self.put(FACT, &fact.id.clone(), fact.clone()).await?;
        Ok(fact)
    }

    async fn get_last_dream(&self, user_id: &str) -> Result<Option<Dream>> {
        let dreams: Vec<Dream> = self.list_for_user(DREAM, user_id).await?;
        Ok(dreams.into_iter().max_by_key(|d| d.created_at))
    }

    async fn consolidate_memories(
        &self,
        user_id: &str,
        dream_generator: Option<Arc<dyn DreamGenerator>>,
    ) -> Result<ConsolidationReport> {
        self.consolidation_calls.fetch_add(1, Ordering::SeqCst);

        let batch: Vec<MemoryEpisode> = self
            .list_for_user::<MemoryEpisode>(EPISODE, user_id)
            .await?
            .into_iter()
            .filter(|e| !e.is_consumed())
            .collect();

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

        let _guard = self.write_lock.lock().await;

        let mut current = Vec::with_capacity(batch.len());
        for episode in &batch {
            if let Some(fresh) = self.get::<MemoryEpisode>(EPISODE, &episode.id).await? {
                current.push(fresh);
            }
        }
        let Some(plan) = dynamics::plan_consolidation(&current) else {
            debug!(user_id, "Batch already consumed by a concurrent consolidation");
            return Ok(report);
        };

        for persona_id in &plan.persona_ids {
            let mut edge = self.load_resonance(user_id, persona_id).await?;
            let old = edge.affinity;
            edge.affinity = dynamics::ema(old, plan.target, self.settings.ema_alpha);
            report
                .affinity_updates
                .push((persona_id.clone(), old, edge.affinity));
            self.put(RESONANCE, &ResonanceEdge::key(user_id, persona_id), edge)
                .await?;
        }

        for mut episode in current.into_iter().filter(|e| plan.episode_ids.contains(&e.id)) {
            episode.mark_consumed();
            let edge = GraphEdge::new(&episode.id, &dream.id, EdgeType::ConsolidatedInto);
            self.put(EDGE, &edge.id.clone(), edge).await?;
            self.put(EPISODE, &episode.id.clone(), episode).await?;
        }

        report.episodes_consumed = plan.episode_ids.len();
        report.mean_valence = Some(plan.mean_valence);
        report.dream_id = Some(dream.id.clone());
        self.put(DREAM, &dream.id.clone(), dream).await?;

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
        let _guard = self.write_lock.lock().await;
        for edge in event_edges(&event, participants) {
            self.put(EDGE, &edge.id.clone(), edge).await?;
        }
        self.put(EVENT, &event.id.clone(), event.clone()).await?;
        Ok(event)
    }

    async fn get_event(&self, event_id: &str) -> Result<Option<CollectiveEvent>> {
        match self.get::<StoredEvent>(EVENT, event_id).await? {
            Some(stored) => Ok(Some(self.load_event(stored).await?)),
            None => Ok(None),
        }
    }

    async fn get_or_create_location(&self, name: &str) -> Result<Location> {
        let _guard = self.write_lock.lock().await;
        let existing: Vec<Location> = self
            .db
            .query("SELECT VALUE data FROM location WHERE data.name = $name")
            .bind(("name", name.to_string()))
            .await?
            .take(0)?;
        if let Some(location) = existing.into_iter().next() {
            return Ok(location);
        }
        let location = Location::new(name);
        self.put(LOCATION, &location.id.clone(), location.clone()).await?;
        Ok(location)
    }

    async fn list_locations(&self) -> Result<Vec<Location>> {
        self.list_all(LOCATION).await
    }

    async fn create_edge(&self, edge: GraphEdge) -> Result<GraphEdge> {
        self.put(EDGE, &edge.id.clone(), edge.clone()).await?;
        Ok(edge)
    }

    async fn get_edges(&self, filter: &EdgeFilter) -> Result<Vec<GraphEdge>> {
        let mut sql = String::from("SELECT VALUE data FROM edge");
        let mut clauses = Vec::new();
        if filter.source_id.is_some() {
            clauses.push("data.source_id = $source_id");
        }
        if filter.target_id.is_some() {
            clauses.push("data.target_id = $target_id");
        }
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }

        let mut query = self.db.query(sql);
        if let Some(source_id) = filter.source_id.clone() {
            query = query.bind(("source_id", source_id));
        }
        if let Some(target_id) = filter.target_id.clone() {
            query = query.bind(("target_id", target_id));
        }
        let edges: Vec<GraphEdge> = query.await?.take(0)?;

        Ok(edges.into_iter().filter(|e| filter.matches(e)).collect())
    }

    async fn get_system_config(&self) -> Result<SystemConfig> {
        Ok(self
            .get::<SystemConfig>(SYSTEM, SYSTEM_ID)
            .await?
            .unwrap_or_default())
    }

    async fn save_system_config(&self, config: &SystemConfig) -> Result<()> {
        self.put(SYSTEM, SYSTEM_ID, config.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::config::StorageBackend;
    use crate::index::HashingEmbeddingModel;
    use crate::models::{LegacyCollectiveEvent, NEUTRAL_AFFINITY};

    async fn store() -> SurrealGraphStore {
        let config = DatabaseConfig {
            backend: StorageBackend::Surrealdb,
            url: "mem://".to_string(),
            namespace: "resonance".to_string(),
            database: "test".to_string(),
            username: String::new(),
            password: String::new(),
        };
        SurrealGraphStore::connect(
            &config,
            Arc::new(HashingEmbeddingModel::new(32)),
            GraphSettings::default(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_resonance_roundtrip_and_clamp() {
        let store = store().await;
        let edge = store.get_resonance("u1", "p1").await.unwrap();
        assert_eq!(edge.affinity, NEUTRAL_AFFINITY);

        let edge = store.update_resonance("u1", "p1", 250.0).await.unwrap();
        assert_eq!(edge.affinity, 100.0);
        let reloaded = store.get_resonance("u1", "p1").await.unwrap();
        assert_eq!(reloaded.affinity, 100.0);
    }

    #[tokio::test]
    async fn test_consolidation_is_not_reapplied() {
        let store = store().await;
        store
            .save_episode(MemoryEpisode::new("u1", Some("p1"), "a fine afternoon", 1.0))
            .await
            .unwrap();

        let first = store.consolidate_memories("u1", None).await.unwrap();
        assert_eq!(first.episodes_consumed, 1);
        let affinity = store.get_resonance("u1", "p1").await.unwrap().affinity;

        let second = store.consolidate_memories("u1", None).await.unwrap();
        assert_eq!(second.episodes_consumed, 0);
        assert_eq!(store.get_resonance("u1", "p1").await.unwrap().affinity, affinity);
        assert!(store.get_last_dream("u1").await.unwrap().is_some());
        assert_eq!(store.consolidation_calls(), 2);
    }

    #[tokio::test]
    async fn test_interaction_edge_counts() {
        let store = store().await;
        store.record_interaction("u1", "p1").await.unwrap();
        let edge = store.record_interaction("u1", "p1").await.unwrap();
        assert_eq!(edge.count(), 2);

        let edges = store
            .get_edges(&EdgeFilter::new().from_source("u1").of_type(EdgeType::InteractedWith))
            .await
            .unwrap();
        assert_eq!(edges.len(), 1);
    }

    fn legacy_event(id: &str) -> LegacyCollectiveEvent {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "user_id": "u1",
            "event_type": "conflict",
            "outcome": "escalated",
            "summary": "p1 and p2 argued about the lighthouse keys",
            "location_id": "loc-1",
            "participants": ["p1", "p2"],
            "occurred_at": "2024-03-01T10:00:00Z"
        }))
        .unwrap()
    }

    async fn participant_edges(store: &SurrealGraphStore, event_id: &str) -> Vec<GraphEdge> {
        store
            .get_edges(&EdgeFilter::new().to_target(event_id).of_type(EdgeType::ParticipatedIn))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_legacy_event_upgraded_on_get() {
        let store = store().await;
        store.put(EVENT, "ev-legacy", legacy_event("ev-legacy")).await.unwrap();

        let event = store.get_event("ev-legacy").await.unwrap().unwrap();
        assert_eq!(event.location_id.as_deref(), Some("loc-1"));
        assert!(event.embedding.is_some());

        let mut sources: Vec<String> = participant_edges(&store, "ev-legacy")
            .await
            .into_iter()
            .map(|e| e.source_id)
            .collect();
        sources.sort();
        assert_eq!(sources, vec!["p1", "p2"]);
        let located = store
            .get_edges(&EdgeFilter::new().from_source("ev-legacy").of_type(EdgeType::OccurredAt))
            .await
            .unwrap();
        assert_eq!(located.len(), 1);

        // 写回后不再带参与者列表，再次读取不会重复建边
        let raw: StoredEvent = store.get(EVENT, "ev-legacy").await.unwrap().unwrap();
        assert!(raw.participants.is_none());
        store.get_event("ev-legacy").await.unwrap().unwrap();
        assert_eq!(participant_edges(&store, "ev-legacy").await.len(), 2);
    }

    #[tokio::test]
    async fn test_legacy_event_upgraded_on_search() {
        let store = store().await;
        store.put(EVENT, "ev-old", legacy_event("ev-old")).await.unwrap();

        let hits = store
            .search_memories("u1", "argued about the lighthouse", &[MemoryKind::Event], 5)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "ev-old");
        assert_eq!(participant_edges(&store, "ev-old").await.len(), 2);

        let raw: StoredEvent = store.get(EVENT, "ev-old").await.unwrap().unwrap();
        assert!(raw.participants.is_none());
        assert!(raw.embedding.is_some());
    }
}
