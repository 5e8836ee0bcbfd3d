//! 记忆整合调度
//!
//! 每个用户一个状态机：idle → pending（宽限计时中）→ fired，或 pending → idle（重连取消）。
//! 待执行的意图写入 IntentStore，进程重启后由 `recover` 恢复。
//!
//! 计时器与取消之间的竞争由代数（generation）解决：计时器触发时只有代数仍匹配
//! 才会取走待处理项，其余情况视为已被取消或被新的调度取代。

use chrono::Utc;
use futures_util::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::IntentStore;
use crate::config::config::ConsolidationConfig;
use crate::error::{AppError, Result};
use crate::models::{ConsolidationReport, MemoryEpisode};
use crate::observability::AppMetrics;
use crate::storage::{DreamGenerator, GraphRepository};

/// 一次会话结束时交给调度器的完整转录
#[derive(Debug, Clone, PartialEq)]
pub struct SessionTranscript {
    pub persona_id: Option<String>,
    pub text: String,
    /// 会话情绪 [-1, 1]
    pub valence: f32,
}

impl SessionTranscript {
    pub fn new(persona_id: Option<&str>, text: &str, valence: f32) -> Self {
        Self {
            persona_id: persona_id.map(str::to_string),
            text: text.to_string(),
            valence,
        }
    }
}

struct Pending {
    generation: u64,
    transcripts: Vec<SessionTranscript>,
    timer: JoinHandle<()>,
}

pub struct ConsolidationScheduler {
    repo: Arc<dyn GraphRepository>,
    intents: Arc<dyn IntentStore>,
    dreams: Option<Arc<dyn DreamGenerator>>,
    metrics: Arc<AppMetrics>,
    config: ConsolidationConfig,
    grace: Duration,
    pending: Mutex<HashMap<String, Pending>>,
    generation: AtomicU64,
}

impl ConsolidationScheduler {
    pub fn new(
        repo: Arc<dyn GraphRepository>,
        intents: Arc<dyn IntentStore>,
        dreams: Option<Arc<dyn DreamGenerator>>,
        metrics: Arc<AppMetrics>,
        config: ConsolidationConfig,
    ) -> Self {
        Self {
            repo,
            intents,
            dreams,
            metrics,
            grace: Duration::from_secs(config.grace_period_secs),
            config,
            pending: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(1),
        }
    }

    /// 覆盖配置中的宽限期（秒级粒度之外的场景）
    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn grace_period(&self) -> Duration {
        self.grace
    }

    /// 断线：重置该用户的计时器，保留此前尚未整合的转录
    pub async fn schedule(self: &Arc<Self>, user_id: &str, transcript: Option<SessionTranscript>) {
        let grace = self.grace_period();
        let fire_at = Utc::now() + chrono::Duration::from_std(grace).unwrap_or_else(|_| chrono::Duration::zero());
        let ttl = grace + Duration::from_secs(self.config.intent_ttl_margin_secs);
        if let Err(e) = self.intents.put(user_id, fire_at, ttl).await {
            warn!(user_id, error = %e, "Failed to persist consolidation intent");
        }

        let mut pending = self.pending.lock().await;
        let mut transcripts = match pending.remove(user_id) {
            Some(previous) => {
                previous.timer.abort();
                previous.transcripts
            }
            None => Vec::new(),
        };
        transcripts.extend(transcript);

        let generation = self.generation.fetch_add(1, Ordering::SeqCst);
        let timer = self.start_timer(user_id, generation, grace);
        pending.insert(
            user_id.to_string(),
            Pending {
                generation,
                transcripts,
                timer,
            },
        );
        debug!(user_id, grace_secs = grace.as_secs(), generation, "Consolidation scheduled");
    }

    /// 重连：取消计时器并删除意图，丢弃缓冲的转录
    pub async fn cancel(&self, user_id: &str) -> bool {
        let removed = self.pending.lock().await.remove(user_id);
        if let Err(e) = self.intents.remove(user_id).await {
            warn!(user_id, error = %e, "Failed to delete consolidation intent");
        }
        match removed {
            Some(p) => {
                p.timer.abort();
                debug!(user_id, dropped = p.transcripts.len(), "Consolidation cancelled by reconnect");
                true
            }
            None => false,
        }
    }

    pub async fn is_pending(&self, user_id: &str) -> bool {
        self.pending.lock().await.contains_key(user_id)
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// 启动时恢复持久化的意图；已过期的立即触发，返回恢复的数量
    pub async fn recover(self: &Arc<Self>) -> Result<usize> {
        let intents = self.intents.scan().await?;
        let now = Utc::now();
        let mut pending = self.pending.lock().await;
        let mut recovered = 0;

        for intent in intents {
            if pending.contains_key(&intent.user_id) {
                continue;
            }
            let delay = (intent.fire_at - now).to_std().unwrap_or(Duration::ZERO);
            let generation = self.generation.fetch_add(1, Ordering::SeqCst);
            let timer = self.start_timer(&intent.user_id, generation, delay);
            pending.insert(
                intent.user_id.clone(),
                Pending {
                    generation,
                    transcripts: Vec::new(),
                    timer,
                },
            );
            debug!(user_id = %intent.user_id, delay_ms = delay.as_millis() as u64, "Consolidation intent recovered");
            recovered += 1;
        }

        info!(recovered, "Consolidation intents recovered");
        Ok(recovered)
    }

    /// 优雅关闭：取消所有计时器，先把缓冲的转录全部落盘，再并发整合
    ///
    /// 等待上限只作用于整合阶段；转录写入不受限，关闭不会丢失已结束会话的内容。
    pub async fn shutdown(&self) {
        let drained: Vec<(String, Vec<SessionTranscript>)> = {
            let mut pending = self.pending.lock().await;
            pending
                .drain()
                .map(|(user_id, p)| {
                    p.timer.abort();
                    (user_id, p.transcripts)
                })
                .collect()
        };
        if drained.is_empty() {
            return;
        }

        let mut persisted = Vec::with_capacity(drained.len());
        for (user_id, transcripts) in drained {
            match self.persist_transcripts(&user_id, transcripts).await {
                Ok(()) => persisted.push(user_id),
                Err((e, unsaved)) => {
                    // 意图保留，下次启动由 recover 接手整合
                    self.metrics.record_consolidation(false);
                    warn!(user_id = %user_id, error = %e, unsaved = unsaved.len(), "Failed to persist transcripts on shutdown");
                }
            }
        }

        let wait = Duration::from_secs(self.config.shutdown_wait_secs);
        info!(users = persisted.len(), wait_secs = wait.as_secs(), "Rescuing pending consolidations");
        let jobs = persisted.iter().map(|user_id| async move {
            let _ = self.consolidate(user_id).await;
        });

        if tokio::time::timeout(wait, join_all(jobs)).await.is_err() {
            warn!(wait_secs = wait.as_secs(), "Shutdown wait elapsed, abandoning unfinished consolidations");
        }
    }

    fn start_timer(self: &Arc<Self>, user_id: &str, generation: u64, delay: Duration) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        let user_id = user_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            scheduler.fire(&user_id, generation).await;
        })
    }

    async fn fire(self: &Arc<Self>, user_id: &str, generation: u64) {
        let transcripts = {
            let mut pending = self.pending.lock().await;
            let current = pending
                .get(user_id)
                .is_some_and(|p| p.generation == generation);
            if !current {
                debug!(user_id, generation, "Stale consolidation timer ignored");
                return;
            }
            pending
                .remove(user_id)
                .map(|p| p.transcripts)
                .unwrap_or_default()
        };

        if let Err((e, unsaved)) = self.persist_transcripts(user_id, transcripts).await {
            self.metrics.record_consolidation(false);
            warn!(user_id, error = %e, unsaved = unsaved.len(), "Failed to persist transcripts, retrying after grace");
            self.requeue(user_id, unsaved).await;
            return;
        }
        let _ = self.consolidate(user_id).await;
    }

    /// 写入失败的转录放回队首并重新计时，意图保持不变
    async fn requeue(self: &Arc<Self>, user_id: &str, mut unsaved: Vec<SessionTranscript>) {
        let mut pending = self.pending.lock().await;
        if let Some(existing) = pending.get_mut(user_id) {
            // 期间已再次断线，交给新的计时器
            unsaved.append(&mut existing.transcripts);
            existing.transcripts = unsaved;
            return;
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst);
        let timer = self.start_timer(user_id, generation, self.grace);
        pending.insert(
            user_id.to_string(),
            Pending {
                generation,
                transcripts: unsaved,
                timer,
            },
        );
    }

    /// 把缓冲的转录写成情景；失败时连同尚未写入的转录一起返回
    async fn persist_transcripts(
        &self,
        user_id: &str,
        transcripts: Vec<SessionTranscript>,
    ) -> std::result::Result<(), (AppError, Vec<SessionTranscript>)> {
        let mut remaining = transcripts.into_iter();
        while let Some(t) = remaining.next() {
            if t.text.trim().is_empty() {
                continue;
            }
            let episode = MemoryEpisode::from_transcript(user_id, t.persona_id.as_deref(), &t.text, t.valence);
            if let Err(e) = self.repo.save_episode(episode).await {
                let mut unsaved = vec![t];
                unsaved.extend(remaining);
                return Err((e, unsaved));
            }
        }
        Ok(())
    }

    /// 整合已落盘的情景；成功后删除意图
    async fn consolidate(&self, user_id: &str) -> Result<ConsolidationReport> {
        let result = self.repo.consolidate_memories(user_id, self.dreams.clone()).await;
        self.metrics.record_consolidation(result.is_ok());
        match &result {
            Ok(report) => {
                info!(
                    user_id,
                    episodes = report.episodes_consumed,
                    dream = ?report.dream_id,
                    "Consolidation fired"
                );
                // 整合期间用户可能再次断线，新的意图保留
                if !self.is_pending(user_id).await {
                    if let Err(e) = self.intents.remove(user_id).await {
                        warn!(user_id, error = %e, "Failed to delete consolidation intent");
                    }
                }
            }
            Err(e) => warn!(user_id, error = %e, "Consolidation failed, left for the next cycle"),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryIntentStore;
    use crate::index::{EmbeddingModel, HashingEmbeddingModel};
    use crate::storage::{GraphSettings, InMemoryGraphStore};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    /// 每次编码前先睡一段时间
    struct SlowEmbedder(Duration);

    #[async_trait]
    impl EmbeddingModel for SlowEmbedder {
        async fn encode(&self, text: &str) -> Result<Vec<f32>> {
            tokio::time::sleep(self.0).await;
            HashingEmbeddingModel::new(32).encode(text).await
        }

        async fn encode_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
            tokio::time::sleep(self.0).await;
            HashingEmbeddingModel::new(32).encode_batch(texts).await
        }

        fn dimension(&self) -> usize {
            32
        }
    }

    /// 前 n 次编码失败
    struct FlakyEmbedder {
        failures_left: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingModel for FlakyEmbedder {
        async fn encode(&self, text: &str) -> Result<Vec<f32>> {
            let failing = self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(AppError::Embedding("embedding backend unavailable".to_string()));
            }
            HashingEmbeddingModel::new(32).encode(text).await
        }

        async fn encode_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
            HashingEmbeddingModel::new(32).encode_batch(texts).await
        }

        fn dimension(&self) -> usize {
            32
        }
    }

    struct Fixture {
        scheduler: Arc<ConsolidationScheduler>,
        repo: Arc<InMemoryGraphStore>,
        intents: Arc<MemoryIntentStore>,
        metrics: Arc<AppMetrics>,
    }

    fn fixture(grace: Duration) -> Fixture {
        fixture_with(grace, Arc::new(HashingEmbeddingModel::new(32)), 2)
    }

    fn fixture_with(grace: Duration, embedder: Arc<dyn EmbeddingModel>, shutdown_wait_secs: u64) -> Fixture {
        let repo = Arc::new(InMemoryGraphStore::new(embedder, GraphSettings::default()));
        let intents = Arc::new(MemoryIntentStore::new());
        let metrics = Arc::new(AppMetrics::default());
        let config = ConsolidationConfig {
            shutdown_wait_secs,
            ..ConsolidationConfig::default()
        };
        let scheduler = ConsolidationScheduler::new(repo.clone(), intents.clone(), None, metrics.clone(), config)
            .with_grace_period(grace);
        Fixture {
            scheduler: Arc::new(scheduler),
            repo,
            intents,
            metrics,
        }
    }

    fn transcript(text: &str) -> Option<SessionTranscript> {
        Some(SessionTranscript::new(Some("p1"), text, 0.5))
    }

    #[tokio::test]
    async fn test_fire_after_grace_consolidates_exactly_once() {
        let f = fixture(Duration::from_millis(30));
        f.scheduler.schedule("u1", transcript("we watched the rain together")).await;
        assert!(f.scheduler.is_pending("u1").await);
        assert_eq!(f.intents.len(), 1);

        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(f.repo.consolidation_calls(), 1);
        assert!(!f.scheduler.is_pending("u1").await);
        assert!(f.intents.is_empty());

        let episodes = f.repo.all_episodes("u1").await;
        assert_eq!(episodes.len(), 1);
        assert!(episodes[0].is_consumed());
        assert!(f.repo.get_last_dream("u1").await.unwrap().is_some());
        assert!(f.metrics.gather().contains("consolidations_total 1"));
    }

    #[tokio::test]
    async fn test_cancel_before_grace_means_no_consolidation() {
        let f = fixture(Duration::from_millis(80));
        f.scheduler.schedule("u1", transcript("half a conversation")).await;
        assert!(f.scheduler.cancel("u1").await);

        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(f.repo.consolidation_calls(), 0);
        assert!(f.repo.all_episodes("u1").await.is_empty());
        assert!(f.intents.is_empty());
        assert!(!f.scheduler.cancel("u1").await);
    }

    #[tokio::test]
    async fn test_reschedule_keeps_earlier_transcript() {
        let f = fixture(Duration::from_millis(60));
        f.scheduler.schedule("u1", transcript("first session")).await;
        f.scheduler.schedule("u1", transcript("second session")).await;
        assert_eq!(f.scheduler.pending_count().await, 1);

        tokio::time::sleep(Duration::from_millis(250)).await;

        assert_eq!(f.repo.consolidation_calls(), 1);
        assert_eq!(f.repo.all_episodes("u1").await.len(), 2);
    }

    #[tokio::test]
    async fn test_recover_fires_overdue_and_reschedules_future_intents() {
        let f = fixture(Duration::from_secs(60));
        let now = Utc::now();
        f.intents
            .put("late", now - chrono::Duration::seconds(5), Duration::from_secs(60))
            .await
            .unwrap();
        f.intents
            .put("soon", now + chrono::Duration::milliseconds(50), Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(f.scheduler.recover().await.unwrap(), 2);
        tokio::time::sleep(Duration::from_millis(250)).await;

        assert_eq!(f.repo.consolidation_calls(), 2);
        assert_eq!(f.scheduler.pending_count().await, 0);
        assert!(f.intents.is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_rescues_pending_transcripts() {
        let f = fixture(Duration::from_secs(60));
        f.scheduler.schedule("u1", transcript("said goodbye")).await;
        f.scheduler.schedule("u2", None).await;

        f.scheduler.shutdown().await;

        assert_eq!(f.scheduler.pending_count().await, 0);
        assert_eq!(f.repo.consolidation_calls(), 2);
        assert_eq!(f.repo.all_episodes("u1").await.len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_persists_transcripts_even_when_slower_than_wait() {
        let f = fixture_with(
            Duration::from_secs(60),
            Arc::new(SlowEmbedder(Duration::from_millis(1500))),
            1,
        );
        f.scheduler.schedule("u1", transcript("the last thing she said before logging off")).await;

        f.scheduler.shutdown().await;

        assert_eq!(f.scheduler.pending_count().await, 0);
        assert_eq!(f.repo.all_episodes("u1").await.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_episode_write_is_retried_not_dropped() {
        let f = fixture_with(
            Duration::from_millis(30),
            Arc::new(FlakyEmbedder {
                failures_left: AtomicUsize::new(1),
            }),
            2,
        );
        f.scheduler.schedule("u1", transcript("we talked about the lighthouse")).await;

        tokio::time::sleep(Duration::from_millis(300)).await;

        let episodes = f.repo.all_episodes("u1").await;
        assert_eq!(episodes.len(), 1);
        assert!(episodes[0].is_consumed());
        assert_eq!(f.repo.consolidation_calls(), 1);
        assert!(!f.scheduler.is_pending("u1").await);
        assert!(f.intents.is_empty());

        let metrics = f.metrics.gather();
        assert!(metrics.contains("consolidation_failures_total 1"));
        assert!(metrics.contains("consolidations_total 1"));
    }

    #[tokio::test]
    async fn test_failed_write_keeps_intent_until_retry() {
        let f = fixture_with(
            Duration::from_millis(40),
            Arc::new(FlakyEmbedder {
                failures_left: AtomicUsize::new(usize::MAX),
            }),
            2,
        );
        f.scheduler.schedule("u1", transcript("a story about the harbour")).await;

        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(f.scheduler.is_pending("u1").await);
        assert_eq!(f.intents.len(), 1);
        assert_eq!(f.repo.consolidation_calls(), 0);
        f.scheduler.cancel("u1").await;
    }
}
