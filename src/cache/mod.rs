//! 整合意图的临时持久化
//!
//! 断线后待执行的整合以 `(user_id → fire_at)` 形式写入带 TTL 的存储，
//! 进程重启时扫描并恢复计时器。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::config::{CacheBackend, CacheConfig};
use crate::error::{AppError, Result};

/// 持久化的整合意图
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidationIntent {
    pub user_id: String,
    pub fire_at: DateTime<Utc>,
}

#[async_trait]
pub trait IntentStore: Send + Sync {
    /// 写入意图，ttl 后自动过期
    async fn put(&self, user_id: &str, fire_at: DateTime<Utc>, ttl: Duration) -> Result<()>;

    async fn remove(&self, user_id: &str) -> Result<()>;

    /// 所有未过期的意图
    async fn scan(&self) -> Result<Vec<ConsolidationIntent>>;
}

/// 基于 Redis 的意图存储
pub struct RedisIntentStore {
    conn: redis::aio::MultiplexedConnection,
    key_prefix: String,
}

impl RedisIntentStore {
    pub async fn connect(redis_url: &str, key_prefix: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_multiplexed_tokio_connection().await?;
        info!(redis_url, "Connected to Redis intent store");
        Ok(Self {
            conn,
            key_prefix: key_prefix.to_string(),
        })
    }

    fn key(&self, user_id: &str) -> String {
        format!("{}{}", self.key_prefix, user_id)
    }
}

#[async_trait]
impl IntentStore for RedisIntentStore {
    async fn put(&self, user_id: &str, fire_at: DateTime<Utc>, ttl: Duration) -> Result<()> {
        let intent = ConsolidationIntent {
            user_id: user_id.to_string(),
            fire_at,
        };
        let value = serde_json::to_string(&intent)?;
        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(self.key(user_id))
            .arg(value)
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn remove(&self, user_id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::cmd("DEL")
            .arg(self.key(user_id))
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn scan(&self) -> Result<Vec<ConsolidationIntent>> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}*", self.key_prefix);
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        let mut intents = Vec::with_capacity(keys.len());
        for key in keys {
            let raw: Option<String> = redis::cmd("GET").arg(&key).query_async(&mut conn).await?;
            // 扫描与读取之间可能已过期
            let Some(raw) = raw else { continue };
            match serde_json::from_str::<ConsolidationIntent>(&raw) {
                Ok(intent) => intents.push(intent),
                Err(e) => debug!(key = %key, error = %e, "Skipping malformed intent"),
            }
        }
        Ok(intents)
    }
}

/// 进程内意图存储（开发/测试）
#[derive(Default)]
pub struct MemoryIntentStore {
    entries: DashMap<String, (DateTime<Utc>, DateTime<Utc>)>,
}

impl MemoryIntentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl IntentStore for MemoryIntentStore {
    async fn put(&self, user_id: &str, fire_at: DateTime<Utc>, ttl: Duration) -> Result<()> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| AppError::Cache(format!("Invalid intent TTL: {}", e)))?;
        self.entries
            .insert(user_id.to_string(), (fire_at, Utc::now() + ttl));
        Ok(())
    }

    async fn remove(&self, user_id: &str) -> Result<()> {
        self.entries.remove(user_id);
        Ok(())
    }

    async fn scan(&self) -> Result<Vec<ConsolidationIntent>> {
        let now = Utc::now();
        self.entries.retain(|_, (_, expires_at)| *expires_at > now);
        Ok(self
            .entries
            .iter()
            .map(|entry| ConsolidationIntent {
                user_id: entry.key().clone(),
                fire_at: entry.value().0,
            })
            .collect())
    }
}

pub async fn create_intent_store(config: &CacheConfig) -> Result<std::sync::Arc<dyn IntentStore>> {
    match config.backend {
        CacheBackend::Redis => Ok(std::sync::Arc::new(
            RedisIntentStore::connect(&config.redis_url, &config.key_prefix).await?,
        )),
        CacheBackend::Memory => Ok(std::sync::Arc::new(MemoryIntentStore::new())),
    }
}
