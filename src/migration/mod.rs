//! 迁移模块
//!
//! 将旧版“参与者内嵌列表”形式的集体事件转换为基于边的规范形式。
//! 列表形式只在加载时读取，之后不会再写回。
//! 导入走 `migrate_legacy_events`；SurrealDB 存储在读到残留的旧版记录时也会就地升级。

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::{info, warn};

use crate::error::{AppError, Result};
use crate::models::{CollectiveEvent, EdgeFilter, EdgeType, GraphEdge, LegacyCollectiveEvent};
use crate::storage::GraphRepository;

/// 迁移进度
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationProgress {
    /// 新写入的事件数
    pub events_migrated: usize,
    /// 已存在、仅补齐边的事件数
    pub events_skipped: usize,
    /// 新建的边数
    pub edges_created: usize,
    /// 错误
    pub errors: Vec<MigrationError>,
    pub start_time: chrono::DateTime<chrono::Utc>,
    pub last_updated: chrono::DateTime<chrono::Utc>,
}

impl Default for MigrationProgress {
    fn default() -> Self {
        Self {
            events_migrated: 0,
            events_skipped: 0,
            edges_created: 0,
            errors: Vec::new(),
            start_time: chrono::Utc::now(),
            last_updated: chrono::Utc::now(),
        }
    }
}

/// 迁移错误
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationError {
    pub error_type: String,
    pub message: String,
    pub record_id: Option<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl MigrationError {
    pub fn new(error_type: &str, message: &str, record_id: Option<&str>) -> Self {
        Self {
            error_type: error_type.to_string(),
            message: message.to_string(),
            record_id: record_id.map(|s| s.to_string()),
            timestamp: chrono::Utc::now(),
        }
    }
}

/// 从文件读取旧版事件：接受 JSON 数组或每行一个 JSON 对象
pub fn load_legacy_events(path: &Path) -> Result<Vec<LegacyCollectiveEvent>> {
    let raw = std::fs::read_to_string(path)?;
    parse_legacy_events(&raw)
}

pub fn parse_legacy_events(raw: &str) -> Result<Vec<LegacyCollectiveEvent>> {
    let trimmed = raw.trim_start();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    if trimmed.starts_with('[') {
        return Ok(serde_json::from_str(trimmed)?);
    }
    raw.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(AppError::from))
        .collect()
}

/// 迁移旧版事件；重复执行不会产生重复的边
pub async fn migrate_legacy_events(
    repo: &dyn GraphRepository,
    events: Vec<LegacyCollectiveEvent>,
) -> Result<MigrationProgress> {
    let mut progress = MigrationProgress::default();

    for legacy in events {
        let event_id = legacy.id.clone();
        match migrate_one(repo, legacy).await {
            Ok((created, edges)) => {
                if created {
                    progress.events_migrated += 1;
                } else {
                    progress.events_skipped += 1;
                }
                progress.edges_created += edges;
            }
            Err(e) => {
                warn!(event_id = %event_id, error = %e, "Legacy event migration failed");
                progress.errors.push(MigrationError::new(
                    "migrate_event",
                    &e.to_string(),
                    Some(&event_id),
                ));
            }
        }
        progress.last_updated = chrono::Utc::now();
    }

    info!(
        migrated = progress.events_migrated,
        skipped = progress.events_skipped,
        edges = progress.edges_created,
        errors = progress.errors.len(),
        "Legacy event migration finished"
    );
    Ok(progress)
}

/// 返回 (是否新写入事件, 新建边数)
async fn migrate_one(
    repo: &dyn GraphRepository,
    legacy: LegacyCollectiveEvent,
) -> Result<(bool, usize)> {
    let (event, participants) = legacy.into_canonical();

    if repo.get_event(&event.id).await?.is_none() {
        let edges = participants.len() + usize::from(event.location_id.is_some());
        repo.save_event(event, &participants).await?;
        return Ok((true, edges));
    }

    // 事件已存在：只补齐缺失的边
    let created = backfill_event_edges(repo, &event, &participants).await?;
    Ok((false, created))
}

/// 补齐事件缺失的参与边和地点边，返回新建边数；已有的边不会重复创建
pub(crate) async fn backfill_event_edges(
    repo: &dyn GraphRepository,
    event: &CollectiveEvent,
    participants: &[String],
) -> Result<usize> {
    let existing: HashSet<String> = repo
        .get_edges(&EdgeFilter::new().to_target(&event.id).of_type(EdgeType::ParticipatedIn))
        .await?
        .into_iter()
        .map(|e| e.source_id)
        .collect();

    let mut created = 0;
    for participant in participants.iter().filter(|p| !existing.contains(*p)) {
        let mut edge = GraphEdge::new(participant, &event.id, EdgeType::ParticipatedIn);
        edge.timestamp = event.occurred_at;
        repo.create_edge(edge).await?;
        created += 1;
    }

    if let Some(location_id) = &event.location_id {
        let located = repo
            .get_edges(&EdgeFilter::new().from_source(&event.id).of_type(EdgeType::OccurredAt))
            .await?;
        if located.is_empty() {
            let mut edge = GraphEdge::new(&event.id, location_id, EdgeType::OccurredAt);
            edge.timestamp = event.occurred_at;
            repo.create_edge(edge).await?;
            created += 1;
        }
    }

    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::HashingEmbeddingModel;
    use crate::storage::{GraphSettings, InMemoryGraphStore};
    use std::sync::Arc;

    const LEGACY_JSONL: &str = r#"
{"id":"ev-1","user_id":"u1","event_type":"conflict","outcome":"escalated","summary":"p1 and p2 argued about the map","location_id":"loc-1","participants":["p1","p2"],"occurred_at":"2024-03-01T10:00:00Z"}
{"id":"ev-2","user_id":"u1","event_type":"leisure","outcome":"uneventful","summary":"p3 read alone","participants":["p3"],"occurred_at":"2024-03-01T12:00:00Z"}
"#;

    fn store() -> InMemoryGraphStore {
        InMemoryGraphStore::new(Arc::new(HashingEmbeddingModel::new(16)), GraphSettings::default())
    }

    #[test]
    fn test_parse_both_forms() {
        let events = parse_legacy_events(LEGACY_JSONL).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].participants, vec!["p1", "p2"]);

        let as_array = serde_json::to_string(&events).unwrap();
        assert_eq!(parse_legacy_events(&as_array).unwrap().len(), 2);
        assert!(parse_legacy_events("  ").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_migration_synthesizes_edges() {
        let store = store();
        let events = parse_legacy_events(LEGACY_JSONL).unwrap();
        let progress = migrate_legacy_events(&store, events).await.unwrap();

        assert_eq!(progress.events_migrated, 2);
        assert_eq!(progress.edges_created, 4);
        assert!(progress.errors.is_empty());

        let participants = store
            .get_edges(&EdgeFilter::new().to_target("ev-1").of_type(EdgeType::ParticipatedIn))
            .await
            .unwrap();
        assert_eq!(participants.len(), 2);

        let stored = store.get_event("ev-1").await.unwrap().unwrap();
        let json = serde_json::to_value(&stored).unwrap();
        assert!(json.get("participants").is_none());
    }

    #[tokio::test]
    async fn test_migration_is_idempotent() {
        let store = store();
        let events = parse_legacy_events(LEGACY_JSONL).unwrap();
        migrate_legacy_events(&store, events.clone()).await.unwrap();
        let second = migrate_legacy_events(&store, events).await.unwrap();

        assert_eq!(second.events_migrated, 0);
        assert_eq!(second.events_skipped, 2);
        assert_eq!(second.edges_created, 0);

        let all = store.get_edges(&EdgeFilter::new()).await.unwrap();
        assert_eq!(all.len(), 4);
    }
}
