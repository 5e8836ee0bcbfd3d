//! 通用图边
//!
//! 只追加；需要“更新或插入”语义的调用方（例如互动计数）
//! 必须按 (source, target, type) 找到已有边并原地修改。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 边类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeType {
    /// 人格参与事件
    #[serde(rename = "PARTICIPATED_IN")]
    ParticipatedIn,
    /// 事件发生于地点
    #[serde(rename = "OCCURRED_AT")]
    OccurredAt,
    /// 情景被整合进梦境
    #[serde(rename = "CONSOLIDATED_INTO")]
    ConsolidatedInto,
    /// 用户与人格的真实互动（计数边）
    #[serde(rename = "INTERACTED_WITH")]
    InteractedWith,
    /// 情景属于用户
    #[serde(rename = "REMEMBERS")]
    Remembers,
}

impl std::fmt::Display for EdgeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EdgeType::ParticipatedIn => write!(f, "PARTICIPATED_IN"),
            EdgeType::OccurredAt => write!(f, "OCCURRED_AT"),
            EdgeType::ConsolidatedInto => write!(f, "CONSOLIDATED_INTO"),
            EdgeType::InteractedWith => write!(f, "INTERACTED_WITH"),
            EdgeType::Remembers => write!(f, "REMEMBERS"),
        }
    }
}

/// 通用图边
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEdge {
    pub id: String,
    pub source_id: String,
    pub target_id: String,
    pub edge_type: EdgeType,
    pub properties: HashMap<String, serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl GraphEdge {
    pub fn new(source_id: &str, target_id: &str, edge_type: EdgeType) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source_id: source_id.to_string(),
            target_id: target_id.to_string(),
            edge_type,
            properties: HashMap::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_property(mut self, key: &str, value: serde_json::Value) -> Self {
        self.properties.insert(key.to_string(), value);
        self
    }

    /// 计数属性（不存在时为 0）
    pub fn count(&self) -> u64 {
        self.properties
            .get("count")
            .and_then(|v| v.as_u64())
            .unwrap_or(0)
    }

    /// 原地递增计数并刷新时间戳
    pub fn bump(&mut self, at: DateTime<Utc>) -> u64 {
        let next = self.count() + 1;
        self.properties
            .insert("count".to_string(), serde_json::Value::from(next));
        self.timestamp = at;
        next
    }

    pub fn same_link(&self, source_id: &str, target_id: &str, edge_type: EdgeType) -> bool {
        self.source_id == source_id && self.target_id == target_id && self.edge_type == edge_type
    }
}

/// 边查询条件
#[derive(Debug, Clone, Default)]
pub struct EdgeFilter {
    pub source_id: Option<String>,
    pub target_id: Option<String>,
    pub edge_type: Option<EdgeType>,
    pub since: Option<DateTime<Utc>>,
}

impl EdgeFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_source(mut self, source_id: &str) -> Self {
        self.source_id = Some(source_id.to_string());
        self
    }

    pub fn to_target(mut self, target_id: &str) -> Self {
        self.target_id = Some(target_id.to_string());
        self
    }

    pub fn of_type(mut self, edge_type: EdgeType) -> Self {
        self.edge_type = Some(edge_type);
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn matches(&self, edge: &GraphEdge) -> bool {
        self.source_id.as_deref().is_none_or(|s| edge.source_id == s)
            && self.target_id.as_deref().is_none_or(|t| edge.target_id == t)
            && self.edge_type.is_none_or(|t| edge.edge_type == t)
            && self.since.is_none_or(|since| edge.timestamp >= since)
    }
}
