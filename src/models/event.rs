//! 集体事件模型
//!
//! 离线模拟产生的背景事件。参与者通过图边（PARTICIPATED_IN）关联，
//! 不再内嵌参与者列表；旧格式由 migration 模块在加载时转换为边。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 事件意图
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventIntent {
    #[serde(rename = "conflict")]
    Conflict,
    #[serde(rename = "support")]
    Support,
    #[serde(rename = "collaboration")]
    Collaboration,
    #[serde(rename = "gossip")]
    Gossip,
    #[serde(rename = "leisure")]
    Leisure,
}

impl EventIntent {
    pub const ALL: [EventIntent; 5] = [
        EventIntent::Conflict,
        EventIntent::Support,
        EventIntent::Collaboration,
        EventIntent::Gossip,
        EventIntent::Leisure,
    ];
}

impl std::fmt::Display for EventIntent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventIntent::Conflict => write!(f, "conflict"),
            EventIntent::Support => write!(f, "support"),
            EventIntent::Collaboration => write!(f, "collaboration"),
            EventIntent::Gossip => write!(f, "gossip"),
            EventIntent::Leisure => write!(f, "leisure"),
        }
    }
}

/// 事件结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventOutcome {
    #[serde(rename = "escalated")]
    Escalated,
    #[serde(rename = "reconciled")]
    Reconciled,
    #[serde(rename = "bonded")]
    Bonded,
    #[serde(rename = "rebuffed")]
    Rebuffed,
    #[serde(rename = "succeeded")]
    Succeeded,
    #[serde(rename = "failed")]
    Failed,
    #[serde(rename = "uneventful")]
    Uneventful,
}

impl EventOutcome {
    /// 对两个真实参与者之间亲和度的影响
    pub fn valence_delta(&self) -> f32 {
        match self {
            EventOutcome::Escalated => -8.0,
            EventOutcome::Reconciled => 4.0,
            EventOutcome::Bonded => 6.0,
            EventOutcome::Rebuffed => -3.0,
            EventOutcome::Succeeded => 3.0,
            EventOutcome::Failed => -2.0,
            EventOutcome::Uneventful => 0.0,
        }
    }
}

impl std::fmt::Display for EventOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventOutcome::Escalated => write!(f, "escalated"),
            EventOutcome::Reconciled => write!(f, "reconciled"),
            EventOutcome::Bonded => write!(f, "bonded"),
            EventOutcome::Rebuffed => write!(f, "rebuffed"),
            EventOutcome::Succeeded => write!(f, "succeeded"),
            EventOutcome::Failed => write!(f, "failed"),
            EventOutcome::Uneventful => write!(f, "uneventful"),
        }
    }
}

/// 集体事件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectiveEvent {
    pub id: String,
    /// 事件所属用户的世界
    pub user_id: String,
    pub event_type: EventIntent,
    pub outcome: EventOutcome,
    pub summary: String,
    pub location_id: Option<String>,
    pub embedding: Option<Vec<f32>>,
    pub occurred_at: DateTime<Utc>,
}

impl CollectiveEvent {
    pub fn new(
        user_id: &str,
        event_type: EventIntent,
        outcome: EventOutcome,
        summary: &str,
        location_id: Option<&str>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            event_type,
            outcome,
            summary: summary.to_string(),
            location_id: location_id.map(str::to_string),
            embedding: None,
            occurred_at: Utc::now(),
        }
    }
}

/// 地点
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Location {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl Location {
    pub fn new(name: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            created_at: Utc::now(),
        }
    }
}

/// 旧版事件格式：参与者内嵌为列表
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegacyCollectiveEvent {
    pub id: String,
    pub user_id: String,
    pub event_type: EventIntent,
    pub outcome: EventOutcome,
    pub summary: String,
    #[serde(default)]
    pub location_id: Option<String>,
    #[serde(default)]
    pub participants: Vec<String>,
    pub occurred_at: DateTime<Utc>,
}

impl LegacyCollectiveEvent {
    /// 拆分为规范事件和参与者列表
    pub fn into_canonical(self) -> (CollectiveEvent, Vec<String>) {
        let event = CollectiveEvent {
            id: self.id,
            user_id: self.user_id,
            event_type: self.event_type,
            outcome: self.outcome,
            summary: self.summary,
            location_id: self.location_id,
            embedding: None,
            occurred_at: self.occurred_at,
        };
        (event, self.participants)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_event_deserializes_and_splits() {
        let json = r#"{
            "id": "ev1",
            "user_id": "u1",
            "event_type": "conflict",
            "outcome": "escalated",
            "summary": "an argument at the market",
            "participants": ["p1", "p2"],
            "occurred_at": "2024-01-01T00:00:00Z"
        }"#;
        let legacy: LegacyCollectiveEvent = serde_json::from_str(json).unwrap();
        let (event, participants) = legacy.into_canonical();
        assert_eq!(event.id, "ev1");
        assert_eq!(event.event_type, EventIntent::Conflict);
        assert_eq!(participants, vec!["p1", "p2"]);

        // 规范格式不再携带参与者列表
        let value = serde_json::to_value(&event).unwrap();
        assert!(value.get("participants").is_none());
    }

    #[test]
    fn test_outcome_deltas_have_expected_sign() {
        assert!(EventOutcome::Escalated.valence_delta() < 0.0);
        assert!(EventOutcome::Bonded.valence_delta() > 0.0);
        assert_eq!(EventOutcome::Uneventful.valence_delta(), 0.0);
    }
}
