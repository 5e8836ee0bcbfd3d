//! 用户模型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 用户
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// 用户唯一标识
    pub id: String,

    /// 创建时间
    pub created_at: DateTime<Utc>,

    /// 最后在线时间（用于计算离线间隔）
    pub last_seen: DateTime<Utc>,
}

impl User {
    /// 首次接触时创建用户
    pub fn new(id: &str) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            created_at: now,
            last_seen: now,
        }
    }

    /// 距离上次在线过去的分钟数（不会为负）
    pub fn minutes_since_seen(&self, now: DateTime<Utc>) -> f64 {
        let seconds = (now - self.last_seen).num_seconds().max(0);
        seconds as f64 / 60.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_minutes_since_seen() {
        let mut user = User::new("u1");
        let now = Utc::now();
        user.last_seen = now - Duration::minutes(90);
        assert!((user.minutes_since_seen(now) - 90.0).abs() < 0.01);

        user.last_seen = now + Duration::minutes(5);
        assert_eq!(user.minutes_since_seen(now), 0.0);
    }
}
