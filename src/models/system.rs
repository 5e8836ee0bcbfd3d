//! 全局系统配置节点（存于图中，可在运行时调整）

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 系统配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    /// 全局亲和度影响表（情感关键词 -> 亲和度增量）
    pub affinity_impact: HashMap<String, f32>,
}

impl Default for SystemConfig {
    fn default() -> Self {
        let affinity_impact = [
            ("affection", 3.0),
            ("gratitude", 2.0),
            ("compliment", 2.0),
            ("joy", 1.5),
            ("curiosity", 1.0),
            ("sadness", 0.5),
            ("boredom", -1.0),
            ("dismissive", -2.0),
            ("frustration", -2.0),
            ("hostile", -4.0),
            ("insult", -5.0),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        Self { affinity_impact }
    }
}
