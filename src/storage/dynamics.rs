//! 图状态动力学：整合、EMA 与衰减的纯函数

use std::collections::BTreeSet;

use crate::models::{DreamDraft, MemoryEpisode, clamp_level};

/// 图存储的可调参数
#[derive(Debug, Clone)]
pub struct GraphSettings {
    /// 整合时亲和度 EMA 系数
    pub ema_alpha: f32,
}

impl Default for GraphSettings {
    fn default() -> Self {
        Self { ema_alpha: 0.15 }
    }
}

/// 一批未消费情景的平均效价
pub fn mean_valence(episodes: &[MemoryEpisode]) -> Option<f32> {
    let values: Vec<f32> = episodes
        .iter()
        .filter(|e| !e.is_consumed())
        .map(|e| e.valence)
        .collect();
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f32>() / values.len() as f32)
}

/// 平均效价映射到目标亲和度：50 + mean × 50
pub fn target_affinity(mean_valence: f32) -> f32 {
    clamp_level(50.0 + mean_valence * 50.0)
}

/// 指数移动平均：target × α + old × (1 − α)
pub fn ema(old: f32, target: f32, alpha: f32) -> f32 {
    clamp_level(target * alpha + old * (1.0 - alpha))
}

/// 向基线指数衰减：baseline + (old − baseline) × e^(−rate × hours)
pub fn decay_toward(old: f32, baseline: f32, rate: f32, hours: f32) -> f32 {
    clamp_level(baseline + (old - baseline) * (-rate * hours).exp())
}

/// 整合计划
#[derive(Debug, Clone, PartialEq)]
pub struct ConsolidationPlan {
    pub episode_ids: Vec<String>,
    pub mean_valence: f32,
    pub target: f32,
    /// 涉及的人格（去重、有序）
    pub persona_ids: Vec<String>,
}

/// 从一批情景得出整合计划；已消费的情景被排除，全部排除时返回 None
pub fn plan_consolidation(episodes: &[MemoryEpisode]) -> Option<ConsolidationPlan> {
    let batch: Vec<&MemoryEpisode> = episodes.iter().filter(|e| !e.is_consumed()).collect();
    if batch.is_empty() {
        return None;
    }

    let mean = batch.iter().map(|e| e.valence).sum::<f32>() / batch.len() as f32;
    let persona_ids: BTreeSet<String> = batch
        .iter()
        .filter_map(|e| e.persona_id.clone())
        .collect();

    Some(ConsolidationPlan {
        episode_ids: batch.iter().map(|e| e.id.clone()).collect(),
        mean_valence: mean,
        target: target_affinity(mean),
        persona_ids: persona_ids.into_iter().collect(),
    })
}

/// 没有外部生成器（或生成失败）时的本地梦境
pub fn fallback_dream(episodes: &[MemoryEpisode]) -> DreamDraft {
    let mean = mean_valence(episodes).unwrap_or(0.0);
    let seed = episodes
        .iter()
        .find(|e| !e.summary.is_empty())
        .map(|e| e.summary.split_whitespace().take(6).collect::<Vec<_>>().join(" "))
        .unwrap_or_else(|| "a quiet, half-remembered day".to_string());

    let mood = if mean > 0.25 {
        "warm"
    } else if mean < -0.25 {
        "uneasy"
    } else {
        "drifting"
    };

    DreamDraft {
        theme: format!("{} echoes of {}", mood, seed),
        intensity: mean.abs().clamp(0.1, 1.0),
        surrealism: (0.3 + 0.05 * episodes.len() as f32).min(1.0),
    }
}
