//! 人格（Agent）数据模型
//!
//! 社交电量在对话中消耗、离线时恢复；摩擦值随负面互动累积，
//! 达到容忍阈值时人格会表达边界。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::clamp_level;

/// 满电量
pub const FULL_BATTERY: f32 = 100.0;

/// 默认摩擦容忍阈值
pub const DEFAULT_FRICTION_TOLERANCE: f32 = 50.0;

/// 认知权重，仅作为衰减和注入逻辑的输入
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CognitiveWeights {
    pub volatility: f32,
    pub hostility: f32,
    pub curiosity: f32,
    pub empathy: f32,
    /// 神经质程度，决定自我反思频率
    pub neuroticism: f32,
}

impl Default for CognitiveWeights {
    fn default() -> Self {
        Self {
            volatility: 0.5,
            hostility: 0.1,
            curiosity: 0.5,
            empathy: 0.5,
            neuroticism: 0.5,
        }
    }
}

/// 社交电量状态（由电量等级推导）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BatteryState {
    /// 电量耗尽：强制沉默
    #[serde(rename = "depleted")]
    Depleted,
    /// 极度疲惫：简短模式
    #[serde(rename = "exhausted")]
    Exhausted,
    /// 疲惫：准备结束对话
    #[serde(rename = "tired")]
    Tired,
    #[serde(rename = "normal")]
    Normal,
}

impl BatteryState {
    pub fn from_level(level: f32) -> Self {
        if level <= 0.0 {
            BatteryState::Depleted
        } else if level < 15.0 {
            BatteryState::Exhausted
        } else if level < 30.0 {
            BatteryState::Tired
        } else {
            BatteryState::Normal
        }
    }
}

impl std::fmt::Display for BatteryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BatteryState::Depleted => write!(f, "depleted"),
            BatteryState::Exhausted => write!(f, "exhausted"),
            BatteryState::Tired => write!(f, "tired"),
            BatteryState::Normal => write!(f, "normal"),
        }
    }
}

/// 人格
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Persona {
    /// 人格唯一标识
    pub id: String,

    /// 显示名称
    pub name: String,

    /// 行为描述
    pub description: String,

    /// 社交电量 (0-100)
    pub social_battery: f32,

    /// 电量消耗倍数
    #[serde(default = "default_multiplier")]
    pub drain_multiplier: f32,

    /// 摩擦计数 (0-100)
    #[serde(default)]
    pub friction: f32,

    /// 摩擦容忍阈值
    #[serde(default = "default_tolerance")]
    pub friction_tolerance: f32,

    /// 认知权重
    #[serde(default)]
    pub weights: CognitiveWeights,

    /// 人格专属的亲和度影响表（关键词 -> 增量），优先于全局表
    #[serde(default)]
    pub affinity_impact: HashMap<String, f32>,

    /// 自定义自我反思提示模板
    #[serde(default)]
    pub reflection_prompt: Option<String>,

    /// 更新时间
    pub updated_at: DateTime<Utc>,
}

fn default_multiplier() -> f32 {
    1.0
}

fn default_tolerance() -> f32 {
    DEFAULT_FRICTION_TOLERANCE
}

impl Persona {
    /// 创建满电量、无摩擦的人格
    pub fn new(id: &str, name: &str, description: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            social_battery: FULL_BATTERY,
            drain_multiplier: 1.0,
            friction: 0.0,
            friction_tolerance: DEFAULT_FRICTION_TOLERANCE,
            weights: CognitiveWeights::default(),
            affinity_impact: HashMap::new(),
            reflection_prompt: None,
            updated_at: Utc::now(),
        }
    }

    /// 设置电量（写入时限制范围）
    pub fn set_battery(&mut self, level: f32) -> f32 {
        self.social_battery = clamp_level(level);
        self.updated_at = Utc::now();
        self.social_battery
    }

    /// 调整摩擦（写入时限制范围）
    pub fn adjust_friction(&mut self, delta: f32) -> f32 {
        self.friction = clamp_level(self.friction + delta);
        self.updated_at = Utc::now();
        self.friction
    }

    pub fn battery_state(&self) -> BatteryState {
        BatteryState::from_level(self.social_battery)
    }

    /// 摩擦是否已超出容忍
    pub fn is_overloaded(&self) -> bool {
        self.friction >= self.friction_tolerance
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_battery_writes_are_clamped() {
        let mut persona = Persona::new("p1", "Nova", "curious");
        assert_eq!(persona.set_battery(140.0), 100.0);
        assert_eq!(persona.set_battery(-3.0), 0.0);
    }

    #[test]
    fn test_friction_is_clamped() {
        let mut persona = Persona::new("p1", "Nova", "curious");
        persona.adjust_friction(-10.0);
        assert_eq!(persona.friction, 0.0);
        persona.adjust_friction(60.0);
        assert!(persona.is_overloaded());
        persona.adjust_friction(500.0);
        assert_eq!(persona.friction, 100.0);
    }

    #[test]
    fn test_battery_state_thresholds() {
        assert_eq!(BatteryState::from_level(0.0), BatteryState::Depleted);
        assert_eq!(BatteryState::from_level(14.9), BatteryState::Exhausted);
        assert_eq!(BatteryState::from_level(15.0), BatteryState::Tired);
        assert_eq!(BatteryState::from_level(29.9), BatteryState::Tired);
        assert_eq!(BatteryState::from_level(30.0), BatteryState::Normal);
        assert!(BatteryState::Depleted < BatteryState::Tired);
    }
}
