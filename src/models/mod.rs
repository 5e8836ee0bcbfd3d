//! 核心数据模型模块
//!
//! 定义关系图谱的核心数据结构：User, Persona, ResonanceEdge,
//! MemoryEpisode, Dream, CollectiveEvent 以及通用图边 GraphEdge。

pub mod edge;
pub mod episode;
pub mod event;
pub mod persona;
pub mod resonance;
pub mod system;
pub mod user;

pub use edge::*;
pub use episode::*;
pub use event::*;
pub use persona::*;
pub use resonance::*;
pub use system::*;
pub use user::*;

/// 所有“等级”类字段（亲和度、电量、摩擦）的下限
pub const LEVEL_MIN: f32 = 0.0;

/// 所有“等级”类字段的上限
pub const LEVEL_MAX: f32 = 100.0;

/// 将等级值限制在 [0, 100]，NaN 视为下限
pub fn clamp_level(value: f32) -> f32 {
    if value.is_nan() {
        return LEVEL_MIN;
    }
    value.clamp(LEVEL_MIN, LEVEL_MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_level() {
        assert_eq!(clamp_level(-5.0), 0.0);
        assert_eq!(clamp_level(150.0), 100.0);
        assert_eq!(clamp_level(42.5), 42.5);
        assert_eq!(clamp_level(f32::NAN), 0.0);
    }
}
