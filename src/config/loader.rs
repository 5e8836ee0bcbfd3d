use crate::config::config::AppConfig;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use std::path::PathBuf;

/// 配置加载器
pub struct ConfigLoader;

impl ConfigLoader {
    /// 从默认路径加载配置
    ///
    /// 合并顺序：
    /// 1. 开发环境默认值
    /// 2. ./config.toml（或 RESONANCE_CONFIG 指定的路径）
    /// 3. RESONANCE_ 前缀的环境变量（`__` 分隔层级）
    pub fn load() -> Result<AppConfig, figment::Error> {
        let path = std::env::var("RESONANCE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_config_path());
        Self::load_from(path)
    }

    /// 从指定路径加载配置
    pub fn load_from(path: PathBuf) -> Result<AppConfig, figment::Error> {
        Self::figment(path).extract()
    }

    fn figment(path: PathBuf) -> Figment {
        Figment::from(Serialized::defaults(AppConfig::development()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("RESONANCE_").split("__"))
    }

    /// 验证配置
    pub fn validate(config: &AppConfig) -> Result<(), ConfigValidationError> {
        if config.server.port == 0 {
            return Err(ConfigValidationError::InvalidPort);
        }

        if config.embedding.dimension == 0 {
            return Err(ConfigValidationError::InvalidDimension);
        }

        if config.inference.live_models.is_empty() || config.inference.text_models.is_empty() {
            return Err(ConfigValidationError::EmptyModelWaterfall);
        }

        let alpha = config.consolidation.ema_alpha;
        if !(alpha > 0.0 && alpha <= 1.0) {
            return Err(ConfigValidationError::InvalidEmaAlpha(alpha));
        }

        if config.consolidation.shutdown_wait_secs == 0 {
            return Err(ConfigValidationError::InvalidShutdownWait);
        }

        Ok(())
    }
}

/// 配置验证错误
#[derive(thiserror::Error, Debug)]
pub enum ConfigValidationError {
    #[error("服务端口无效，必须大于 0")]
    InvalidPort,

    #[error("向量维度无效，必须大于 0")]
    InvalidDimension,

    #[error("模型降级列表不能为空")]
    EmptyModelWaterfall,

    #[error("EMA 系数必须位于 (0, 1]: {0}")]
    InvalidEmaAlpha(f32),

    #[error("关闭等待时间必须大于 0")]
    InvalidShutdownWait,
}

/// 获取默认配置文件路径
pub fn default_config_path() -> PathBuf {
    PathBuf::from("config.toml")
}
