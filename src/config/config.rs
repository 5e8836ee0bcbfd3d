use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 图存储后端类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// 进程内存储（开发/测试）
    #[default]
    Memory,
    /// SurrealDB 持久化存储
    Surrealdb,
}

/// 数据库配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DatabaseConfig {
    /// 存储后端
    pub backend: StorageBackend,
    /// SurrealDB 连接地址
    pub url: String,
    /// 命名空间
    pub namespace: String,
    /// 数据库名称
    pub database: String,
    /// 用户名
    pub username: String,
    /// 密码
    pub password: String,
}

/// 意图缓存后端类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    #[default]
    Memory,
    Redis,
}

/// 临时持久化存储配置（整合意图）
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CacheConfig {
    pub backend: CacheBackend,
    /// Redis 地址
    pub redis_url: String,
    /// 键前缀
    pub key_prefix: String,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    /// 服务地址
    pub host: String,
    /// 服务端口
    pub port: u16,
    /// 会话结束时等待认知任务退出的时间（毫秒）
    pub task_shutdown_wait_ms: u64,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LoggingConfig {
    /// 日志级别
    pub level: String,
    /// 结构化日志格式（JSON）
    pub structured: bool,
    /// 日志文件目录（按天滚动）
    pub log_dir: Option<PathBuf>,
}

/// 嵌入模型后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    #[default]
    Hashing,
    Ollama,
}

/// 嵌入模型配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub backend: EmbeddingBackend,
    /// 模型名称
    pub model_name: String,
    /// 向量维度
    pub dimension: usize,
    /// Ollama 服务器地址
    pub ollama_url: String,
    /// Ollama 请求超时（秒）
    pub ollama_timeout: u64,
}

/// 推理服务配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct InferenceConfig {
    /// 实时双向流地址（WebSocket）
    pub live_url: String,
    /// 文本推理 REST 地址
    pub rest_url: String,
    pub api_key: String,
    /// 实时模型降级顺序
    pub live_models: Vec<String>,
    /// 文本模型降级顺序（情感分析、自我批评、梦境生成）
    pub text_models: Vec<String>,
    /// 单次文本推理超时（秒）
    pub request_timeout_secs: u64,
    /// 实时流建立连接超时（秒）
    pub connect_timeout_secs: u64,
    /// 输入音频采样率
    pub input_sample_rate: u32,
}

/// 发言权竞拍配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuctionConfig {
    /// 用户优先窗口（毫秒）
    pub priority_window_ms: u64,
    /// 默认出价
    pub default_score: f32,
    /// 优先窗口内仍可出价的倍数阈值（相对默认出价）
    pub priority_override_factor: f32,
    /// 抢占所需的出价倍数
    pub preemption_multiplier: f32,
    /// 触发打断的用户语音能量（RMS，0-1）
    pub barge_in_energy: f32,
}

impl Default for AuctionConfig {
    fn default() -> Self {
        Self {
            priority_window_ms: 500,
            default_score: 1.0,
            priority_override_factor: 10.0,
            preemption_multiplier: 2.0,
            barge_in_energy: 0.08,
        }
    }
}

/// 潜意识分析器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// 触发一次分析所需的片段数
    pub fragment_trigger: usize,
    /// 每个周期的基础电量消耗
    pub base_drain: f32,
    /// 多人格同时在线时的消耗倍数
    pub crowd_multiplier: f32,
    /// 高亲和度时的净恢复量（负消耗）
    pub high_affinity_drain: f32,
    /// 高亲和度阈值
    pub high_affinity_threshold: f32,
    /// 同一记忆重复注入的冷却（秒）
    pub memory_cooldown_secs: u64,
    /// 推理全部失败后的分析冷却（秒）
    pub failure_cooldown_secs: u64,
    /// 低于此字符数的文本跳过情感分析
    pub min_sentiment_chars: usize,
    /// 记忆检索条数
    pub retrieval_k: usize,
    /// 记忆相关度下限
    pub min_relevance: f32,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            fragment_trigger: 5,
            base_drain: 0.8,
            crowd_multiplier: 1.5,
            high_affinity_drain: -0.2,
            high_affinity_threshold: 80.0,
            memory_cooldown_secs: 10,
            failure_cooldown_secs: 30,
            min_sentiment_chars: 12,
            retrieval_k: 3,
            min_relevance: 0.35,
        }
    }
}

/// 自我反思配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CriticConfig {
    pub base_chance: f64,
    pub neuroticism_multiplier: f64,
}

impl Default for CriticConfig {
    fn default() -> Self {
        Self {
            base_chance: 0.05,
            neuroticism_multiplier: 0.2,
        }
    }
}

/// 生理信号阈值
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BioSignalConfig {
    pub high_bpm: f32,
    pub low_bpm: f32,
}

impl Default for BioSignalConfig {
    fn default() -> Self {
        Self {
            high_bpm: 110.0,
            low_bpm: 50.0,
        }
    }
}

/// 认知子系统配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CognitionConfig {
    /// 监督器重启延迟（毫秒）
    pub restart_delay_ms: u64,
    /// 转录队列容量
    pub transcript_queue: usize,
    pub analyzer: AnalyzerConfig,
    pub critic: CriticConfig,
    pub biosignal: BioSignalConfig,
}

impl Default for CognitionConfig {
    fn default() -> Self {
        Self {
            restart_delay_ms: 5000,
            transcript_queue: 256,
            analyzer: AnalyzerConfig::default(),
            critic: CriticConfig::default(),
            biosignal: BioSignalConfig::default(),
        }
    }
}

/// 记忆整合调度配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsolidationConfig {
    /// 断线后的宽限期（秒）
    pub grace_period_secs: u64,
    /// 意图 TTL 相对宽限期的余量（秒）
    pub intent_ttl_margin_secs: u64,
    /// 优雅关闭时的最长等待（秒）
    pub shutdown_wait_secs: u64,
    /// 亲和度 EMA 系数
    pub ema_alpha: f32,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            grace_period_secs: 30,
            intent_ttl_margin_secs: 30,
            shutdown_wait_secs: 10,
            ema_alpha: 0.15,
        }
    }
}

/// 离线时间跳跃模拟配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// 每小时恢复的社交电量
    pub recharge_per_hour: f32,
    /// 亲和度衰减速率（每小时）
    pub decay_rate: f32,
    /// 衰减基线
    pub decay_baseline: f32,
    /// 低于此分钟数不衰减
    pub min_decay_minutes: f64,
    /// 低于此分钟数不生成事件
    pub min_event_minutes: f64,
    /// 每多少分钟生成一个事件
    pub minutes_per_event: f64,
    /// 单次最多生成的事件数
    pub max_events: usize,
    /// 低亲和度阈值（冲突倾向）
    pub conflict_affinity: f32,
    /// 高亲和度阈值（支持倾向）
    pub support_affinity: f32,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            recharge_per_hour: 12.0,
            decay_rate: 0.1,
            decay_baseline: 50.0,
            min_decay_minutes: 60.0,
            min_event_minutes: 30.0,
            minutes_per_event: 180.0,
            max_events: 5,
            conflict_affinity: 30.0,
            support_affinity: 70.0,
        }
    }
}

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub embedding: EmbeddingConfig,
    pub inference: InferenceConfig,
    pub auction: AuctionConfig,
    pub cognition: CognitionConfig,
    pub consolidation: ConsolidationConfig,
    pub simulation: SimulationConfig,
    /// 应用名称
    pub app_name: String,
    /// 环境
    pub environment: String,
}

impl AppConfig {
    /// 创建开发环境配置
    pub fn development() -> Self {
        Self {
            database: DatabaseConfig {
                backend: StorageBackend::Memory,
                url: "ws://localhost:8000".into(),
                namespace: "resonance".into(),
                database: "graph".into(),
                username: "root".into(),
                password: "root".into(),
            },
            cache: CacheConfig {
                backend: CacheBackend::Memory,
                redis_url: "redis://localhost:6379".into(),
                key_prefix: "resonance:consolidation:".into(),
            },
            server: ServerConfig {
                host: "0.0.0.0".into(),
                port: 8080,
                task_shutdown_wait_ms: 2000,
            },
            logging: LoggingConfig {
                level: "debug".into(),
                structured: false,
                log_dir: None,
            },
            embedding: EmbeddingConfig {
                backend: EmbeddingBackend::Hashing,
                model_name: "nomic-embed-text".into(),
                dimension: 256,
                ollama_url: "http://localhost:11434".into(),
                ollama_timeout: 30,
            },
            inference: InferenceConfig {
                live_url: "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent".into(),
                rest_url: "https://generativelanguage.googleapis.com/v1beta".into(),
                api_key: String::new(),
                live_models: vec![
                    "gemini-2.0-flash-live-001".into(),
                    "gemini-2.0-flash-exp".into(),
                ],
                text_models: vec!["gemini-2.0-flash".into(), "gemini-1.5-flash".into()],
                request_timeout_secs: 12,
                connect_timeout_secs: 15,
                input_sample_rate: 16000,
            },
            auction: AuctionConfig::default(),
            cognition: CognitionConfig::default(),
            consolidation: ConsolidationConfig::default(),
            simulation: SimulationConfig::default(),
            app_name: "resonance".into(),
            environment: "development".into(),
        }
    }

    /// 创建生产环境配置
    pub fn production() -> Self {
        let mut config = Self::development();
        config.environment = "production".into();
        config.logging.level = "info".into();
        config.logging.structured = true;
        config.database.backend = StorageBackend::Surrealdb;
        config.cache.backend = CacheBackend::Redis;
        config
    }
}
