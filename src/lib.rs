//! Resonance - 实时陪伴人格引擎
//!
//! 每个连接桥接到外部实时推理流，后台认知子系统（发言权竞拍、潜意识分析、
//! 自我反思）在不阻塞音频路径的前提下协同运行；持久化的关系图谱在会话之间演化。

pub mod api;
pub mod cache;
pub mod cognition;
pub mod config;
pub mod consolidation;
pub mod error;
pub mod index;
pub mod inference;
pub mod migration;
pub mod models;
pub mod observability;
pub mod session;
pub mod simulation;
pub mod storage;
pub mod websocket;
