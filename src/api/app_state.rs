use std::sync::Arc;

use crate::cognition::BioSignalMonitor;
use crate::session::{SessionDeps, SessionOrchestrator};
use crate::storage::GraphRepository;

/// 路由共享状态
#[derive(Clone)]
pub struct AppState {
    /// 会话编排器
    pub sessions: Arc<SessionOrchestrator>,
    /// 生理信号接入
    pub biosignal: Arc<BioSignalMonitor>,
    /// 图存储
    pub repo: Arc<dyn GraphRepository>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("sessions", &"Arc<SessionOrchestrator>")
            .field("biosignal", &"Arc<BioSignalMonitor>")
            .field("repo", &"Arc<dyn GraphRepository>")
            .finish()
    }
}

impl AppState {
    pub fn new(deps: SessionDeps) -> Self {
        Self {
            biosignal: deps.biosignal.clone(),
            repo: deps.repo.clone(),
            sessions: Arc::new(SessionOrchestrator::new(deps)),
        }
    }
}
