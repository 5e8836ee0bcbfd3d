//! 认知子系统
//!
//! 发言权竞拍、监督器、潜意识分析、自我反思、生理信号与提示队列。

pub mod auction;
pub mod biosignal;
pub mod hints;
pub mod presence;
pub mod reflection;
pub mod subconscious;
pub mod supervisor;

use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};

pub use auction::TurnAuction;
pub use biosignal::BioSignalMonitor;
pub use hints::{Hint, HintQueue, HintSender, HintSource};
pub use presence::ActivePersonas;
pub use reflection::ReflectionCritic;
pub use subconscious::SubconsciousAnalyzer;
pub use supervisor::CognitiveSupervisor;

/// 可在任务重启之间共享的接收端
pub struct SharedReceiver<T> {
    inner: Arc<Mutex<mpsc::Receiver<T>>>,
}

impl<T> Clone for SharedReceiver<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> SharedReceiver<T> {
    pub fn new(receiver: mpsc::Receiver<T>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(receiver)),
        }
    }

    pub async fn recv(&self) -> Option<T> {
        self.inner.lock().await.recv().await
    }
}
