//! 系统提示队列
//!
//! 认知子系统产生的提示经由无界通道汇入注入任务，再以系统文本写入实时流。

use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tracing::debug;

use crate::error::Result;
use crate::inference::LiveInput;
use crate::observability::AppMetrics;

/// 提示来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HintSource {
    Battery,
    Memory,
    Glitch,
    Sentiment,
    Friction,
    Reflection,
    BioSignal,
    TimeSkip,
}

impl std::fmt::Display for HintSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            HintSource::Battery => "battery",
            HintSource::Memory => "memory",
            HintSource::Glitch => "glitch",
            HintSource::Sentiment => "sentiment",
            HintSource::Friction => "friction",
            HintSource::Reflection => "reflection",
            HintSource::BioSignal => "biosignal",
            HintSource::TimeSkip => "time_skip",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Hint {
    pub source: HintSource,
    pub text: String,
}

impl Hint {
    pub fn new(source: HintSource, text: impl Into<String>) -> Self {
        Self {
            source,
            text: text.into(),
        }
    }
}

pub type HintSender = mpsc::UnboundedSender<Hint>;

/// 提示队列的接收端
///
/// 接收端放在锁后面，注入任务被监督器重启后仍然读同一个队列。
#[derive(Clone)]
pub struct HintQueue {
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<Hint>>>,
}

impl HintQueue {
    pub fn new() -> (HintSender, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            tx,
            Self {
                receiver: Arc::new(Mutex::new(rx)),
            },
        )
    }

    pub async fn recv(&self) -> Option<Hint> {
        self.receiver.lock().await.recv().await
    }

    /// 非阻塞读取；注入任务正持有接收端时返回 None
    pub fn try_recv(&self) -> Option<Hint> {
        self.receiver.try_lock().ok()?.try_recv().ok()
    }

    /// 注入任务：把提示转发到实时流，直到任一端关闭
    pub async fn forward_to(&self, live: mpsc::Sender<LiveInput>, metrics: Arc<AppMetrics>) -> Result<()> {
        let mut receiver = self.receiver.lock().await;
        while let Some(hint) = receiver.recv().await {
            debug!(source = %hint.source, "Injecting hint");
            if live.send(LiveInput::Hint(hint.text)).await.is_err() {
                break;
            }
            metrics.record_hint();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_forward_counts_and_wraps_hints() {
        let (tx, queue) = HintQueue::new();
        let (live_tx, mut live_rx) = mpsc::channel(8);
        let metrics = Arc::new(AppMetrics::default());

        tx.send(Hint::new(HintSource::Battery, "keep it short")).unwrap();
        drop(tx);

        queue.forward_to(live_tx, metrics.clone()).await.unwrap();
        assert_eq!(live_rx.recv().await, Some(LiveInput::Hint("keep it short".into())));
        assert!(metrics.gather().contains("hints_injected_total 1"));
    }
}
