//! 生理信号（心率）接入
//!
//! 每个实时会话在这里登记自己的提示发送端；采样越过高/低阈值时，
//! 对该用户的所有在线会话注入提示。

use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use crate::cognition::hints::{Hint, HintSender, HintSource};
use crate::config::config::BioSignalConfig;

pub struct BioSignalMonitor {
    config: BioSignalConfig,
    sessions: DashMap<String, Vec<(u64, HintSender)>>,
    next_id: AtomicU64,
}

impl BioSignalMonitor {
    pub fn new(config: BioSignalConfig) -> Self {
        Self {
            config,
            sessions: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// 登记会话；guard 丢弃时注销
    pub fn register(self: &Arc<Self>, user_id: &str, hints: HintSender) -> BioSignalRegistration {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.sessions
            .entry(user_id.to_string())
            .or_default()
            .push((id, hints));
        BioSignalRegistration {
            monitor: Arc::clone(self),
            user_id: user_id.to_string(),
            id,
        }
    }

    /// 把采样翻译为提示文本；正常范围内返回 None
    pub fn interpret(&self, bpm: f32) -> Option<String> {
        if !bpm.is_finite() {
            return None;
        }
        if bpm > self.config.high_bpm {
            Some(format!(
                "The user's heart rate is elevated ({:.0} bpm). They may be stressed or excited; slow down and check in gently.",
                bpm
            ))
        } else if bpm < self.config.low_bpm {
            Some(format!(
                "The user's heart rate is very low ({:.0} bpm). They may be drowsy or withdrawn; keep your energy soft.",
                bpm
            ))
        } else {
            None
        }
    }

    /// 处理一个采样，返回是否产生了提示
    pub fn ingest(&self, user_id: &str, bpm: f32) -> bool {
        let Some(text) = self.interpret(bpm) else {
            return false;
        };

        let mut delivered = 0;
        if let Some(mut senders) = self.sessions.get_mut(user_id) {
            senders.retain(|(_, tx)| {
                let ok = tx.send(Hint::new(HintSource::BioSignal, text.clone())).is_ok();
                delivered += usize::from(ok);
                ok
            });
        }
        debug!(user_id, bpm, delivered, "Bio-signal hint produced");
        true
    }

    fn unregister(&self, user_id: &str, id: u64) {
        if let Some(mut senders) = self.sessions.get_mut(user_id) {
            senders.retain(|(sid, _)| *sid != id);
        }
        self.sessions.remove_if(user_id, |_, senders| senders.is_empty());
    }
}

pub struct BioSignalRegistration {
    monitor: Arc<BioSignalMonitor>,
    user_id: String,
    id: u64,
}

impl Drop for BioSignalRegistration {
    fn drop(&mut self) {
        self.monitor.unregister(&self.user_id, self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cognition::hints::HintQueue;
    use rstest::rstest;

    #[rstest]
    #[case(72.0, false)]
    #[case(130.0, true)]
    #[case(40.0, true)]
    #[case(f32::NAN, false)]
    fn test_interpret_thresholds(#[case] bpm: f32, #[case] produces: bool) {
        let monitor = BioSignalMonitor::new(BioSignalConfig::default());
        assert_eq!(monitor.interpret(bpm).is_some(), produces);
    }

    #[tokio::test]
    async fn test_ingest_reaches_every_live_session() {
        let monitor = Arc::new(BioSignalMonitor::new(BioSignalConfig::default()));
        let (tx1, q1) = HintQueue::new();
        let (tx2, q2) = HintQueue::new();
        let _r1 = monitor.register("u1", tx1);
        let r2 = monitor.register("u1", tx2);

        assert!(monitor.ingest("u1", 140.0));
        assert_eq!(q1.recv().await.unwrap().source, HintSource::BioSignal);
        assert_eq!(q2.recv().await.unwrap().source, HintSource::BioSignal);

        drop(r2);
        assert_eq!(monitor.sessions.get("u1").map(|s| s.len()), Some(1));
        assert!(!monitor.ingest("u1", 80.0));
    }
}
