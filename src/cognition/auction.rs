//! 发言权竞拍
//!
//! 进程内唯一的仲裁者，决定任一时刻哪个人格可以输出音频。
//! 出价比较在读锁下完成（允许竞争），空闲槽位的获取由互斥锁串行化。
//! 该实现不保证无饥饿。

use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use crate::config::config::AuctionConfig;

#[derive(Debug, Clone, PartialEq)]
struct Holder {
    persona_id: String,
    score: f32,
}

pub struct TurnAuction {
    config: AuctionConfig,
    holder: RwLock<Option<Holder>>,
    acquire: Mutex<()>,
    epoch: Instant,
    /// 最近一次用户语音距 epoch 的微秒数，0 表示从未
    last_user_activity_us: AtomicU64,
}

impl TurnAuction {
    pub fn new(config: AuctionConfig) -> Self {
        Self {
            config,
            holder: RwLock::new(None),
            acquire: Mutex::new(()),
            epoch: Instant::now(),
            last_user_activity_us: AtomicU64::new(0),
        }
    }

    pub fn default_score(&self) -> f32 {
        self.config.default_score
    }

    /// 为人格出价，返回是否获得（或保持）发言权
    ///
    /// 失败不是错误，调用方应静默放弃当前输出回合。
    pub fn bid(&self, persona_id: &str, score: f32) -> bool {
        if self.user_spoke_recently()
            && score < self.config.default_score * self.config.priority_override_factor
        {
            trace!(persona_id, score, "Bid rejected inside user priority window");
            return false;
        }

        let incumbent = self.holder.read().clone();
        match incumbent {
            Some(h) if h.persona_id == persona_id => true,
            Some(h) => {
                if score > h.score * self.config.preemption_multiplier {
                    let mut holder = self.holder.write();
                    *holder = Some(Holder {
                        persona_id: persona_id.to_string(),
                        score,
                    });
                    debug!(persona_id, preempted = %h.persona_id, score, "Turn pre-empted");
                    true
                } else {
                    false
                }
            }
            None => {
                let _acquire = self.acquire.lock();
                let mut holder = self.holder.write();
                match holder.as_ref() {
                    None => {
                        *holder = Some(Holder {
                            persona_id: persona_id.to_string(),
                            score,
                        });
                        true
                    }
                    Some(h) => h.persona_id == persona_id,
                }
            }
        }
    }

    /// 仅当仍由该人格持有时清空槽位
    pub fn release(&self, persona_id: &str) {
        let mut holder = self.holder.write();
        if holder.as_ref().is_some_and(|h| h.persona_id == persona_id) {
            *holder = None;
        }
    }

    /// 用户插话：记录活动时间并立即清空槽位
    pub fn interrupt(&self) -> Option<String> {
        self.mark_user_activity();
        let previous = self.holder.write().take().map(|h| h.persona_id);
        if let Some(persona_id) = &previous {
            debug!(persona_id = %persona_id, "Barge-in cleared turn holder");
        }
        previous
    }

    pub fn holder(&self) -> Option<String> {
        self.holder.read().as_ref().map(|h| h.persona_id.clone())
    }

    pub fn user_spoke_recently(&self) -> bool {
        let last = self.last_user_activity_us.load(Ordering::SeqCst);
        if last == 0 {
            return false;
        }
        let now = self.epoch.elapsed().as_micros() as u64;
        now.saturating_sub(last) < self.priority_window().as_micros() as u64
    }

    fn mark_user_activity(&self) {
        let now = (self.epoch.elapsed().as_micros() as u64).max(1);
        self.last_user_activity_us.store(now, Ordering::SeqCst);
    }

    fn priority_window(&self) -> Duration {
        Duration::from_millis(self.config.priority_window_ms)
    }
}

/// 16 位小端 PCM 的 RMS 能量，归一化到 [0, 1]
pub fn pcm_rms(pcm: &[u8]) -> f32 {
    let samples = pcm.len() / 2;
    if samples == 0 {
        return 0.0;
    }
    let sum: f64 = pcm
        .chunks_exact(2)
        .map(|c| {
            let s = f64::from(i16::from_le_bytes([c[0], c[1]])) / f64::from(i16::MAX);
            s * s
        })
        .sum();
    (sum / samples as f64).sqrt() as f32
}
