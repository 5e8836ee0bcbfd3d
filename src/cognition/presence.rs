//! 在线人格登记
//!
//! 记录每个用户当前正在会话中的人格，供分析器判断“多人格同时在线”。

use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Default)]
pub struct ActivePersonas {
    by_user: DashMap<String, HashMap<String, usize>>,
}

impl ActivePersonas {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记一个人格进入会话；返回的 guard 被丢弃时自动注销
    pub fn enter(self: &Arc<Self>, user_id: &str, persona_id: &str) -> PresenceGuard {
        *self
            .by_user
            .entry(user_id.to_string())
            .or_default()
            .entry(persona_id.to_string())
            .or_insert(0) += 1;

        PresenceGuard {
            registry: Arc::clone(self),
            user_id: user_id.to_string(),
            persona_id: persona_id.to_string(),
        }
    }

    /// 用户当前在线的不同人格数
    pub fn count(&self, user_id: &str) -> usize {
        self.by_user.get(user_id).map(|m| m.len()).unwrap_or(0)
    }

    fn leave(&self, user_id: &str, persona_id: &str) {
        if let Some(mut personas) = self.by_user.get_mut(user_id) {
            if let Some(n) = personas.get_mut(persona_id) {
                *n -= 1;
                if *n == 0 {
                    personas.remove(persona_id);
                }
            }
        }
        self.by_user.remove_if(user_id, |_, personas| personas.is_empty());
    }
}

pub struct PresenceGuard {
    registry: Arc<ActivePersonas>,
    user_id: String,
    persona_id: String,
}

impl Drop for PresenceGuard {
    fn drop(&mut self) {
        self.registry.leave(&self.user_id, &self.persona_id);
    }
}
