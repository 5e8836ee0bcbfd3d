//! 潜意识分析器
//!
//! 消费实时转录片段。每攒够一批（或遇到句末标点）执行一个周期：
//! 电量消耗 → 情感分析与记忆检索并发 → 记忆/故障提示 → 亲和度与摩擦 → 清空缓冲。

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::cognition::SharedReceiver;
use crate::cognition::hints::{Hint, HintSender, HintSource};
use crate::cognition::presence::ActivePersonas;
use crate::config::config::AnalyzerConfig;
use crate::error::Result;
use crate::inference::ModelWaterfall;
use crate::models::{BatteryState, MemoryKind, Persona, ScoredMemory};
use crate::storage::GraphRepository;

const SENTENCE_TERMINALS: [char; 6] = ['.', '!', '?', '。', '！', '？'];

const SENTIMENT_LABELS: &str = "affection, gratitude, compliment, joy, curiosity, sadness, \
boredom, dismissive, frustration, hostile, insult, neutral";

/// 情感分析结果
#[derive(Debug, Clone, PartialEq)]
pub struct Sentiment {
    pub label: String,
    pub hint: String,
}

/// 一个分析周期的结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleOutcome {
    pub battery_level: Option<f32>,
    pub memory_injected: Option<String>,
    pub glitch: bool,
    pub sentiment: Option<String>,
    pub affinity_delta: Option<f32>,
}

#[derive(Default)]
struct AnalyzerState {
    buffer: Vec<String>,
    last_battery: Option<BatteryState>,
    injected_at: HashMap<String, Instant>,
    mood: f32,
    inference_paused_until: Option<Instant>,
    friction_crossed: bool,
}

pub struct SubconsciousAnalyzer {
    user_id: String,
    persona_id: String,
    repo: Arc<dyn GraphRepository>,
    waterfall: Arc<ModelWaterfall>,
    hints: HintSender,
    presence: Arc<ActivePersonas>,
    config: AnalyzerConfig,
    state: Mutex<AnalyzerState>,
}

impl SubconsciousAnalyzer {
    pub fn new(
        user_id: &str,
        persona_id: &str,
        repo: Arc<dyn GraphRepository>,
        waterfall: Arc<ModelWaterfall>,
        hints: HintSender,
        presence: Arc<ActivePersonas>,
        config: AnalyzerConfig,
    ) -> Self {
        Self {
            user_id: user_id.to_string(),
            persona_id: persona_id.to_string(),
            repo,
            waterfall,
            hints,
            presence,
            config,
            state: Mutex::new(AnalyzerState::default()),
        }
    }

    /// 会话情绪 [-1, 1]，作为整段会话情景的效价
    pub fn mood(&self) -> f32 {
        self.state.lock().mood
    }

    /// 追加片段；达到触发条件时取出并清空缓冲，返回拼接后的文本
    pub fn push_fragment(&self, fragment: &str) -> Option<String> {
        let fragment = fragment.trim();
        if fragment.is_empty() {
            return None;
        }
        let mut state = self.state.lock();
        state.buffer.push(fragment.to_string());

        let terminal = fragment.ends_with(SENTENCE_TERMINALS);
        if state.buffer.len() >= self.config.fragment_trigger || terminal {
            Some(std::mem::take(&mut state.buffer).join(" "))
        } else {
            None
        }
    }

    /// 分析任务主循环；转录通道关闭时返回
    pub async fn run(self: Arc<Self>, transcripts: SharedReceiver<String>) -> Result<()> {
        while let Some(fragment) = transcripts.recv().await {
            if let Some(text) = self.push_fragment(&fragment) {
                let outcome = self.process_cycle(&text).await?;
                debug!(
                    user_id = %self.user_id,
                    persona_id = %self.persona_id,
                    battery = ?outcome.battery_level,
                    sentiment = ?outcome.sentiment,
                    glitch = outcome.glitch,
                    "Subconscious cycle complete"
                );
            }
        }
        Ok(())
    }

    pub async fn process_cycle(&self, text: &str) -> Result<CycleOutcome> {
        let mut outcome = CycleOutcome::default();

        let persona = match self.drain_battery().await {
            Ok(Some((persona, level))) => {
                outcome.battery_level = Some(level);
                Some(persona)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(persona_id = %self.persona_id, error = %e, "Battery update failed");
                None
            }
        };

        let (sentiment, retrieval) = tokio::join!(
            self.classify(text),
            self.repo.search_memories(
                &self.user_id,
                text,
                &MemoryKind::RETRIEVABLE,
                self.config.retrieval_k,
            )
        );

        match retrieval {
            Ok(hits) => {
                if let Some(memory) = self.pick_memory(&hits) {
                    self.emit(HintSource::Memory, format!("A memory surfaces: {}", memory.text));
                    outcome.memory_injected = Some(memory.id.clone());
                }
            }
            Err(e) => {
                warn!(user_id = %self.user_id, error = %e, "Memory retrieval failed");
                self.emit(
                    HintSource::Glitch,
                    "Your memory just skipped like a scratched record. You feel briefly disoriented; \
                     acknowledge that something slipped instead of pretending to remember.",
                );
                outcome.glitch = true;
            }
        }

        match sentiment {
            Ok(Some(sentiment)) => {
                if !sentiment.hint.is_empty() {
                    self.emit(HintSource::Sentiment, sentiment.hint.clone());
                }
                outcome.affinity_delta = self.apply_sentiment(&sentiment.label, persona.as_ref()).await?;
                outcome.sentiment = Some(sentiment.label);
            }
            Ok(None) => {}
            Err(e) => {
                let pause = Duration::from_secs(self.config.failure_cooldown_secs);
                self.state.lock().inference_paused_until = Some(Instant::now() + pause);
                debug!(error = %e, pause_secs = pause.as_secs(), "Sentiment inference unavailable, pausing");
            }
        }

        Ok(outcome)
    }

    /// 本周期的电量消耗
    pub fn drain_amount(&self, persona: &Persona, affinity: f32, active_personas: usize) -> f32 {
        if affinity >= self.config.high_affinity_threshold {
            return self.config.high_affinity_drain;
        }
        let crowd = if active_personas > 2 {
            self.config.crowd_multiplier
        } else {
            1.0
        };
        self.config.base_drain * persona.drain_multiplier * crowd
    }

    async fn drain_battery(&self) -> Result<Option<(Persona, f32)>> {
        let Some(mut persona) = self.repo.get_persona(&self.persona_id).await? else {
            return Ok(None);
        };
        let affinity = self
            .repo
            .get_resonance(&self.user_id, &self.persona_id)
            .await?
            .affinity;
        let drain = self.drain_amount(&persona, affinity, self.presence.count(&self.user_id));
        let level = self
            .repo
            .update_battery(&self.persona_id, persona.social_battery - drain)
            .await?;

        let current = BatteryState::from_level(level);
        let previous = {
            let mut state = self.state.lock();
            state
                .last_battery
                .replace(current)
                .unwrap_or_else(|| persona.battery_state())
        };
        if current < previous {
            if let Some(text) = battery_hint(current) {
                self.emit(HintSource::Battery, text);
            }
        }

        persona.social_battery = level;
        Ok(Some((persona, level)))
    }

    async fn classify(&self, text: &str) -> Result<Option<Sentiment>> {
        if text.chars().count() < self.config.min_sentiment_chars {
            return Ok(None);
        }
        let paused = self
            .state
            .lock()
            .inference_paused_until
            .is_some_and(|until| Instant::now() < until);
        if paused {
            return Ok(None);
        }

        let prompt = format!(
            "Classify the emotional tone of what the user just said to their companion.\n\
             Reply as `label: one short sentence of guidance for the companion`, where label is one of: {}.\n\
             User: \"{}\"",
            SENTIMENT_LABELS, text
        );
        let reply = self.waterfall.generate(&prompt).await?;
        Ok(parse_sentiment(&reply))
    }

    fn pick_memory<'a>(&self, hits: &'a [ScoredMemory]) -> Option<&'a ScoredMemory> {
        let cooldown = Duration::from_secs(self.config.memory_cooldown_secs);
        let mut state = self.state.lock();
        let now = Instant::now();
        state.injected_at.retain(|_, at| now.duration_since(*at) < cooldown);

        let chosen = hits
            .iter()
            .filter(|m| m.score >= self.config.min_relevance)
            .find(|m| !state.injected_at.contains_key(&m.id))?;
        state.injected_at.insert(chosen.id.clone(), now);
        Some(chosen)
    }

    async fn apply_sentiment(&self, label: &str, persona: Option<&Persona>) -> Result<Option<f32>> {
        let system = self.repo.get_system_config().await?;
        let Some(delta) = lookup_delta(
            label,
            persona.map(|p| &p.affinity_impact),
            &system.affinity_impact,
        ) else {
            return Ok(None);
        };

        self.repo
            .update_resonance(&self.user_id, &self.persona_id, delta)
            .await?;
        {
            let mut state = self.state.lock();
            state.mood = (state.mood + delta / 10.0).clamp(-1.0, 1.0);
        }

        if let Some(persona) = persona {
            let friction = self.repo.adjust_friction(&persona.id, -delta).await?;
            let over = friction >= persona.friction_tolerance;
            let newly_crossed = {
                let mut state = self.state.lock();
                let crossed = over && !state.friction_crossed;
                state.friction_crossed = over;
                crossed
            };
            if newly_crossed {
                self.emit(
                    HintSource::Friction,
                    "You have reached the limit of what you will tolerate in this conversation. \
                     Calmly set a boundary before continuing.",
                );
            }
        }

        Ok(Some(delta))
    }

    fn emit(&self, source: HintSource, text: impl Into<String>) {
        let _ = self.hints.send(Hint::new(source, text));
    }
}

fn battery_hint(state: BatteryState) -> Option<&'static str> {
    match state {
        BatteryState::Depleted => Some(
            "Your social battery is empty. Fall silent; answer only with the briefest acknowledgement.",
        ),
        BatteryState::Exhausted => {
            Some("You are exhausted. Keep every reply terse, a sentence at most.")
        }
        BatteryState::Tired => {
            Some("You are getting tired. Start steering the conversation toward a gentle wrap-up.")
        }
        BatteryState::Normal => None,
    }
}

/// 解析 `label: hint`；中性或空标签返回 None
pub(crate) fn parse_sentiment(reply: &str) -> Option<Sentiment> {
    let line = reply.lines().map(str::trim).find(|l| !l.is_empty())?;
    let (label, hint) = line.split_once(':').unwrap_or((line, ""));
    let label = label
        .trim()
        .trim_matches(|c: char| !c.is_alphanumeric())
        .to_lowercase();
    if label.is_empty() || label == "neutral" {
        return None;
    }
    Some(Sentiment {
        label,
        hint: hint.trim().to_string(),
    })
}

/// 按关键词查表；人格表优先于全局表，同表内按关键词字典序取第一个匹配
pub(crate) fn lookup_delta(
    label: &str,
    persona_table: Option<&HashMap<String, f32>>,
    global_table: &HashMap<String, f32>,
) -> Option<f32> {
    let first_match = |table: &HashMap<String, f32>| {
        let mut keys: Vec<&String> = table.keys().collect();
        keys.sort();
        keys.into_iter()
            .find(|k| label.contains(k.as_str()))
            .and_then(|k| table.get(k).copied())
    };
    persona_table
        .and_then(first_match)
        .or_else(|| first_match(global_table))
}
