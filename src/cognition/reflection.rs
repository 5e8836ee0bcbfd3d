//! 自我反思
//!
//! 读取人格自己说出的话，按概率进行一次简短自我批评；
//! 有修正意见时作为提示注入。

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::cognition::SharedReceiver;
use crate::cognition::hints::{Hint, HintSender, HintSource};
use crate::config::config::CriticConfig;
use crate::error::Result;
use crate::inference::ModelWaterfall;
use crate::models::Persona;

const DEFAULT_TEMPLATE: &str = "You are reviewing a line just spoken by {name}, described as: {description}.\n\
Line: \"{utterance}\"\n\
If the line drifts out of character, reply with one short corrective instruction addressed to {name}. \
Otherwise reply exactly NO_CORRECTION.";

const NO_CORRECTION_MARKERS: [&str; 4] = ["no_correction", "no correction", "none", "ok"];

pub struct ReflectionCritic {
    persona: Persona,
    config: CriticConfig,
    waterfall: Arc<ModelWaterfall>,
    hints: HintSender,
    rng: Mutex<StdRng>,
}

impl ReflectionCritic {
    pub fn new(
        persona: Persona,
        config: CriticConfig,
        waterfall: Arc<ModelWaterfall>,
        hints: HintSender,
    ) -> Self {
        Self::with_rng(persona, config, waterfall, hints, StdRng::from_entropy())
    }

    pub fn with_rng(
        persona: Persona,
        config: CriticConfig,
        waterfall: Arc<ModelWaterfall>,
        hints: HintSender,
        rng: StdRng,
    ) -> Self {
        Self {
            persona,
            config,
            waterfall,
            hints,
            rng: Mutex::new(rng),
        }
    }

    /// 每个片段触发反思的概率：base + multiplier × neuroticism
    pub fn probability(&self) -> f64 {
        let neuroticism = f64::from(self.persona.weights.neuroticism);
        (self.config.base_chance + self.config.neuroticism_multiplier * neuroticism).clamp(0.0, 1.0)
    }

    pub fn should_reflect_with_rng<R: Rng>(&self, rng: &mut R) -> bool {
        rng.gen_bool(self.probability())
    }

    fn should_reflect(&self) -> bool {
        let mut rng = self.rng.lock();
        self.should_reflect_with_rng(&mut *rng)
    }

    fn prompt(&self, utterance: &str) -> String {
        self.persona
            .reflection_prompt
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or(DEFAULT_TEMPLATE)
            .replace("{name}", &self.persona.name)
            .replace("{description}", &self.persona.description)
            .replace("{utterance}", utterance)
    }

    /// 对一句话做自我批评，返回修正文本（没有修正时为 None）
    pub async fn reflect(&self, utterance: &str) -> Result<Option<String>> {
        let reply = self.waterfall.generate(&self.prompt(utterance)).await?;
        Ok(parse_correction(&reply))
    }

    /// 反思任务主循环；输入关闭时返回
    pub async fn run(self: Arc<Self>, utterances: SharedReceiver<String>) -> Result<()> {
        while let Some(utterance) = utterances.recv().await {
            if utterance.trim().is_empty() || !self.should_reflect() {
                continue;
            }
            match self.reflect(&utterance).await {
                Ok(Some(correction)) => {
                    debug!(persona_id = %self.persona.id, "Self-correction produced");
                    let _ = self.hints.send(Hint::new(HintSource::Reflection, correction));
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(persona_id = %self.persona.id, error = %e, "Reflection skipped");
                }
            }
        }
        Ok(())
    }
}

fn parse_correction(reply: &str) -> Option<String> {
    let trimmed = reply.trim();
    let normalized = trimmed
        .trim_matches(|c: char| !c.is_alphanumeric() && c != '_')
        .to_lowercase();
    if normalized.is_empty() || NO_CORRECTION_MARKERS.contains(&normalized.as_str()) {
        return None;
    }
    Some(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cognition::hints::HintQueue;
    use crate::inference::text::MockTextInference;
    use rstest::rstest;
    use std::time::Duration;

    fn critic(mock: MockTextInference, neuroticism: f32) -> (ReflectionCritic, HintQueue) {
        let mut persona = Persona::new("p1", "Nova", "a dry-witted astronomer");
        persona.weights.neuroticism = neuroticism;
        let waterfall = Arc::new(ModelWaterfall::new(
            Arc::new(mock),
            vec!["m".into()],
            Duration::from_secs(1),
        ));
        let (tx, queue) = HintQueue::new();
        let critic = ReflectionCritic::with_rng(
            persona,
            CriticConfig::default(),
            waterfall,
            tx,
            StdRng::seed_from_u64(7),
        );
        (critic, queue)
    }

    #[rstest]
    #[case("NO_CORRECTION", None)]
    #[case("  no correction. ", None)]
    #[case("", None)]
    #[case("OK", None)]
    #[case("Drop the cheerleader tone.", Some("Drop the cheerleader tone."))]
    fn test_parse_correction(#[case] reply: &str, #[case] expected: Option<&str>) {
        assert_eq!(parse_correction(reply).as_deref(), expected);
    }

    #[test]
    fn test_probability_scales_with_neuroticism() {
        let (calm, _) = critic(MockTextInference::new(), 0.0);
        let (anxious, _) = critic(MockTextInference::new(), 1.0);
        assert!((calm.probability() - 0.05).abs() < 1e-9);
        assert!((anxious.probability() - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_reflection_rate_tracks_probability() {
        let (critic, _) = critic(MockTextInference::new(), 0.5);
        let mut rng = StdRng::seed_from_u64(42);
        let hits = (0..10_000)
            .filter(|_| critic.should_reflect_with_rng(&mut rng))
            .count();
        // p = 0.15
        assert!((1200..1800).contains(&hits), "hits = {}", hits);
    }

    #[tokio::test]
    async fn test_custom_template_and_correction_hint() {
        let mut mock = MockTextInference::new();
        mock.expect_generate()
            .withf(|_, prompt| prompt.starts_with("Critique Nova:") && prompt.contains("hello there"))
            .returning(|_, _| Ok("Be less formal.".to_string()));
        let (mut critic, queue) = critic(mock, 0.5);
        critic.persona.reflection_prompt = Some("Critique {name}: {utterance}".into());

        assert_eq!(
            critic.reflect("hello there").await.unwrap(),
            Some("Be less formal.".to_string())
        );

        // 概率为 1 时每句都会反思
        critic.config.base_chance = 1.0;
        let critic = Arc::new(critic);
        let (tx, rx) = tokio::sync::mpsc::channel(4);
        tx.send("hello there".to_string()).await.unwrap();
        drop(tx);
        critic.run(SharedReceiver::new(rx)).await.unwrap();

        let hint = queue.recv().await.unwrap();
        assert_eq!(hint, Hint::new(HintSource::Reflection, "Be less formal."));
    }
}
