//! 基于文本推理的梦境生成

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::error::Result;
use crate::inference::ModelWaterfall;
use crate::models::{DreamDraft, MemoryEpisode};
use crate::storage::DreamGenerator;
use crate::storage::dynamics::fallback_dream;

const MAX_EPISODES_IN_PROMPT: usize = 12;

pub struct InferenceDreamGenerator {
    waterfall: Arc<ModelWaterfall>,
}

impl InferenceDreamGenerator {
    pub fn new(waterfall: Arc<ModelWaterfall>) -> Self {
        Self { waterfall }
    }

    fn prompt(episodes: &[MemoryEpisode]) -> String {
        let moments: Vec<String> = episodes
            .iter()
            .take(MAX_EPISODES_IN_PROMPT)
            .map(|e| format!("- ({:+.2}) {}", e.valence, e.summary))
            .collect();
        format!(
            "Fold these remembered moments into one dream.\n{}\n\
             Answer with a single line: theme | intensity 0-1 | surrealism 0-1",
            moments.join("\n")
        )
    }
}

/// 解析 `theme | intensity | surrealism`
pub(crate) fn parse_dream_line(raw: &str) -> Option<DreamDraft> {
    let line = raw.lines().find(|l| l.contains('|'))?;
    let fields: Vec<&str> = line.split('|').map(str::trim).collect();
    let [theme, intensity, surrealism] = fields.as_slice() else {
        return None;
    };
    if theme.is_empty() {
        return None;
    }
    Some(DreamDraft {
        theme: theme.to_string(),
        intensity: intensity.parse::<f32>().ok()?.clamp(0.0, 1.0),
        surrealism: surrealism.parse::<f32>().ok()?.clamp(0.0, 1.0),
    })
}

#[async_trait]
impl DreamGenerator for InferenceDreamGenerator {
    async fn generate(&self, user_id: &str, episodes: &[MemoryEpisode]) -> Result<DreamDraft> {
        let raw = self.waterfall.generate(&Self::prompt(episodes)).await?;
        Ok(parse_dream_line(&raw).unwrap_or_else(|| {
            debug!(user_id, "Unparseable dream reply, using local dream");
            fallback_dream(episodes)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::text::MockTextInference;
    use rstest::rstest;
    use std::time::Duration;

    #[rstest]
    #[case("a flooded library | 0.8 | 0.9", Some(("a flooded library", 0.8, 0.9)))]
    #[case("Here you go:\nclockwork birds | 1.7 | -1", Some(("clockwork birds", 1.0, 0.0)))]
    #[case("just a theme", None)]
    #[case(" | 0.5 | 0.5", None)]
    #[case("x | high | 0.2", None)]
    fn test_parse_dream_line(#[case] raw: &str, #[case] expected: Option<(&str, f32, f32)>) {
        let parsed = parse_dream_line(raw);
        match expected {
            Some((theme, intensity, surrealism)) => {
                let draft = parsed.unwrap();
                assert_eq!(draft.theme, theme);
                assert_eq!(draft.intensity, intensity);
                assert_eq!(draft.surrealism, surrealism);
            }
            None => assert!(parsed.is_none()),
        }
    }

    #[tokio::test]
    async fn test_garbled_reply_falls_back_to_local_dream() {
        let mut mock = MockTextInference::new();
        mock.expect_generate()
            .returning(|_, _| Ok("I'd rather not".to_string()));
        let waterfall = ModelWaterfall::new(Arc::new(mock), vec!["m".into()], Duration::from_secs(1));
        let generator = InferenceDreamGenerator::new(Arc::new(waterfall));

        let episodes = vec![MemoryEpisode::new("u1", Some("p1"), "we laughed at the gulls", 0.9)];
        let draft = generator.generate("u1", &episodes).await.unwrap();
        assert_eq!(draft, fallback_dream(&episodes));
    }
}
