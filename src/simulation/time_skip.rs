//! 离线时间跳跃
//!
//! 会话开始前运行一次：把离线时长折算成电量恢复、亲和度衰减和背景事件。

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::config::SimulationConfig;
use crate::error::Result;
use crate::models::{CollectiveEvent, EventIntent, User};
use crate::simulation::tables::{self, IntentBias};
use crate::storage::GraphRepository;
use crate::storage::dynamics::decay_toward;

/// 一次时间跳跃的结果
#[derive(Debug, Clone, Default)]
pub struct TimeSkipReport {
    pub minutes_passed: f64,
    /// 恢复过电量的人格数
    pub recharged: usize,
    /// (persona_id, 亲和度变化)
    pub decayed: Vec<(String, f32)>,
    pub events: Vec<CollectiveEvent>,
}

impl TimeSkipReport {
    /// 会话开始时注入的摘要提示；没有事件时为 None
    pub fn summary_hint(&self) -> Option<String> {
        if self.events.is_empty() {
            return None;
        }
        let hours = self.minutes_passed / 60.0;
        let mut text = format!(
            "About {:.0} hours have passed since you last spoke with the user. Meanwhile:",
            hours.max(1.0)
        );
        for event in &self.events {
            text.push_str("\n- ");
            text.push_str(&event.summary);
        }
        Some(text)
    }
}

pub struct TimeSkipSimulator {
    repo: Arc<dyn GraphRepository>,
    config: SimulationConfig,
}

impl TimeSkipSimulator {
    pub fn new(repo: Arc<dyn GraphRepository>, config: SimulationConfig) -> Self {
        Self { repo, config }
    }

    pub async fn run(&self, user: &User) -> Result<TimeSkipReport> {
        let mut rng = StdRng::from_entropy();
        self.run_with_rng(user, Utc::now(), &mut rng).await
    }

    pub async fn run_with_rng<R: Rng + Send>(
        &self,
        user: &User,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> Result<TimeSkipReport> {
        let minutes_passed = user.minutes_since_seen(now);
        let mut report = TimeSkipReport {
            minutes_passed,
            ..TimeSkipReport::default()
        };

        report.recharged = self.recharge(minutes_passed).await?;
        report.decayed = self.decay(&user.id, now).await?;

        if minutes_passed >= self.config.min_event_minutes {
            let wanted = (minutes_passed / self.config.minutes_per_event).floor() as usize;
            let count = wanted.clamp(1, self.config.max_events.max(1));
            for _ in 0..count {
                let event = self.generate_event(user, now, rng).await?;
                report.events.push(event);
            }
        }

        info!(
            user_id = %user.id,
            minutes_passed,
            recharged = report.recharged,
            decayed = report.decayed.len(),
            events = report.events.len(),
            "Time skip applied"
        );
        Ok(report)
    }

    async fn recharge(&self, minutes_passed: f64) -> Result<usize> {
        let gain = (minutes_passed / 60.0) as f32 * self.config.recharge_per_hour;
        let personas = self.repo.list_personas().await?;
        for persona in &personas {
            self.repo
                .update_battery(&persona.id, persona.social_battery + gain)
                .await?;
        }
        Ok(personas.len())
    }

    /// 按最后一次真实互动计算衰减，而不是按登录间隔
    async fn decay(&self, user_id: &str, now: DateTime<Utc>) -> Result<Vec<(String, f32)>> {
        let mut decayed = Vec::new();
        for edge in self.repo.get_active_peers(user_id).await? {
            let last = self
                .repo
                .get_last_interaction(user_id, &edge.persona_id)
                .await?
                .unwrap_or(edge.last_interaction);
            let minutes = (now - last).num_seconds().max(0) as f64 / 60.0;
            if minutes < self.config.min_decay_minutes {
                continue;
            }

            let target = decay_toward(
                edge.affinity,
                self.config.decay_baseline,
                self.config.decay_rate,
                (minutes / 60.0) as f32,
            );
            let delta = target - edge.affinity;
            if delta.abs() > f32::EPSILON {
                self.repo
                    .update_resonance(user_id, &edge.persona_id, delta)
                    .await?;
                decayed.push((edge.persona_id.clone(), delta));
            }
        }
        Ok(decayed)
    }

    async fn generate_event<R: Rng + Send>(
        &self,
        user: &User,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> Result<CollectiveEvent> {
        let slots = rng.gen_range(2..=3);
        let mut real: Vec<String> = self
            .repo
            .get_active_peers(&user.id)
            .await?
            .into_iter()
            .map(|e| e.persona_id)
            .collect();
        real.shuffle(rng);
        real.truncate(slots);

        let mut names = Vec::with_capacity(slots);
        for persona_id in &real {
            let name = self
                .repo
                .get_persona(persona_id)
                .await?
                .map(|p| p.name)
                .unwrap_or_else(|| persona_id.clone());
            names.push(name);
        }
        let mut shadows: Vec<&str> = tables::SHADOW_NAMES.to_vec();
        shadows.shuffle(rng);
        names.extend(
            shadows
                .into_iter()
                .take(slots - real.len())
                .map(str::to_string),
        );

        let intent = match real.as_slice() {
            [a, b, ..] => {
                let affinity = self.repo.get_peer_affinity(a, b).await?.affinity;
                let bias = if affinity < self.config.conflict_affinity {
                    IntentBias::Conflict
                } else if affinity > self.config.support_affinity {
                    IntentBias::Support
                } else {
                    IntentBias::Uniform
                };
                tables::pick_weighted(rng, tables::intent_weights(bias))
            }
            _ => EventIntent::ALL.choose(rng).copied(),
        }
        .unwrap_or(EventIntent::Leisure);
        let outcome = tables::pick_weighted(rng, tables::outcome_weights(intent))
            .unwrap_or(crate::models::EventOutcome::Uneventful);

        let existing = self.repo.list_locations().await?;
        let location = match existing.choose(rng) {
            Some(place) if rng.gen_bool(0.6) => place.clone(),
            _ => {
                let name = tables::LOCATION_NAMES.choose(rng).copied().unwrap_or("somewhere");
                self.repo.get_or_create_location(name).await?
            }
        };

        let summary = tables::describe(intent, outcome, &names, &location.name);
        let mut event = CollectiveEvent::new(&user.id, intent, outcome, &summary, Some(&location.id));
        let gap_seconds = (now - user.last_seen).num_seconds().max(0);
        if gap_seconds > 0 {
            event.occurred_at = user.last_seen + ChronoDuration::seconds(rng.gen_range(0..gap_seconds));
        }
        let event = self.repo.save_event(event, &real).await?;

        if let [a, b, ..] = real.as_slice() {
            let delta = outcome.valence_delta();
            if delta != 0.0 {
                self.repo.update_peer_affinity(a, b, delta).await?;
            }
        }

        debug!(event_id = %event.id, %intent, %outcome, participants = ?names, "Offline event generated");
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::HashingEmbeddingModel;
    use crate::models::{EdgeFilter, EdgeType, GraphEdge, Persona};
    use crate::storage::{GraphSettings, InMemoryGraphStore};

    fn store() -> Arc<InMemoryGraphStore> {
        Arc::new(InMemoryGraphStore::new(
            Arc::new(HashingEmbeddingModel::new(32)),
            GraphSettings::default(),
        ))
    }

    fn user_away(minutes: i64, now: DateTime<Utc>) -> User {
        let mut user = User::new("u1");
        user.last_seen = now - ChronoDuration::minutes(minutes);
        user
    }

    #[tokio::test]
    async fn test_recharge_is_proportional_to_gap() {
        let repo = store();
        let mut persona = Persona::new("p1", "Nova", "");
        persona.social_battery = 40.0;
        repo.upsert_persona(&persona).await.unwrap();

        let now = Utc::now();
        let sim = TimeSkipSimulator::new(repo.clone(), SimulationConfig::default());
        let mut rng = StdRng::seed_from_u64(1);
        sim.run_with_rng(&user_away(120, now), now, &mut rng).await.unwrap();

        let battery = repo.get_persona("p1").await.unwrap().unwrap().social_battery;
        assert!((battery - 64.0).abs() < 0.01);
    }

    #[tokio::test]
    async fn test_decay_uses_last_real_interaction() {
        let repo = store();
        let now = Utc::now();
        repo.upsert_persona(&Persona::new("p1", "Nova", "")).await.unwrap();
        repo.update_resonance("u1", "p1", 80.0).await.unwrap();

        let mut interaction = GraphEdge::new("u1", "p1", EdgeType::InteractedWith);
        interaction.timestamp = now - ChronoDuration::hours(2);
        repo.create_edge(interaction).await.unwrap();

        let sim = TimeSkipSimulator::new(repo.clone(), SimulationConfig::default());
        let mut rng = StdRng::seed_from_u64(2);
        let report = sim.run_with_rng(&user_away(10, now), now, &mut rng).await.unwrap();

        let affinity = repo.get_resonance("u1", "p1").await.unwrap().affinity;
        assert!((affinity - 82.75).abs() < 0.05, "affinity = {}", affinity);
        assert_eq!(report.decayed.len(), 1);
        assert!(report.events.is_empty());
    }

    #[tokio::test]
    async fn test_recent_interaction_does_not_decay() {
        let repo = store();
        let now = Utc::now();
        repo.update_resonance("u1", "p1", 80.0).await.unwrap();
        repo.record_interaction("u1", "p1").await.unwrap();

        let sim = TimeSkipSimulator::new(repo.clone(), SimulationConfig::default());
        let mut rng = StdRng::seed_from_u64(3);
        let report = sim.run_with_rng(&user_away(600, now), now, &mut rng).await.unwrap();

        assert!(report.decayed.is_empty());
        assert_eq!(repo.get_resonance("u1", "p1").await.unwrap().affinity, 90.0);
    }

    #[tokio::test]
    async fn test_events_link_real_participants_only() {
        let repo = store();
        let now = Utc::now();
        for (id, name) in [("p1", "Nova"), ("p2", "Kai")] {
            repo.upsert_persona(&Persona::new(id, name, "")).await.unwrap();
            repo.get_resonance("u1", id).await.unwrap();
            repo.record_interaction("u1", id).await.unwrap();
        }

        let sim = TimeSkipSimulator::new(repo.clone(), SimulationConfig::default());
        let mut rng = StdRng::seed_from_u64(4);
        let report = sim.run_with_rng(&user_away(600, now), now, &mut rng).await.unwrap();

        assert_eq!(report.events.len(), 3);
        for event in &report.events {
            assert!(event.occurred_at <= now);
            let edges = repo
                .get_edges(&EdgeFilter::new().to_target(&event.id).of_type(EdgeType::ParticipatedIn))
                .await
                .unwrap();
            assert_eq!(edges.len(), 2);
            assert!(edges.iter().all(|e| e.source_id == "p1" || e.source_id == "p2"));

            let located = repo
                .get_edges(&EdgeFilter::new().from_source(&event.id).of_type(EdgeType::OccurredAt))
                .await
                .unwrap();
            assert_eq!(located.len(), 1);
        }
        assert!(report.summary_hint().unwrap().contains("hours have passed"));

        let peer = repo.get_peer_affinity("p1", "p2").await.unwrap().affinity;
        let expected: f32 = 50.0 + report.events.iter().map(|e| e.outcome.valence_delta()).sum::<f32>();
        assert!((peer - expected.clamp(0.0, 100.0)).abs() < 0.01);
    }

    #[tokio::test]
    async fn test_short_gap_generates_nothing() {
        let repo = store();
        let now = Utc::now();
        let sim = TimeSkipSimulator::new(repo.clone(), SimulationConfig::default());
        let mut rng = StdRng::seed_from_u64(5);
        let report = sim.run_with_rng(&user_away(5, now), now, &mut rng).await.unwrap();
        assert!(report.events.is_empty());
        assert!(report.summary_hint().is_none());
    }
}
