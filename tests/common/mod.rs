// 集成测试共用的夹具：内存图存储、脚本化的实时流、固定回复的文本推理

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use resonance::cache::MemoryIntentStore;
use resonance::cognition::{ActivePersonas, BioSignalMonitor, TurnAuction};
use resonance::config::AppConfig;
use resonance::consolidation::ConsolidationScheduler;
use resonance::error::Result;
use resonance::index::HashingEmbeddingModel;
use resonance::inference::{
    InferencePart, LiveConnector, LiveInput, LiveSession, LiveSetup, ModelWaterfall, TextInference,
};
use resonance::models::Persona;
use resonance::observability::AppMetrics;
use resonance::session::SessionDeps;
use resonance::storage::{GraphRepository, GraphSettings, InMemoryGraphStore};

/// 对每条文本输入回放同一组输出片段
pub struct ScriptedConnector {
    pub reply: Vec<InferencePart>,
    pub inputs: Arc<Mutex<Vec<LiveInput>>>,
}

impl ScriptedConnector {
    pub fn new(reply: Vec<InferencePart>) -> Self {
        Self {
            reply,
            inputs: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl LiveConnector for ScriptedConnector {
    async fn connect(&self, _setup: &LiveSetup) -> Result<LiveSession> {
        let (in_tx, mut in_rx) = mpsc::channel::<LiveInput>(64);
        let (out_tx, out_rx) = mpsc::channel::<InferencePart>(64);
        let inputs = self.inputs.clone();
        let reply = self.reply.clone();

        tokio::spawn(async move {
            while let Some(input) = in_rx.recv().await {
                let respond = matches!(input, LiveInput::Text(_));
                inputs.lock().push(input);
                if respond {
                    for part in reply.clone() {
                        if out_tx.send(part).await.is_err() {
                            return;
                        }
                    }
                }
            }
        });

        Ok(LiveSession {
            model: "scripted-live".to_string(),
            input: in_tx,
            output: out_rx,
        })
    }
}

/// 固定返回 "none"：既不命中情感表，也不触发纠正
pub struct CannedText;

#[async_trait]
impl TextInference for CannedText {
    async fn generate(&self, _model: &str, _prompt: &str) -> Result<String> {
        Ok("none".to_string())
    }
}

pub struct Harness {
    pub deps: SessionDeps,
    pub repo: Arc<InMemoryGraphStore>,
    pub intents: Arc<MemoryIntentStore>,
    pub connector: Arc<ScriptedConnector>,
}

pub async fn harness(grace: Duration) -> Harness {
    let mut config = AppConfig::development();
    config.server.task_shutdown_wait_ms = 200;
    config.cognition.restart_delay_ms = 10;
    let config = Arc::new(config);

    let repo = Arc::new(InMemoryGraphStore::new(
        Arc::new(HashingEmbeddingModel::new(64)),
        GraphSettings::default(),
    ));
    repo.upsert_persona(&Persona::new("nova", "Nova", "A wry night-shift radio host."))
        .await
        .unwrap();

    let intents = Arc::new(MemoryIntentStore::new());
    let metrics = Arc::new(AppMetrics::default());
    let scheduler = Arc::new(
        ConsolidationScheduler::new(
            repo.clone(),
            intents.clone(),
            None,
            metrics.clone(),
            config.consolidation.clone(),
        )
        .with_grace_period(grace),
    );
    let connector = Arc::new(ScriptedConnector::new(vec![
        InferencePart::Text("Evening. ".to_string()),
        InferencePart::Audio(vec![1, 0, 2, 0]),
        InferencePart::Text("Long time no hear.".to_string()),
        InferencePart::TurnComplete,
    ]));
    let waterfall = Arc::new(ModelWaterfall::new(
        Arc::new(CannedText),
        vec!["canned".to_string()],
        Duration::from_secs(1),
    ));

    let deps = SessionDeps {
        repo: repo.clone(),
        live: connector.clone(),
        waterfall,
        auction: Arc::new(TurnAuction::new(config.auction.clone())),
        scheduler,
        presence: Arc::new(ActivePersonas::new()),
        biosignal: Arc::new(BioSignalMonitor::new(config.cognition.biosignal.clone())),
        metrics,
        config,
    };

    Harness {
        deps,
        repo,
        intents,
        connector,
    }
}
