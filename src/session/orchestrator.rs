//! 单个连接的会话编排
//!
//! 建立顺序：用户/人格 → 时间跳跃 → 打开实时流 → 取消待执行的整合。
//! 结束时记录 last_seen 与最近互动，再把转录交给整合调度器。
//! 关键路径（上行音频、下行输出）在同一个 select 中运行，任一结束即结束会话；
//! 认知任务（分析、反思、提示注入）各自由监督器包裹，在关键路径结束后取消。

use chrono::Utc;
use futures_util::future::join_all;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cognition::auction::pcm_rms;
use crate::cognition::{
    ActivePersonas, BioSignalMonitor, CognitiveSupervisor, Hint, HintQueue, HintSource,
    ReflectionCritic, SharedReceiver, SubconsciousAnalyzer, TurnAuction,
};
use crate::config::config::AppConfig;
use crate::consolidation::{ConsolidationScheduler, SessionTranscript};
use crate::error::{AppError, Result};
use crate::inference::{InferencePart, LiveConnector, LiveInput, LiveSetup, ModelWaterfall};
use crate::models::{Persona, ResonanceEdge};
use crate::observability::AppMetrics;
use crate::session::protocol::{ClientFrame, ClientMessage, ControlAction, ServerFrame, ServerMessage};
use crate::simulation::{TimeSkipReport, TimeSkipSimulator};
use crate::storage::GraphRepository;

/// 会话结束后的摘要
#[derive(Debug, Clone, Default)]
pub struct SessionSummary {
    pub model: String,
    pub turns: usize,
    pub transcript_lines: usize,
    pub offline_events: usize,
}

/// 进程级共享依赖，所有会话共用
#[derive(Clone)]
pub struct SessionDeps {
    pub repo: Arc<dyn GraphRepository>,
    pub live: Arc<dyn LiveConnector>,
    pub waterfall: Arc<ModelWaterfall>,
    pub auction: Arc<TurnAuction>,
    pub scheduler: Arc<ConsolidationScheduler>,
    pub presence: Arc<ActivePersonas>,
    pub biosignal: Arc<BioSignalMonitor>,
    pub metrics: Arc<AppMetrics>,
    pub config: Arc<AppConfig>,
}

/// 会话内上下行共享的对话记录
#[derive(Default)]
struct SessionLog {
    lines: Mutex<Vec<String>>,
    turns: AtomicUsize,
}

impl SessionLog {
    fn push(&self, speaker: &str, text: &str) {
        let text = text.trim();
        if !text.is_empty() {
            self.lines.lock().push(format!("{}: {}", speaker, text));
        }
    }

    fn len(&self) -> usize {
        self.lines.lock().len()
    }

    fn turn_completed(&self) {
        self.turns.fetch_add(1, Ordering::Relaxed);
    }

    fn turns(&self) -> usize {
        self.turns.load(Ordering::Relaxed)
    }

    fn joined(&self) -> String {
        self.lines.lock().join("\n")
    }
}

pub struct SessionOrchestrator {
    deps: SessionDeps,
}

impl SessionOrchestrator {
    pub fn new(deps: SessionDeps) -> Self {
        Self { deps }
    }

    /// 运行一个会话直到客户端断开或实时流结束
    pub async fn run(
        &self,
        user_id: &str,
        persona_id: &str,
        inbound: mpsc::Receiver<ClientFrame>,
        outbound: mpsc::Sender<ServerFrame>,
    ) -> Result<SessionSummary> {
        let deps = &self.deps;

        let user = deps.repo.get_or_create_user(user_id).await?;
        let persona = deps
            .repo
            .get_persona(persona_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Persona {} not found", persona_id)))?;

        let report = match TimeSkipSimulator::new(deps.repo.clone(), deps.config.simulation.clone())
            .run(&user)
            .await
        {
            Ok(report) => report,
            Err(e) => {
                warn!(user_id, error = %e, "Time skip failed, starting session without it");
                TimeSkipReport::default()
            }
        };

        let resonance = deps.repo.get_resonance(user_id, persona_id).await?;
        let persona = deps.repo.get_persona(persona_id).await?.unwrap_or(persona);

        let setup = LiveSetup {
            user_id: user_id.to_string(),
            persona_id: persona_id.to_string(),
            system_instruction: system_instruction(&persona, &resonance),
        };
        let live = deps.live.connect(&setup).await?;
        info!(user_id, persona_id, model = %live.model, "Live session opened");

        // 会话确实建立后才算重连；此前任何一步失败都保留待整合的转录
        if deps.scheduler.cancel(user_id).await {
            info!(user_id, "Reconnected within grace period, pending consolidation dropped");
        }

        let _presence = deps.presence.enter(user_id, persona_id);
        deps.metrics.session_opened();

        let (hint_tx, hint_queue) = HintQueue::new();
        let _biosignal = deps.biosignal.register(user_id, hint_tx.clone());
        if let Some(text) = report.summary_hint() {
            let _ = hint_tx.send(Hint::new(HintSource::TimeSkip, text));
        }

        let queue = deps.config.cognition.transcript_queue.max(1);
        let (transcript_tx, transcript_rx) = mpsc::channel::<String>(queue);
        let (utterance_tx, utterance_rx) = mpsc::channel::<String>(queue);

        let analyzer = Arc::new(SubconsciousAnalyzer::new(
            user_id,
            persona_id,
            deps.repo.clone(),
            deps.waterfall.clone(),
            hint_tx.clone(),
            deps.presence.clone(),
            deps.config.cognition.analyzer.clone(),
        ));
        let critic = Arc::new(ReflectionCritic::new(
            persona.clone(),
            deps.config.cognition.critic.clone(),
            deps.waterfall.clone(),
            hint_tx.clone(),
        ));
        drop(hint_tx);

        let supervisor = CognitiveSupervisor::new(
            Duration::from_millis(deps.config.cognition.restart_delay_ms),
            deps.metrics.clone(),
        );
        let transcripts = SharedReceiver::new(transcript_rx);
        let utterances = SharedReceiver::new(utterance_rx);
        let handles = {
            let analyzer = analyzer.clone();
            let live_input = live.input.clone();
            let metrics = deps.metrics.clone();
            vec![
                supervisor.spawn("subconscious", move || analyzer.clone().run(transcripts.clone())),
                supervisor.spawn("reflection", move || critic.clone().run(utterances.clone())),
                supervisor.spawn("hint_injection", move || {
                    let queue = hint_queue.clone();
                    let live_input = live_input.clone();
                    let metrics = metrics.clone();
                    async move { queue.forward_to(live_input, metrics).await }
                }),
            ]
        };

        let log = SessionLog::default();
        let bid_score = deps.auction.default_score() * (0.5 + persona.weights.curiosity);
        let model = live.model.clone();
        let critical = tokio::select! {
            r = self.inbound_loop(persona_id, inbound, live.input, &outbound, transcript_tx, &log) => r,
            r = self.outbound_loop(persona_id, bid_score, live.output, &outbound, utterance_tx, &log) => {
                debug!(user_id, "Live stream ended");
                r
            }
        };
        deps.auction.release(persona_id);

        for handle in &handles {
            handle.abort();
        }
        let wait = Duration::from_millis(deps.config.server.task_shutdown_wait_ms);
        if tokio::time::timeout(wait, join_all(handles)).await.is_err() {
            warn!(user_id, "Cognitive tasks did not stop within the shutdown wait");
        }
        deps.metrics.session_closed();

        if let Err(e) = deps.repo.touch_user(user_id, Utc::now()).await {
            warn!(user_id, error = %e, "Failed to update last_seen");
        }
        // 以会话结束时刻作为最近一次真实互动，长会话不会被误判为久未联系
        if let Err(e) = deps.repo.record_interaction(user_id, persona_id).await {
            warn!(user_id, persona_id, error = %e, "Failed to record interaction");
        }
        let transcript = log.joined();
        let pending = (!transcript.is_empty())
            .then(|| SessionTranscript::new(Some(persona_id), &transcript, analyzer.mood()));
        deps.scheduler.schedule(user_id, pending).await;

        info!(user_id, persona_id, lines = log.len(), "Session closed");
        critical.map(|_| SessionSummary {
            model,
            turns: log.turns(),
            transcript_lines: log.len(),
            offline_events: report.events.len(),
        })
    }

    /// 上行：客户端 → 实时流；音频能量越过阈值即插话
    async fn inbound_loop(
        &self,
        persona_id: &str,
        mut inbound: mpsc::Receiver<ClientFrame>,
        live: mpsc::Sender<LiveInput>,
        outbound: &mpsc::Sender<ServerFrame>,
        transcripts: mpsc::Sender<String>,
        log: &SessionLog,
    ) -> Result<()> {
        let auction = &self.deps.auction;
        let barge_in = self.deps.config.auction.barge_in_energy;
        let closed = || AppError::Connection("Live stream closed".into());

        while let Some(frame) = inbound.recv().await {
            match frame {
                ClientFrame::Audio(pcm) => {
                    if pcm_rms(&pcm) >= barge_in && auction.interrupt().as_deref() == Some(persona_id) {
                        let _ = outbound.send(ServerFrame::Message(ServerMessage::Interrupted)).await;
                    }
                    live.send(LiveInput::Audio(pcm)).await.map_err(|_| closed())?;
                }
                ClientFrame::Message(ClientMessage::Control { action }) => match action {
                    ControlAction::Interrupt => {
                        auction.interrupt();
                        let _ = outbound.send(ServerFrame::Message(ServerMessage::Interrupted)).await;
                    }
                    ControlAction::Unknown => debug!("Ignoring unknown control action"),
                },
                ClientFrame::Message(ClientMessage::NativeTranscript { text }) => {
                    log.push("User", &text);
                    // 分析器跟不上时丢弃片段，不阻塞音频路径
                    let _ = transcripts.try_send(text);
                }
                ClientFrame::Message(ClientMessage::Text { text }) => {
                    log.push("User", &text);
                    let _ = transcripts.try_send(text.clone());
                    live.send(LiveInput::Text(text)).await.map_err(|_| closed())?;
                }
                ClientFrame::Message(ClientMessage::Image { data, mime_type }) => {
                    match ClientMessage::decode_image(&data) {
                        Ok(bytes) => live
                            .send(LiveInput::Image { mime_type, data: bytes })
                            .await
                            .map_err(|_| closed())?,
                        Err(e) => {
                            let message = ServerMessage::Error { message: e.to_string() };
                            let _ = outbound.send(ServerFrame::Message(message)).await;
                        }
                    }
                }
            }
        }
        debug!("Client closed the connection");
        Ok(())
    }

    /// 下行：实时流 → 客户端；每段音频都要赢得发言权，输掉则放弃本回合
    async fn outbound_loop(
        &self,
        persona_id: &str,
        bid_score: f32,
        mut output: mpsc::Receiver<InferencePart>,
        outbound: &mpsc::Sender<ServerFrame>,
        utterances: mpsc::Sender<String>,
        log: &SessionLog,
    ) -> Result<()> {
        let auction = &self.deps.auction;
        let metrics = &self.deps.metrics;
        let mut spoken = String::new();
        let mut turn_lost = false;

        while let Some(part) = output.recv().await {
            let frame = match part {
                InferencePart::Audio(bytes) => {
                    if turn_lost {
                        continue;
                    }
                    if !auction.bid(persona_id, bid_score) {
                        metrics.record_lost_bid();
                        turn_lost = true;
                        continue;
                    }
                    ServerFrame::Audio(bytes)
                }
                InferencePart::Text(text) => {
                    if turn_lost {
                        continue;
                    }
                    spoken.push_str(&text);
                    ServerFrame::Message(ServerMessage::Text { text })
                }
                InferencePart::ToolCall { name, args } => {
                    ServerFrame::Message(ServerMessage::ToolCall { name, args })
                }
                part @ (InferencePart::TurnComplete | InferencePart::Interrupted) => {
                    let interrupted = matches!(part, InferencePart::Interrupted);
                    auction.release(persona_id);
                    let utterance = std::mem::take(&mut spoken);
                    if !utterance.trim().is_empty() {
                        log.push("Persona", &utterance);
                        let _ = utterances.try_send(utterance);
                    }
                    turn_lost = false;
                    log.turn_completed();
                    ServerFrame::Message(if interrupted {
                        ServerMessage::Interrupted
                    } else {
                        ServerMessage::TurnComplete
                    })
                }
            };
            if outbound.send(frame).await.is_err() {
                break;
            }
        }
        Ok(())
    }
}

/// 实时流的系统指令：人设 + 当前关系与状态
fn system_instruction(persona: &Persona, resonance: &ResonanceEdge) -> String {
    format!(
        "You are {name}. {description}\n\
         Your affinity toward this user is {affinity:.0} out of 100; let it shape how warm you are.\n\
         Your social battery is {battery} ({level:.0}/100).\n\
         Lines that begin with [SYSTEM] are private guidance from your own mind. Never read them aloud.",
        name = persona.name,
        description = persona.description,
        affinity = resonance.affinity,
        battery = persona.battery_state(),
        level = persona.social_battery,
    )
}
