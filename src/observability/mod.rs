//! 可观测性模块
//!
//! 提供 Prometheus 指标、结构化日志和健康检查。

use axum::{Json, Router, response::IntoResponse, routing::get};

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::warn;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::config::LoggingConfig;
use crate::error::{AppError, Result};

// ===== Engine Metrics =====

/// 引擎指标
#[derive(Default)]
pub struct AppMetrics {
    pub sessions_active: AtomicU64,
    pub sessions_total: AtomicU64,
    pub hints_injected_total: AtomicU64,
    pub bids_lost_total: AtomicU64,
    pub cognitive_restarts_total: AtomicU64,
    pub consolidations_total: AtomicU64,
    pub consolidation_failures_total: AtomicU64,
}

impl AppMetrics {
    pub fn session_opened(&self) {
        self.sessions_active.fetch_add(1, Ordering::SeqCst);
        self.sessions_total.fetch_add(1, Ordering::SeqCst);
    }

    pub fn session_closed(&self) {
        let _ = self
            .sessions_active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_sub(1));
    }

    pub fn record_hint(&self) {
        self.hints_injected_total.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_lost_bid(&self) {
        self.bids_lost_total.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_restart(&self) {
        self.cognitive_restarts_total.fetch_add(1, Ordering::SeqCst);
    }

    /// 记录一次整合结果
    pub fn record_consolidation(&self, ok: bool) {
        if ok {
            self.consolidations_total.fetch_add(1, Ordering::SeqCst);
        } else {
            self.consolidation_failures_total
                .fetch_add(1, Ordering::SeqCst);
        }
    }

    /// 生成 Prometheus 格式指标
    pub fn gather(&self) -> String {
        format!(
            r#"# HELP sessions_active Live sessions currently open
# TYPE sessions_active gauge
sessions_active {}
# HELP sessions_total Sessions opened since start
# TYPE sessions_total counter
sessions_total {}
# HELP hints_injected_total System hints forwarded to the live stream
# TYPE hints_injected_total counter
hints_injected_total {}
# HELP bids_lost_total Output turns abandoned after a lost bid
# TYPE bids_lost_total counter
bids_lost_total {}
# HELP cognitive_restarts_total Supervised cognitive task restarts
# TYPE cognitive_restarts_total counter
cognitive_restarts_total {}
# HELP consolidations_total Successful memory consolidations
# TYPE consolidations_total counter
consolidations_total {}
# HELP consolidation_failures_total Failed memory consolidations
# TYPE consolidation_failures_total counter
consolidation_failures_total {}
"#,
            self.sessions_active.load(Ordering::SeqCst),
            self.sessions_total.load(Ordering::SeqCst),
            self.hints_injected_total.load(Ordering::SeqCst),
            self.bids_lost_total.load(Ordering::SeqCst),
            self.cognitive_restarts_total.load(Ordering::SeqCst),
            self.consolidations_total.load(Ordering::SeqCst),
            self.consolidation_failures_total.load(Ordering::SeqCst),
        )
    }
}

// ===== Health Check =====

/// 健康检查状态
#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub timestamp: String,
    pub version: String,
    pub uptime_seconds: f64,
    pub checks: Vec<HealthCheck>,
}

/// 单个健康检查项
#[derive(Debug, Serialize)]
pub struct HealthCheck {
    pub name: String,
    pub status: String,
    pub message: Option<String>,
    pub latency_ms: Option<u64>,
}

/// 健康检查结果
#[derive(Clone)]
pub struct HealthCheckResult {
    pub name: String,
    pub healthy: bool,
    pub message: String,
    pub latency_ms: u64,
}

/// 可观测性状态
#[derive(Clone)]
pub struct ObservabilityState {
    pub metrics: Arc<AppMetrics>,
    pub health_checks: Arc<Mutex<Vec<HealthCheckResult>>>,
    pub start_time: DateTime<Utc>,
    pub version: String,
}

impl ObservabilityState {
    pub fn new(version: String, metrics: Arc<AppMetrics>) -> Self {
        Self {
            metrics,
            health_checks: Arc::new(Mutex::new(Vec::new())),
            start_time: Utc::now(),
            version,
        }
    }

    /// 添加健康检查结果
    pub async fn add_health_check(&self, result: HealthCheckResult) {
        let mut checks = self.health_checks.lock().await;
        checks.retain(|c| c.name != result.name);
        checks.push(result);
    }

    /// 获取应用正常运行时间
    pub fn uptime_seconds(&self) -> f64 {
        (Utc::now() - self.start_time).num_seconds() as f64
    }
}

/// 执行一次依赖探测并计时；错误信息写入结果
pub async fn run_health_check<T, F>(name: &str, check: F) -> HealthCheckResult
where
    F: Future<Output = Result<T>>,
{
    let started = Instant::now();
    let outcome = check.await;
    let latency_ms = started.elapsed().as_millis() as u64;
    match outcome {
        Ok(_) => HealthCheckResult {
            name: name.to_string(),
            healthy: true,
            message: "ok".to_string(),
            latency_ms,
        },
        Err(e) => {
            warn!(check = name, error = %e, "Health check failed");
            HealthCheckResult {
                name: name.to_string(),
                healthy: false,
                message: e.to_string(),
                latency_ms,
            }
        }
    }
}

// ===== Health Check Handlers =====

/// 获取完整健康状态
pub async fn health_check(
    state: axum::extract::State<Arc<ObservabilityState>>,
) -> impl IntoResponse {
    let checks = state.health_checks.lock().await;
    let all_healthy = checks.iter().all(|c| c.healthy);

    let health_status = HealthStatus {
        status: if all_healthy {
            "healthy".to_string()
        } else {
            "unhealthy".to_string()
        },
        timestamp: Utc::now().to_rfc3339(),
        version: state.version.clone(),
        uptime_seconds: state.uptime_seconds(),
        checks: checks
            .iter()
            .map(|c| HealthCheck {
                name: c.name.clone(),
                status: if c.healthy {
                    "healthy".to_string()
                } else {
                    "unhealthy".to_string()
                },
                message: Some(c.message.clone()),
                latency_ms: Some(c.latency_ms),
            })
            .collect(),
    };

    let status_code = if all_healthy {
        axum::http::StatusCode::OK
    } else {
        axum::http::StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(health_status))
}

/// 简单存活检查
pub async fn liveness() -> impl IntoResponse {
    "OK"
}

/// 就绪检查
pub async fn readiness(state: axum::extract::State<Arc<ObservabilityState>>) -> impl IntoResponse {
    let checks = state.health_checks.lock().await;
    if checks.iter().all(|c| c.healthy) {
        (axum::http::StatusCode::OK, "Ready")
    } else {
        (axum::http::StatusCode::SERVICE_UNAVAILABLE, "Not Ready")
    }
}

/// Prometheus 指标端点
pub async fn metrics(state: axum::extract::State<Arc<ObservabilityState>>) -> impl IntoResponse {
    (axum::http::StatusCode::OK, state.metrics.gather())
}

/// 版本信息端点
pub async fn version(state: axum::extract::State<Arc<ObservabilityState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "version": state.version,
        "uptime_seconds": state.uptime_seconds(),
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

/// 创建可观测性路由
pub fn create_observability_router(state: Arc<ObservabilityState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/health/live", get(liveness))
        .route("/health/ready", get(readiness))
        .route("/metrics", get(metrics))
        .route("/version", get(version))
        .with_state(state)
}

// ===== Structured Logging =====

/// 初始化结构化日志
///
/// 配置了 `log_dir` 时额外写入按天滚动的文件；返回的 guard 必须存活到进程退出。
pub fn init_tracing(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("{},resonance={}", config.level, config.level)))
        .map_err(|e| AppError::Config(format!("Invalid log level: {}", e)))?;

    let (file_writer, guard) = match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "resonance.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(writer), Some(guard))
        }
        None => (None, None),
    };

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = if config.structured {
        registry
            .with(fmt::layer().json().with_target(true))
            .with(file_writer.map(|w| fmt::layer().json().with_ansi(false).with_writer(w)))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(true).with_line_number(true))
            .with(file_writer.map(|w| fmt::layer().with_ansi(false).with_writer(w)))
            .try_init()
    };
    result.map_err(|e| AppError::Config(format!("Failed to set tracing subscriber: {}", e)))?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_gather() {
        let metrics = AppMetrics::default();
        metrics.session_opened();
        metrics.session_opened();
        metrics.session_closed();
        metrics.record_hint();
        metrics.record_lost_bid();
        metrics.record_consolidation(true);
        metrics.record_consolidation(false);

        let output = metrics.gather();
        assert!(output.contains("sessions_active 1"));
        assert!(output.contains("sessions_total 2"));
        assert!(output.contains("hints_injected_total 1"));
        assert!(output.contains("bids_lost_total 1"));
        assert!(output.contains("consolidations_total 1"));
        assert!(output.contains("consolidation_failures_total 1"));
    }

    #[test]
    fn test_sessions_active_never_underflows() {
        let metrics = AppMetrics::default();
        metrics.session_closed();
        assert!(metrics.gather().contains("sessions_active 0"));
    }

    #[tokio::test]
    async fn test_health_checks_replace_by_name() {
        let state = ObservabilityState::new("0.1.0".into(), Arc::new(AppMetrics::default()));
        for healthy in [false, true] {
            state
                .add_health_check(HealthCheckResult {
                    name: "graph_store".into(),
                    healthy,
                    message: String::new(),
                    latency_ms: 1,
                })
                .await;
        }
        let checks = state.health_checks.lock().await;
        assert_eq!(checks.len(), 1);
        assert!(checks[0].healthy);
    }

    async fn readiness_status(state: Arc<ObservabilityState>) -> axum::http::StatusCode {
        use tower::ServiceExt;
        let request = axum::http::Request::builder()
            .uri("/health/ready")
            .body(axum::body::Body::empty())
            .unwrap();
        create_observability_router(state)
            .oneshot(request)
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn test_failed_dependency_makes_service_not_ready() {
        let state = Arc::new(ObservabilityState::new("0.1.0".into(), Arc::new(AppMetrics::default())));
        state
            .add_health_check(run_health_check("graph_store", async { Ok::<_, AppError>(true) }).await)
            .await;
        assert_eq!(readiness_status(state.clone()).await, axum::http::StatusCode::OK);

        let failed = run_health_check("intent_store", async {
            Err::<(), _>(AppError::Cache("connection refused".into()))
        })
        .await;
        assert!(!failed.healthy);
        assert!(failed.message.contains("connection refused"));
        state.add_health_check(failed).await;

        assert_eq!(
            readiness_status(state).await,
            axum::http::StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
