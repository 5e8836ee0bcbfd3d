//! 认知任务监督器
//!
//! 后台认知任务失败或 panic 时记录日志并在固定延迟后重启；
//! 任务正常返回视为退出；JoinHandle 被 abort 时直接结束，不会重启。

use futures_util::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::error::Result;
use crate::observability::AppMetrics;

#[derive(Clone)]
pub struct CognitiveSupervisor {
    restart_delay: Duration,
    metrics: Arc<AppMetrics>,
}

impl CognitiveSupervisor {
    pub fn new(restart_delay: Duration, metrics: Arc<AppMetrics>) -> Self {
        Self {
            restart_delay,
            metrics,
        }
    }

    /// 在当前任务中运行监督循环
    pub async fn supervise<F, Fut>(&self, name: &'static str, mut task: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        loop {
            match AssertUnwindSafe(task()).catch_unwind().await {
                Ok(Ok(())) => {
                    debug!(task = name, "Cognitive task finished");
                    return;
                }
                Ok(Err(e)) => {
                    error!(task = name, error = %e, "Cognitive task failed, restarting");
                }
                Err(panic) => {
                    error!(task = name, panic = %panic_message(&panic), "Cognitive task panicked, restarting");
                }
            }
            self.metrics.record_restart();
            tokio::time::sleep(self.restart_delay).await;
        }
    }

    /// 以独立 tokio 任务运行监督循环；abort 返回的句柄即取消
    pub fn spawn<F, Fut>(&self, name: &'static str, task: F) -> JoinHandle<()>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let supervisor = self.clone();
        tokio::spawn(async move { supervisor.supervise(name, task).await })
    }
}

fn panic_message(panic: &Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn supervisor(metrics: Arc<AppMetrics>) -> CognitiveSupervisor {
        CognitiveSupervisor::new(Duration::from_millis(5), metrics)
    }

    #[tokio::test]
    async fn test_restarts_after_error_and_panic() {
        let metrics = Arc::new(AppMetrics::default());
        let attempts = Arc::new(AtomicUsize::new(0));

        let counter = attempts.clone();
        supervisor(metrics.clone())
            .supervise("flaky", move || {
                let counter = counter.clone();
                async move {
                    match counter.fetch_add(1, Ordering::SeqCst) {
                        0 => Err(AppError::Inference("boom".into())),
                        1 => panic!("malformed response"),
                        _ => Ok(()),
                    }
                }
            })
            .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert!(metrics.gather().contains("cognitive_restarts_total 2"));
    }

    #[tokio::test]
    async fn test_abort_stops_without_restart() {
        let metrics = Arc::new(AppMetrics::default());
        let attempts = Arc::new(AtomicUsize::new(0));

        let counter = attempts.clone();
        let handle = supervisor(metrics.clone()).spawn("forever", move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                std::future::pending::<()>().await;
                Ok(())
            }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.abort();
        assert!(handle.await.unwrap_err().is_cancelled());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(metrics.gather().contains("cognitive_restarts_total 0"));
    }
}
