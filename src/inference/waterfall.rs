//! 模型降级瀑布
//!
//! 按顺序尝试候选模型；超时或限流等瞬时错误落到下一个模型，
//! 其它错误立即返回。

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{AppError, Result};
use crate::inference::TextInference;

pub struct ModelWaterfall {
    inference: Arc<dyn TextInference>,
    models: Vec<String>,
    call_timeout: Duration,
}

impl ModelWaterfall {
    pub fn new(inference: Arc<dyn TextInference>, models: Vec<String>, call_timeout: Duration) -> Self {
        Self {
            inference,
            models,
            call_timeout,
        }
    }

    pub fn models(&self) -> &[String] {
        &self.models
    }

    pub async fn generate(&self, prompt: &str) -> Result<String> {
        let mut last_error = AppError::Config("No text models configured".to_string());

        for model in &self.models {
            let outcome = tokio::time::timeout(self.call_timeout, self.inference.generate(model, prompt)).await;
            match outcome {
                Ok(Ok(text)) => {
                    debug!(model = %model, "Text inference succeeded");
                    return Ok(text);
                }
                Ok(Err(e)) if e.is_transient() => {
                    warn!(model = %model, error = %e, "Transient inference failure, falling back");
                    last_error = e;
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    warn!(model = %model, timeout_ms = self.call_timeout.as_millis() as u64, "Inference timed out, falling back");
                    last_error = AppError::Timeout(format!("Model {} timed out", model));
                }
            }
        }

        Err(last_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::text::MockTextInference;
    use mockall::predicate::eq;

    fn models() -> Vec<String> {
        vec!["primary".to_string(), "fallback".to_string()]
    }

    #[tokio::test]
    async fn test_falls_through_transient_errors() {
        let mut mock = MockTextInference::new();
        mock.expect_generate()
            .with(eq("primary"), eq("hi"))
            .times(1)
            .returning(|_, _| Err(AppError::RateLimited));
        mock.expect_generate()
            .with(eq("fallback"), eq("hi"))
            .times(1)
            .returning(|_, _| Ok("hello".to_string()));

        let waterfall = ModelWaterfall::new(Arc::new(mock), models(), Duration::from_secs(1));
        assert_eq!(waterfall.generate("hi").await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_permanent_error_stops_waterfall() {
        let mut mock = MockTextInference::new();
        mock.expect_generate()
            .times(1)
            .returning(|_, _| Err(AppError::Validation("bad prompt".into())));

        let waterfall = ModelWaterfall::new(Arc::new(mock), models(), Duration::from_secs(1));
        let err = waterfall.generate("hi").await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_all_models_failing_returns_last_error() {
        let mut mock = MockTextInference::new();
        mock.expect_generate()
            .times(2)
            .returning(|_, _| Err(AppError::Timeout("slow".into())));

        let waterfall = ModelWaterfall::new(Arc::new(mock), models(), Duration::from_secs(1));
        assert!(waterfall.generate("hi").await.unwrap_err().is_transient());
    }
}
