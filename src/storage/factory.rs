//! 存储工厂模块
//!
//! 根据配置创建相应的图存储实例。

use std::sync::Arc;
use tracing::info;

use crate::config::config::{DatabaseConfig, StorageBackend};
use crate::error::{AppError, Result};
use crate::index::EmbeddingModel;
use crate::storage::dynamics::GraphSettings;
use crate::storage::memory::InMemoryGraphStore;
use crate::storage::repository::GraphRepository;

#[cfg(feature = "surrealdb")]
use crate::storage::surrealdb::SurrealGraphStore;

/// 存储工厂
pub struct StorageFactory;

impl StorageFactory {
    /// 根据配置创建图存储
    pub async fn create(
        config: &DatabaseConfig,
        embedder: Arc<dyn EmbeddingModel>,
        settings: GraphSettings,
    ) -> Result<Arc<dyn GraphRepository>> {
        match config.backend {
            StorageBackend::Memory => {
                info!("Using in-process graph store");
                Ok(Arc::new(InMemoryGraphStore::new(embedder, settings)))
            }
            #[cfg(feature = "surrealdb")]
            StorageBackend::Surrealdb => {
                let store = SurrealGraphStore::connect(config, embedder, settings).await?;
                Ok(Arc::new(store))
            }
            #[cfg(not(feature = "surrealdb"))]
            StorageBackend::Surrealdb => {
                let _ = (embedder, settings);
                Err(AppError::Config(
                    "SurrealDB feature is not enabled. Enable 'surrealdb' feature to use it."
                        .into(),
                ))
            }
        }
    }

    /// 检查存储是否可用
    pub async fn health_check(store: &dyn GraphRepository) -> Result<bool> {
        store
            .get_system_config()
            .await
            .map(|_| true)
            .map_err(|e| AppError::Database(format!("Graph store health check failed: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::HashingEmbeddingModel;

    #[tokio::test]
    async fn test_memory_backend_is_healthy() {
        let config = DatabaseConfig::default();
        let store = StorageFactory::create(
            &config,
            Arc::new(HashingEmbeddingModel::new(8)),
            GraphSettings::default(),
        )
        .await
        .unwrap();
        assert!(StorageFactory::health_check(store.as_ref()).await.unwrap());
    }
}
