//! 存储层模块
//!
//! 关系图仓储接口，以及进程内和 SurrealDB 两种实现。

pub mod dynamics;
pub mod factory;
pub mod memory;
pub mod repository;

#[cfg(feature = "surrealdb")]
pub mod surrealdb;

pub use dynamics::GraphSettings;
pub use factory::StorageFactory;
pub use memory::InMemoryGraphStore;
pub use repository::{DreamGenerator, GraphRepository};
