//! 索引模块
//!
//! 嵌入模型接缝与余弦相似度排序。

pub mod embedding;
pub mod vector;

pub use embedding::{EmbeddingModel, HashingEmbeddingModel, OllamaEmbeddingModel, create_embedding_model};
pub use vector::{cosine_similarity, rank_top_k};
