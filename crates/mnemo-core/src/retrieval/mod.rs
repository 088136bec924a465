//! Multi-strategy retrieval fused with Reciprocal Rank Fusion.

pub mod engine;
pub mod fusion;
pub mod strategies;

pub use engine::RetrievalEngine;
pub use fusion::{reciprocal_rank_fusion, sort_ranked};
pub use strategies::{
    GraphStrategy, KeywordStrategy, RetrievalQuery, RetrievalStrategy, SemanticStrategy,
    SubgraphStrategy,
};
