pub mod chunking;
pub mod config;
pub mod dataset;
pub mod engine;
pub mod error;
pub mod gatekeeper;
pub mod inference;
pub mod insertion;
pub mod naming;
pub mod pagination;
pub mod response;
pub mod store;

pub use config::{ChunkPriority, ChunkRule, ChunkingConfig, EngineConfig};
pub use engine::StagingEngine;
pub use error::StagingError;
pub use response::{DatasetSummary, ProcessResponse, QueryResponse, SchemaResponse};
