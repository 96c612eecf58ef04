//! 记忆层：工作记忆、情景 / 语义 / 程序记忆、文档存储与向量索引

pub mod conversation;
pub mod episodic;
pub mod procedural;
pub mod scoring;
pub mod semantic;
pub mod sqlite;
pub mod store;
pub mod system;
pub mod token_budget;
pub mod tokenizer;
pub mod types;
pub mod vector;
pub mod working;

pub use conversation::{Message, Role};
pub use episodic::{
    ConsolidationPolicy, EpisodeConsolidation, EpisodeConsolidator, EpisodeSearchOptions,
    EpisodicContext, EpisodicManager, NoopConsolidator, SummarizingConsolidator,
};
pub use procedural::{ProceduralManager, StrategyRecommendation};
pub use semantic::{FactConsolidation, FactSearchOptions, KnowledgeContext, SemanticManager};
pub use sqlite::SqliteDocumentStore;
pub use store::{
    DocumentStore, EpisodeFilter, FactFilter, InMemoryDocumentStore, SessionFilter, StoreError,
    StrategyFilter,
};
pub use system::{
    ComponentHealth, ConsolidationReport, ContextOptions, HealthReport, MaintenanceReport,
    MemoryContext, MemoryStats, MemorySystem, ProceduralContext, StoredExperience,
};
pub use token_budget::{BudgetSplit, TokenEstimator};
pub use types::{Episode, EpisodeInput, Fact, FactInput, Strategy, StrategyInput};
pub use vector::{InMemoryVectorIndex, VectorIndex, VectorMatch, VectorQuery};
pub use working::WorkingMemory;
