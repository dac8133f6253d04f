//! 领域模型模块
//!
//! 纯数据结构，不依赖 tokio

pub mod deploy;
pub mod database;

// Re-exports for convenience
pub use deploy::{
    DeployStatus, DeployStep, LogLine, MigrationPolicy, RemoteLayout, SourceStrategy,
    StepStatus, UpdateReport,
};
pub use database::{BootstrapOutcome, DatabaseEngine, DatabaseName};
