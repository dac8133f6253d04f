//! 服务模块
//!
//! 本地：打包 → 初始化 → 上传 → 远程触发
//! 远程：更新流程
//! 手动：数据库引导

pub mod bundle;
pub mod database;
pub mod pipeline;
pub mod provision;
pub mod transfer;
pub mod trigger;
pub mod update;

pub use pipeline::{deploy, DeployOptions};
pub use update::{UpdateOptions, SUCCESS_BANNER};
