//! agro-deploy - agrotalhoes 部署工具
//!
//! 本地打包上传并触发远程更新；远程更新流程；数据库引导

pub mod error;
pub mod infra;
pub mod domain;
pub mod config;
pub mod services;

pub use config::DeployConfig;
pub use error::{DeployError, DeployResult};
