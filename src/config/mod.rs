//! 配置模块
//!
//! 配置文件 → 环境变量 → 命令行参数，依次覆盖

pub mod env;
pub mod file;

pub use env::EnvConfig;
pub use file::{
    BundleConfig, DatabaseConfig, DeployConfig, ProvisionConfig, TargetConfig, TransferConfig,
    UpdateConfig,
};

use std::path::Path;

use crate::error::DeployResult;

/// 加载配置文件并应用环境变量覆盖
pub fn load(path: Option<&Path>) -> DeployResult<DeployConfig> {
    let mut config = DeployConfig::load(path)?;
    EnvConfig::from_env().apply(&mut config);
    config.validate()?;
    Ok(config)
}
