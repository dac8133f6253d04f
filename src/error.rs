//! 统一错误处理
//!
//! `DeployError` 覆盖三类失败：本地打包、传输/认证、远程命令。
//! 打包与传输错误立即终止流水线，不做任何清理。

use std::path::PathBuf;
use thiserror::Error;

use crate::infra::command::CommandError;

/// 部署错误
#[derive(Debug, Error)]
pub enum DeployError {
    /// 打包列表中的路径不存在
    #[error("source path not found: {}", .0.display())]
    MissingSource(PathBuf),

    /// 打包失败
    #[error("failed to build bundle: {0}")]
    Packaging(String),

    /// 归档读写失败
    #[error("archive error: {0}")]
    Archive(String),

    /// scp 传输失败（网络或认证）
    #[error("transfer failed (exit code {code:?}): {message}")]
    Transfer { code: Option<i32>, message: String },

    /// 远程主机初始化失败
    #[error("remote provisioning failed (exit code {code:?})")]
    Provision { code: Option<i32> },

    /// 远程或本地命令返回非零
    #[error("{step} failed with exit code {code}")]
    RemoteCommand { step: String, code: i32 },

    /// 命令无法执行
    #[error(transparent)]
    Command(#[from] CommandError),

    /// 配置错误
    #[error("invalid configuration: {0}")]
    Config(String),

    /// 数据库名称不合法
    #[error("invalid database name: {0:?}")]
    InvalidDatabaseName(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DeployError {
    /// 创建配置错误
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// 对应的进程退出码
    ///
    /// 远程命令失败时透传其退出码，其余一律为 1
    pub fn exit_code(&self) -> i32 {
        match self {
            DeployError::RemoteCommand { code, .. } if *code != 0 => *code,
            DeployError::Transfer { code: Some(code), .. } if *code != 0 => *code,
            DeployError::Provision { code: Some(code) } if *code != 0 => *code,
            _ => 1,
        }
    }
}

/// 便捷类型别名
pub type DeployResult<T> = Result<T, DeployError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_passthrough() {
        let err = DeployError::RemoteCommand {
            step: "migrate".to_string(),
            code: 3,
        };
        assert_eq!(err.exit_code(), 3);

        let err = DeployError::Transfer {
            code: Some(255),
            message: "Permission denied".to_string(),
        };
        assert_eq!(err.exit_code(), 255);
    }

    #[test]
    fn test_exit_code_defaults_to_one() {
        assert_eq!(DeployError::MissingSource(PathBuf::from("core")).exit_code(), 1);
        assert_eq!(DeployError::Provision { code: None }.exit_code(), 1);
        assert_eq!(DeployError::config("bad").exit_code(), 1);
    }

    #[test]
    fn test_missing_source_message() {
        let err = DeployError::MissingSource(PathBuf::from("templates"));
        assert_eq!(err.to_string(), "source path not found: templates");
    }
}
