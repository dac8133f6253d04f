//! 部署配置文件（deploy.toml）
//!
//! 所有字段都有默认值，默认值即生产 VPS 的部署参数。

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::env::constants::{
    ARCHIVE_NAME, DEFAULT_CONFIG_FILE, LOG_DIR,
};
use crate::domain::database::DatabaseEngine;
use crate::domain::deploy::{MigrationPolicy, RemoteLayout};
use crate::error::{DeployError, DeployResult};

/// 部署配置
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct DeployConfig {
    pub target: TargetConfig,
    pub bundle: BundleConfig,
    pub transfer: TransferConfig,
    pub provision: ProvisionConfig,
    pub update: UpdateConfig,
    pub database: DatabaseConfig,
    /// 单条外部命令超时（秒），默认不限制
    pub command_timeout_secs: Option<u64>,
}

/// 远程主机
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct TargetConfig {
    pub host: String,
    pub user: String,
    pub ssh_port: u16,
    pub identity_file: Option<String>,
    /// 远程部署目录
    pub remote_dir: String,
    /// 在部署目录中执行的更新命令
    pub remote_command: String,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            host: "191.252.178.97".to_string(),
            user: "root".to_string(),
            ssh_port: 22,
            identity_file: None,
            remote_dir: "/var/www/agrotalhoes".to_string(),
            // scp 不保留可执行位（从 Windows 上传时尤其如此）
            remote_command: "chmod +x agro-deploy && ./agro-deploy remote-update".to_string(),
        }
    }
}

/// 打包配置
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct BundleConfig {
    /// 项目根目录
    pub root: PathBuf,
    /// 归档输出路径（相对 root）
    pub archive: PathBuf,
    /// 打包的路径列表（相对 root）
    pub paths: Vec<String>,
}

impl Default for BundleConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            archive: PathBuf::from(ARCHIVE_NAME),
            paths: [
                "agrotalhoes",
                "core",
                "templates",
                "static",
                "requirements.txt",
                "manage.py",
                ".env",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

/// 传输配置
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct TransferConfig {
    /// 随归档一起上传的独立文件（如远程更新程序）
    pub extra_files: Vec<PathBuf>,
}

/// 远程主机系统包安装
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct ProvisionConfig {
    pub packages: Vec<String>,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            packages: ["python3", "python3-venv", "python3-pip", "nginx"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

/// 远程更新流程配置
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct UpdateConfig {
    /// 部署目录（远程主机上）
    pub deploy_dir: PathBuf,
    /// 归档文件名（相对 deploy_dir）
    pub archive: PathBuf,
    pub log_dir: PathBuf,
    pub venv_dir: PathBuf,
    pub python: String,
    pub requirements: String,
    pub manage_py: String,
    pub git_remote: String,
    pub git_branch: String,
    pub layout: RemoteLayout,
    pub halt_on_migration_failure: bool,
    /// 按顺序重启的服务
    pub services: Vec<String>,
    pub use_sudo: bool,
    /// 追加到所有子进程的环境变量（在 CRYPTOGRAPHY_OPENSSL_NO_LEGACY=1 之后生效）
    pub extra_env: BTreeMap<String, String>,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            deploy_dir: PathBuf::from("."),
            archive: PathBuf::from(ARCHIVE_NAME),
            log_dir: PathBuf::from(LOG_DIR),
            venv_dir: PathBuf::from("venv"),
            python: "python3".to_string(),
            requirements: "requirements.txt".to_string(),
            manage_py: "manage.py".to_string(),
            git_remote: "origin".to_string(),
            git_branch: "main".to_string(),
            layout: RemoteLayout::InPlace,
            halt_on_migration_failure: false,
            services: vec!["gunicorn".to_string(), "nginx".to_string()],
            use_sudo: true,
            extra_env: BTreeMap::new(),
        }
    }
}

impl UpdateConfig {
    pub fn migration_policy(&self) -> MigrationPolicy {
        MigrationPolicy::from_halt_flag(self.halt_on_migration_failure)
    }

    /// 解析为绝对/相对 deploy_dir 的路径
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.deploy_dir.join(path)
        }
    }
}

/// 数据库引导配置
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub engine: DatabaseEngine,
    pub name: String,
    pub host: Option<String>,
    pub port: Option<u16>,
    /// 为空时 SQL Server 使用 Windows 集成认证
    pub user: Option<String>,
    pub password: Option<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            engine: DatabaseEngine::Mssql,
            name: "db_talhoes".to_string(),
            host: None,
            port: None,
            user: None,
            password: None,
        }
    }
}

impl DatabaseConfig {
    /// 未配置 host 时的默认值
    pub fn host_or_default(&self) -> String {
        self.host.clone().unwrap_or_else(|| match self.engine {
            DatabaseEngine::Mssql => r"localhost\SQLEXPRESS".to_string(),
            DatabaseEngine::Postgresql => "localhost".to_string(),
        })
    }
}

impl DeployConfig {
    /// 加载配置文件
    ///
    /// 显式指定的文件必须存在；未指定时尝试当前目录下的 deploy.toml，
    /// 不存在则使用默认值
    pub fn load(path: Option<&Path>) -> DeployResult<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => {
                let default = PathBuf::from(DEFAULT_CONFIG_FILE);
                if !default.exists() {
                    return Ok(Self::default());
                }
                default
            }
        };

        let text = std::fs::read_to_string(&path).map_err(|e| {
            DeployError::config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> DeployResult<Self> {
        toml::from_str(text).map_err(|e| DeployError::config(e.to_string()))
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_secs.map(Duration::from_secs)
    }

    /// 检查配置一致性
    pub fn validate(&self) -> DeployResult<()> {
        if self.target.host.trim().is_empty() {
            return Err(DeployError::config("target.host is empty"));
        }
        if self.target.remote_dir.trim().is_empty() {
            return Err(DeployError::config("target.remote_dir is empty"));
        }
        if self.bundle.paths.is_empty() {
            return Err(DeployError::config("bundle.paths is empty"));
        }
        if self.update.services.is_empty() {
            return Err(DeployError::config("update.services is empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_production() {
        let config = DeployConfig::default();
        assert_eq!(config.target.host, "191.252.178.97");
        assert_eq!(config.target.remote_dir, "/var/www/agrotalhoes");
        assert_eq!(
            config.target.remote_command,
            "chmod +x agro-deploy && ./agro-deploy remote-update"
        );
        assert_eq!(config.bundle.archive, PathBuf::from("deploy.tar.gz"));
        assert!(config.bundle.paths.contains(&"manage.py".to_string()));
        assert_eq!(config.update.services, vec!["gunicorn", "nginx"]);
        assert!(config.update.extra_env.is_empty());
        assert_eq!(config.update.migration_policy(), MigrationPolicy::Continue);
        assert_eq!(config.database.name, "db_talhoes");
        assert!(config.command_timeout().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = DeployConfig::from_toml(
            r#"
            command_timeout_secs = 900

            [target]
            host = "10.0.0.5"
            user = "deploy"

            [update]
            layout = "releases"
            halt_on_migration_failure = true

            [database]
            engine = "postgresql"
            "#,
        )
        .unwrap();

        assert_eq!(config.target.host, "10.0.0.5");
        assert_eq!(config.target.user, "deploy");
        assert_eq!(config.target.ssh_port, 22);
        assert_eq!(config.update.layout, RemoteLayout::Releases);
        assert_eq!(config.update.migration_policy(), MigrationPolicy::Halt);
        assert_eq!(config.update.git_branch, "main");
        assert_eq!(config.database.engine, DatabaseEngine::Postgresql);
        assert_eq!(config.database.host_or_default(), "localhost");
        assert_eq!(config.command_timeout(), Some(Duration::from_secs(900)));
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = DeployConfig::from_toml("[target]\nssh_port = \"abc\"").unwrap_err();
        assert!(matches!(err, DeployError::Config(_)));
    }

    #[test]
    fn test_explicit_missing_file_fails() {
        let err = DeployConfig::load(Some(Path::new("/nonexistent/deploy.toml"))).unwrap_err();
        assert!(matches!(err, DeployError::Config(_)));
    }

    #[test]
    fn test_validate_rejects_empty_bundle() {
        let mut config = DeployConfig::default();
        config.bundle.paths.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_resolve_relative_to_deploy_dir() {
        let mut update = UpdateConfig::default();
        update.deploy_dir = PathBuf::from("/var/www/agrotalhoes");
        assert_eq!(
            update.resolve(Path::new("logs")),
            PathBuf::from("/var/www/agrotalhoes/logs")
        );
        assert_eq!(update.resolve(Path::new("/tmp/x")), PathBuf::from("/tmp/x"));
    }
}
