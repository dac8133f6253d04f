//! 环境变量覆盖
//!
//! 在配置文件之后、命令行参数之前生效

use std::env;
use std::path::PathBuf;
use tracing::warn;

use crate::config::file::DeployConfig;
use crate::domain::database::DatabaseEngine;

/// 环境变量中的配置覆盖项
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EnvConfig {
    pub host: Option<String>,
    pub user: Option<String>,
    pub remote_dir: Option<String>,
    pub ssh_port: Option<u16>,
    pub identity_file: Option<String>,
    pub deploy_dir: Option<PathBuf>,
    pub halt_on_migration_failure: Option<bool>,
    pub command_timeout_secs: Option<u64>,
    pub db_engine: Option<DatabaseEngine>,
    pub db_name: Option<String>,
    pub db_host: Option<String>,
    pub db_port: Option<u16>,
    pub db_user: Option<String>,
    pub db_password: Option<String>,
}

impl EnvConfig {
    /// 从环境变量加载配置
    pub fn from_env() -> Self {
        // Host / user - 支持旧脚本中的名称
        let host = load_with_fallback("AGRO_DEPLOY_HOST", "VPS_HOST");
        let user = load_with_fallback("AGRO_DEPLOY_USER", "VPS_USER");
        if env::var("VPS_HOST").is_ok() || env::var("VPS_USER").is_ok() {
            warn!("Deprecated environment variables detected. Please use AGRO_DEPLOY_HOST and AGRO_DEPLOY_USER");
        }

        let remote_dir = non_empty("AGRO_DEPLOY_REMOTE_DIR");
        let ssh_port = env::var("AGRO_DEPLOY_SSH_PORT")
            .ok()
            .and_then(|v| v.parse().ok());
        let identity_file = non_empty("AGRO_DEPLOY_IDENTITY_FILE");
        let deploy_dir = non_empty("AGRO_DEPLOY_DIR").map(PathBuf::from);

        let halt_on_migration_failure = env::var("AGRO_DEPLOY_HALT_ON_MIGRATION_FAILURE")
            .ok()
            .map(|v| parse_bool(&v));

        let command_timeout_secs = env::var("AGRO_DEPLOY_COMMAND_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok());

        // 与应用 settings.py 使用相同的变量名
        let db_engine = env::var("DB_ENGINE").ok().and_then(|v| {
            let engine = DatabaseEngine::from_str(&v);
            if engine.is_none() {
                warn!(value = %v, "Unsupported DB_ENGINE, ignoring");
            }
            engine
        });
        let db_name = non_empty("DB_NAME");
        let db_host = non_empty("DB_HOST");
        let db_port = env::var("DB_PORT").ok().and_then(|v| v.parse().ok());
        let db_user = non_empty("DB_USER");
        let db_password = non_empty("DB_PASSWORD");

        Self {
            host,
            user,
            remote_dir,
            ssh_port,
            identity_file,
            deploy_dir,
            halt_on_migration_failure,
            command_timeout_secs,
            db_engine,
            db_name,
            db_host,
            db_port,
            db_user,
            db_password,
        }
    }

    /// 覆盖到配置上
    pub fn apply(self, config: &mut DeployConfig) {
        if let Some(host) = self.host {
            config.target.host = host;
        }
        if let Some(user) = self.user {
            config.target.user = user;
        }
        if let Some(dir) = self.remote_dir {
            config.target.remote_dir = dir;
        }
        if let Some(port) = self.ssh_port {
            config.target.ssh_port = port;
        }
        if self.identity_file.is_some() {
            config.target.identity_file = self.identity_file;
        }
        if let Some(dir) = self.deploy_dir {
            config.update.deploy_dir = dir;
        }
        if let Some(halt) = self.halt_on_migration_failure {
            config.update.halt_on_migration_failure = halt;
        }
        if self.command_timeout_secs.is_some() {
            config.command_timeout_secs = self.command_timeout_secs;
        }
        if let Some(engine) = self.db_engine {
            config.database.engine = engine;
        }
        if let Some(name) = self.db_name {
            config.database.name = name;
        }
        if self.db_host.is_some() {
            config.database.host = self.db_host;
        }
        if self.db_port.is_some() {
            config.database.port = self.db_port;
        }
        if self.db_user.is_some() {
            config.database.user = self.db_user;
        }
        if self.db_password.is_some() {
            config.database.password = self.db_password;
        }
    }
}

/// 加载环境变量，支持 fallback
fn load_with_fallback(primary: &str, fallback: &str) -> Option<String> {
    env::var(primary).ok().or_else(|| env::var(fallback).ok())
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

fn parse_bool(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true") || value.eq_ignore_ascii_case("yes")
}

/// 常量
pub mod constants {
    /// 默认配置文件
    pub const DEFAULT_CONFIG_FILE: &str = "deploy.toml";

    /// 归档文件名
    pub const ARCHIVE_NAME: &str = "deploy.tar.gz";

    /// 远程日志目录
    pub const LOG_DIR: &str = "logs";

    /// 日志文件名前缀
    pub const LOG_FILE_PREFIX: &str = "deploy";

    /// 同一秒内的日志文件名最多尝试次数
    pub const MAX_LOG_NAME_ATTEMPTS: usize = 100;

    /// pip 的 cryptography 后端需要的兼容开关
    pub const CRYPTOGRAPHY_LEGACY_FLAG: &str = "CRYPTOGRAPHY_OPENSSL_NO_LEGACY";

    /// 远程更新流程的步骤数
    pub const UPDATE_STEP_COUNT: usize = 7;

    /// releases 布局的目录名
    pub const RELEASES_DIR: &str = "releases";

    /// releases 布局中指向当前版本的软链接
    pub const CURRENT_LINK: &str = "current";

    /// release id 长度（sha256 十六进制前缀）
    pub const RELEASE_ID_LEN: usize = 12;

    /// 版本号
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_with_fallback() {
        env::set_var("AGRO_TEST_PRIMARY", "primary_value");
        env::set_var("AGRO_TEST_FALLBACK", "fallback_value");

        assert_eq!(
            load_with_fallback("AGRO_TEST_PRIMARY", "AGRO_TEST_FALLBACK"),
            Some("primary_value".to_string())
        );

        env::remove_var("AGRO_TEST_PRIMARY");
        assert_eq!(
            load_with_fallback("AGRO_TEST_PRIMARY", "AGRO_TEST_FALLBACK"),
            Some("fallback_value".to_string())
        );

        env::remove_var("AGRO_TEST_FALLBACK");
        assert_eq!(load_with_fallback("AGRO_TEST_PRIMARY", "AGRO_TEST_FALLBACK"), None);
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("1"));
        assert!(parse_bool("TRUE"));
        assert!(parse_bool("yes"));
        assert!(!parse_bool("0"));
        assert!(!parse_bool("off"));
    }

    #[test]
    fn test_apply_overrides_only_set_fields() {
        let mut config = DeployConfig::default();
        let overrides = EnvConfig {
            host: Some("hkfazendas.com".to_string()),
            halt_on_migration_failure: Some(true),
            db_engine: Some(DatabaseEngine::Postgresql),
            db_port: Some(5432),
            ..Default::default()
        };

        overrides.apply(&mut config);

        assert_eq!(config.target.host, "hkfazendas.com");
        assert_eq!(config.target.user, "root");
        assert!(config.update.halt_on_migration_failure);
        assert_eq!(config.database.engine, DatabaseEngine::Postgresql);
        assert_eq!(config.database.port, Some(5432));
        assert_eq!(config.database.name, "db_talhoes");
    }
}
