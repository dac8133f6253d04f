//! 数据库引导相关领域模型

use serde::{Deserialize, Serialize};

use crate::error::{DeployError, DeployResult};

/// 名称最大长度（PostgreSQL 标识符上限）
const MAX_NAME_LEN: usize = 63;

/// 数据库类型
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseEngine {
    #[serde(alias = "postgres")]
    Postgresql,
    #[default]
    Mssql,
}

impl DatabaseEngine {
    /// 解析 `DB_ENGINE` 取值
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "postgresql" | "postgres" | "pg" => Some(DatabaseEngine::Postgresql),
            "mssql" | "sqlserver" => Some(DatabaseEngine::Mssql),
            _ => None,
        }
    }

    /// 查询数据库是否存在，输出 `1` 或 `0`
    pub fn exists_query(&self, name: &DatabaseName) -> String {
        match self {
            DatabaseEngine::Postgresql => format!(
                "SELECT COUNT(*) FROM pg_database WHERE datname = '{}'",
                name.as_str()
            ),
            DatabaseEngine::Mssql => format!(
                "SET NOCOUNT ON; SELECT COUNT(*) FROM sys.databases WHERE name = N'{}'",
                name.as_str()
            ),
        }
    }

    /// 创建数据库
    pub fn create_statement(&self, name: &DatabaseName) -> String {
        match self {
            DatabaseEngine::Postgresql => format!("CREATE DATABASE \"{}\"", name.as_str()),
            DatabaseEngine::Mssql => format!("CREATE DATABASE [{}]", name.as_str()),
        }
    }

    /// 管理库（连接时使用）
    pub fn maintenance_database(&self) -> &'static str {
        match self {
            DatabaseEngine::Postgresql => "postgres",
            DatabaseEngine::Mssql => "master",
        }
    }
}

impl std::fmt::Display for DatabaseEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatabaseEngine::Postgresql => write!(f, "postgresql"),
            DatabaseEngine::Mssql => write!(f, "mssql"),
        }
    }
}

/// 经过校验的数据库名称，可安全拼接进 SQL
#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseName(String);

impl DatabaseName {
    pub fn parse(raw: &str) -> DeployResult<Self> {
        let mut chars = raw.chars();
        let valid_first = chars
            .next()
            .map(|c| c.is_ascii_alphabetic() || c == '_')
            .unwrap_or(false);
        let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

        if !valid_first || !valid_rest || raw.len() > MAX_NAME_LEN {
            return Err(DeployError::InvalidDatabaseName(raw.to_string()));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DatabaseName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// 引导结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BootstrapOutcome {
    Created,
    AlreadyExists,
}

/// 解析 COUNT(*) 查询输出
///
/// 忽略空行和表头装饰，取第一行纯数字
pub fn parse_count_output(output: &str) -> Option<u64> {
    output
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && line.chars().all(|c| c.is_ascii_digit()))
        .and_then(|line| line.parse().ok())
}
