//! 部署相关领域模型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::config::env::constants::UPDATE_STEP_COUNT;

/// 部署运行结果
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum DeployStatus {
    Running,
    Success,
    Failed,
}

impl DeployStatus {
    /// 转换为字符串
    pub fn as_str(&self) -> &'static str {
        match self {
            DeployStatus::Running => "running",
            DeployStatus::Success => "success",
            DeployStatus::Failed => "failed",
        }
    }
}

/// 步骤状态
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
}

/// 远程更新流程中的一个步骤
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeployStep {
    /// 1 起始的序号，对应日志中的 `[n/7]`
    pub index: usize,
    /// 步骤标识 (e.g., "acquire_source", "migrate")
    pub name: String,
    /// 显示名称 (e.g., "Source Acquisition")
    pub display_name: String,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// 持续时间（毫秒）
    pub duration_ms: Option<i64>,
    pub status: StepStatus,
    /// 附加信息
    pub message: Option<String>,
}

impl DeployStep {
    /// 创建新的待执行步骤
    pub fn new(index: usize, name: &str, display_name: &str) -> Self {
        Self {
            index,
            name: name.to_string(),
            display_name: display_name.to_string(),
            started_at: None,
            finished_at: None,
            duration_ms: None,
            status: StepStatus::Pending,
            message: None,
        }
    }

    /// 开始执行步骤
    pub fn start(&mut self) {
        self.started_at = Some(Utc::now());
        self.status = StepStatus::Running;
    }

    /// 完成步骤
    pub fn finish(&mut self, success: bool, message: Option<String>) {
        let now = Utc::now();
        self.finished_at = Some(now);
        self.status = if success {
            StepStatus::Success
        } else {
            StepStatus::Failed
        };
        self.message = message;
        if let Some(started) = self.started_at {
            self.duration_ms = Some((now - started).num_milliseconds());
        }
    }

    /// 日志中的步骤标题，如 `[3/7] Syncing dependencies...`
    pub fn progress(&self, message: &str) -> String {
        format!("[{}/{}] {}", self.index, UPDATE_STEP_COUNT, message)
    }

    /// 跳过步骤
    pub fn skip(&mut self, reason: Option<String>) {
        self.status = StepStatus::Skipped;
        self.message = reason;
    }
}

/// 日志行
#[derive(Clone, Debug, Serialize)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub stream: String, // stdout | stderr
    pub content: String,
}

impl LogLine {
    /// 创建新日志行
    pub fn new(stream: &str, content: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            stream: stream.to_string(),
            content: content.into(),
        }
    }

    /// 创建 stdout 日志行
    pub fn stdout(content: impl Into<String>) -> Self {
        Self::new("stdout", content)
    }

    /// 创建 stderr 日志行
    pub fn stderr(content: impl Into<String>) -> Self {
        Self::new("stderr", content)
    }

    pub fn is_stderr(&self) -> bool {
        self.stream == "stderr"
    }
}

/// 源码获取方式
///
/// 由调用方显式指定，不再根据文件是否存在推断
#[derive(Clone, Debug, PartialEq)]
pub enum SourceStrategy {
    /// 解压上传的归档（解压后删除归档）
    Archive { path: PathBuf },
    /// 从版本库拉取并强制重置到远端分支
    VersionControl { remote: String, branch: String },
}

impl SourceStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            SourceStrategy::Archive { .. } => "archive",
            SourceStrategy::VersionControl { .. } => "git",
        }
    }
}

/// 迁移失败策略
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationPolicy {
    /// 记录失败并继续（旧脚本行为）
    #[default]
    Continue,
    /// 迁移失败时终止
    Halt,
}

impl MigrationPolicy {
    pub fn from_halt_flag(halt: bool) -> Self {
        if halt {
            MigrationPolicy::Halt
        } else {
            MigrationPolicy::Continue
        }
    }
}

/// 远程目录布局
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteLayout {
    /// 直接覆盖部署目录（旧行为）
    #[default]
    InPlace,
    /// 按内容寻址的 releases/<id> 目录 + current 软链接切换
    Releases,
}

/// 部署报告
#[derive(Clone, Debug, Serialize)]
pub struct UpdateReport {
    pub status: DeployStatus,
    pub exit_code: i32,
    pub source: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub log_file: PathBuf,
    /// 激活的 release（仅 releases 布局）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,
    pub steps: Vec<DeployStep>,
}

impl UpdateReport {
    /// 创建新报告
    pub fn new(source: &SourceStrategy, log_file: PathBuf) -> Self {
        Self {
            status: DeployStatus::Running,
            exit_code: 0,
            source: source.name().to_string(),
            started_at: Utc::now(),
            finished_at: None,
            log_file,
            release: None,
            steps: Vec::new(),
        }
    }

    /// 设置运行完成
    pub fn complete(&mut self, status: DeployStatus, exit_code: i32) {
        self.status = status;
        self.exit_code = exit_code;
        self.finished_at = Some(Utc::now());
    }

    /// 查找步骤
    pub fn step(&self, name: &str) -> Option<&DeployStep> {
        self.steps.iter().find(|s| s.name == name)
    }
}
