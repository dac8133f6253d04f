//! 更新上下文
//!
//! 统一的执行上下文：日志、环境变量、命令执行器、当前应用目录

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::file::UpdateConfig;
use crate::domain::deploy::DeployStep;
use crate::infra::command::{CommandError, CommandExecutor, CommandOutcome, CommandSpec};
use crate::infra::tee_log::TeeLog;

/// 更新执行上下文
pub struct UpdateContext<'a> {
    pub settings: &'a UpdateConfig,
    pub executor: &'a dyn CommandExecutor,
    pub log: &'a TeeLog,
    /// 部署目录（绝对路径）
    pub deploy_dir: PathBuf,
    /// manage.py 所在目录；releases 布局下为 release 目录
    pub app_dir: PathBuf,
    /// 追加到每个子进程的环境变量
    pub env: BTreeMap<String, String>,
    pub timeout: Option<Duration>,
}

impl<'a> UpdateContext<'a> {
    pub fn new(
        settings: &'a UpdateConfig,
        executor: &'a dyn CommandExecutor,
        log: &'a TeeLog,
        deploy_dir: PathBuf,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            settings,
            executor,
            log,
            app_dir: deploy_dir.clone(),
            deploy_dir,
            env: BTreeMap::new(),
            timeout,
        }
    }

    /// 写入步骤标题 `[n/7] ...`
    pub fn step(&self, step: &DeployStep, message: &str) {
        self.log.info(&step.progress(message));
    }

    pub fn log_stdout(&self, content: &str) {
        self.log.info(content);
    }

    pub fn log_stderr(&self, content: &str) {
        self.log.error(content);
    }

    /// 相对部署目录解析路径
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.deploy_dir.join(path)
        }
    }

    /// virtualenv 目录
    pub fn venv_dir(&self) -> PathBuf {
        self.resolve(&self.settings.venv_dir)
    }

    /// virtualenv 中的可执行文件
    pub fn venv_bin(&self, name: &str) -> String {
        self.venv_dir().join("bin").join(name).display().to_string()
    }

    /// 在应用目录中执行的命令，带上下文环境变量和超时
    pub fn command(&self, program: impl Into<String>) -> CommandSpec {
        CommandSpec::new(program)
            .current_dir(&self.app_dir)
            .envs(&self.env)
            .timeout(self.timeout)
    }

    /// 执行命令，输出写入日志
    pub async fn run(&self, spec: CommandSpec) -> Result<CommandOutcome, CommandError> {
        self.log_stdout(&format!(">>> {}", spec.display()));
        let result = self.executor.run(&spec, self.log).await;
        if let Err(ref e) = result {
            self.log_stderr(&format!("Failed to run {}: {}", spec.program, e));
        }
        result
    }
}
