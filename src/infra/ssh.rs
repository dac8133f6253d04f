//! 远程主机（ssh / scp）命令构造
//!
//! 认证交给外部机制（密码提示、ssh-agent 或 identity 文件），
//! 这里只负责拼接参数。

use std::path::Path;

use crate::config::file::TargetConfig;
use crate::infra::command::{shell_quote, CommandSpec};

/// 远程目标
#[derive(Clone, Debug, PartialEq)]
pub struct RemoteTarget {
    pub host: String,
    pub user: String,
    pub port: u16,
    pub identity_file: Option<String>,
    pub remote_dir: String,
}

impl RemoteTarget {
    pub fn from_config(config: &TargetConfig) -> Self {
        Self {
            host: config.host.clone(),
            user: config.user.clone(),
            port: config.ssh_port,
            identity_file: config.identity_file.clone(),
            remote_dir: config.remote_dir.clone(),
        }
    }

    /// `user@host`
    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }

    pub fn is_root(&self) -> bool {
        self.user == "root"
    }

    /// scp 上传到远程部署目录
    pub fn scp_upload(&self, files: &[&Path]) -> CommandSpec {
        let mut spec = CommandSpec::new("scp").args(["-P".to_string(), self.port.to_string()]);
        if let Some(ref identity) = self.identity_file {
            spec = spec.args(["-i", identity.as_str()]);
        }
        for file in files {
            spec = spec.arg(file.display().to_string());
        }
        // 旧 scp 协议由远程 shell 解析目标路径
        spec.arg(format!("{}:{}/", self.destination(), shell_quote(&self.remote_dir)))
    }

    /// 在远程主机执行命令
    pub fn ssh_exec(&self, remote_command: &str) -> CommandSpec {
        let mut spec = CommandSpec::new("ssh").args(["-p".to_string(), self.port.to_string()]);
        if let Some(ref identity) = self.identity_file {
            spec = spec.args(["-i", identity.as_str()]);
        }
        spec.arg(self.destination()).arg(remote_command)
    }

    /// 进入部署目录后执行命令
    pub fn ssh_exec_in_dir(&self, remote_command: &str) -> CommandSpec {
        self.ssh_exec(&format!(
            "cd {} && {}",
            shell_quote(&self.remote_dir),
            remote_command
        ))
    }
}
