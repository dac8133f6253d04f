//! 基础设施模块
//!
//! 封装外部依赖（命令执行、ssh/scp、日志文件）

pub mod command;
pub mod ssh;
pub mod tee_log;

pub use command::{CommandExecutor, CommandRunner, CommandSpec, LineSink};
pub use ssh::RemoteTarget;
pub use tee_log::TeeLog;
