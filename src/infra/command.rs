//! 命令执行器
//!
//! 提供统一的命令执行接口，支持：
//! - 实时逐行输出（stdout/stderr 分离）
//! - 可选超时
//! - 可替换的执行器（测试中使用脚本化的假执行器）

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, error, warn};

use crate::domain::deploy::LogLine;

/// 命令执行错误
#[derive(Debug)]
pub enum CommandError {
    /// 命令启动失败
    SpawnFailed { program: String, source: std::io::Error },
    /// 命令超时
    Timeout { program: String, after: Duration },
    /// 等待命令完成失败
    WaitFailed(std::io::Error),
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandError::SpawnFailed { program, source } => {
                write!(f, "Failed to spawn {}: {}", program, source)
            }
            CommandError::Timeout { program, after } => {
                write!(f, "{} timed out after {:?}", program, after)
            }
            CommandError::WaitFailed(e) => write!(f, "Failed to wait for command: {}", e),
        }
    }
}

impl std::error::Error for CommandError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CommandError::SpawnFailed { source, .. } => Some(source),
            CommandError::WaitFailed(e) => Some(e),
            _ => None,
        }
    }
}

/// 待执行的命令
#[derive(Clone, Debug, PartialEq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub work_dir: Option<PathBuf>,
    /// 追加到子进程的环境变量
    pub env: BTreeMap<String, String>,
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            work_dir: None,
            env: BTreeMap::new(),
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.work_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn envs(mut self, env: &BTreeMap<String, String>) -> Self {
        self.env
            .extend(env.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// 用于日志显示的命令行
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// 命令执行结果
#[derive(Clone, Debug, Default)]
pub struct CommandOutcome {
    /// 退出码（被信号终止时为 None）
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutcome {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// 非零时使用的退出码
    pub fn exit_code(&self) -> i32 {
        self.code.unwrap_or(-1)
    }
}

/// 逐行输出的接收方
pub trait LineSink: Send + Sync {
    fn line(&self, line: &LogLine);
}

/// 丢弃所有输出
pub struct NullSink;

impl LineSink for NullSink {
    fn line(&self, _line: &LogLine) {}
}

/// 直接写到控制台
pub struct ConsoleSink;

impl LineSink for ConsoleSink {
    fn line(&self, line: &LogLine) {
        if line.is_stderr() {
            eprintln!("{}", line.content);
        } else {
            println!("{}", line.content);
        }
    }
}

/// 命令执行抽象
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// 执行命令，输出逐行发送到 `sink`，同时收集到结果中
    async fn run(&self, spec: &CommandSpec, sink: &dyn LineSink)
        -> Result<CommandOutcome, CommandError>;
}

/// 基于 tokio::process 的命令执行器
#[derive(Clone, Copy, Debug, Default)]
pub struct CommandRunner;

impl CommandRunner {
    /// 执行命令并流式输出日志
    pub async fn run_with_streaming(
        spec: &CommandSpec,
        sink: &dyn LineSink,
    ) -> Result<CommandOutcome, CommandError> {
        debug!(command = %spec.display(), "Spawning command");

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::inherit())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(ref dir) = spec.work_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|source| CommandError::SpawnFailed {
            program: spec.program.clone(),
            source,
        })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let waited = async {
            let (out, err, status) = tokio::join!(
                read_lines(stdout, "stdout", sink),
                read_lines(stderr, "stderr", sink),
                child.wait()
            );
            (out, err, status)
        };

        let (stdout, stderr, status) = match spec.timeout {
            Some(limit) => match tokio::time::timeout(limit, waited).await {
                Ok(result) => result,
                Err(_) => {
                    error!(command = %spec.display(), "Command timed out after {:?}", limit);
                    // kill_on_drop 负责终止子进程
                    return Err(CommandError::Timeout {
                        program: spec.program.clone(),
                        after: limit,
                    });
                }
            },
            None => waited.await,
        };

        let status = status.map_err(CommandError::WaitFailed)?;
        Ok(CommandOutcome {
            code: status.code(),
            stdout,
            stderr,
        })
    }
}

#[async_trait]
impl CommandExecutor for CommandRunner {
    async fn run(
        &self,
        spec: &CommandSpec,
        sink: &dyn LineSink,
    ) -> Result<CommandOutcome, CommandError> {
        Self::run_with_streaming(spec, sink).await
    }
}

/// 逐行读取直到 EOF
///
/// 非 UTF-8 字节按 lossy 方式替换，管道必须读完，否则子进程会收到 SIGPIPE
async fn read_lines<R>(reader: Option<R>, stream: &str, sink: &dyn LineSink) -> String
where
    R: AsyncRead + Unpin,
{
    let mut collected = String::new();
    let Some(reader) = reader else {
        return collected;
    };
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(|c| c == '\n' || c == '\r');
                sink.line(&LogLine::new(stream, line));
                collected.push_str(line);
                collected.push('\n');
            }
            Err(e) => {
                warn!(stream, error = %e, "Failed to read command output");
                break;
            }
        }
    }
    collected
}

/// 单引号转义，用于拼接远程 shell 命令
pub fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@%+,".contains(c))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[cfg(test)]
pub(crate) mod testing {
    //! 脚本化的假执行器

    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// 按命令行前缀匹配返回预设结果；未匹配的命令返回成功
    #[derive(Default)]
    pub struct ScriptedExecutor {
        rules: Mutex<Vec<(String, VecDeque<CommandOutcome>)>>,
        pub calls: Mutex<Vec<CommandSpec>>,
    }

    impl ScriptedExecutor {
        pub fn new() -> Self {
            Self::default()
        }

        /// 命令行包含 `needle` 时返回 `outcome`（可多次入队）
        pub fn respond(&self, needle: &str, outcome: CommandOutcome) -> &Self {
            let mut rules = self.rules.lock().unwrap();
            if let Some((_, queue)) = rules.iter_mut().find(|(n, _)| n == needle) {
                queue.push_back(outcome);
            } else {
                rules.push((needle.to_string(), VecDeque::from([outcome])));
            }
            self
        }

        pub fn fail(&self, needle: &str, code: i32) -> &Self {
            self.respond(
                needle,
                CommandOutcome {
                    code: Some(code),
                    stdout: String::new(),
                    stderr: format!("{} failed", needle),
                },
            )
        }

        pub fn commands(&self) -> Vec<String> {
            self.calls.lock().unwrap().iter().map(CommandSpec::display).collect()
        }

        pub fn ran(&self, needle: &str) -> bool {
            self.commands().iter().any(|c| c.contains(needle))
        }
    }

    pub fn ok(stdout: &str) -> CommandOutcome {
        CommandOutcome {
            code: Some(0),
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    #[async_trait]
    impl CommandExecutor for ScriptedExecutor {
        async fn run(
            &self,
            spec: &CommandSpec,
            sink: &dyn LineSink,
        ) -> Result<CommandOutcome, CommandError> {
            self.calls.lock().unwrap().push(spec.clone());
            let display = spec.display();

            let outcome = {
                let mut rules = self.rules.lock().unwrap();
                rules
                    .iter_mut()
                    .find(|(needle, queue)| display.contains(needle.as_str()) && !queue.is_empty())
                    .and_then(|(_, queue)| {
                        if queue.len() > 1 {
                            queue.pop_front()
                        } else {
                            queue.front().cloned()
                        }
                    })
                    .unwrap_or_else(|| ok(""))
            };

            for line in outcome.stdout.lines() {
                sink.line(&LogLine::stdout(line));
            }
            for line in outcome.stderr.lines() {
                sink.line(&LogLine::stderr(line));
            }
            Ok(outcome)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Collect(Mutex<Vec<LogLine>>);

    impl LineSink for Collect {
        fn line(&self, line: &LogLine) {
            self.0.lock().unwrap().push(line.clone());
        }
    }

    #[tokio::test]
    async fn test_run_success() {
        let spec = CommandSpec::new("echo").arg("hello").current_dir("/tmp");
        let outcome = CommandRunner::run_with_streaming(&spec, &NullSink).await.unwrap();

        assert!(outcome.success());
        assert!(outcome.stdout.contains("hello"));
    }

    #[tokio::test]
    async fn test_run_not_found() {
        let spec = CommandSpec::new("nonexistent_command_12345");
        let result = CommandRunner::run_with_streaming(&spec, &NullSink).await;

        assert!(matches!(result, Err(CommandError::SpawnFailed { .. })));
    }

    #[tokio::test]
    async fn test_streaming_separates_streams_and_env() {
        let sink = Collect(Mutex::new(Vec::new()));
        let spec = CommandSpec::new("sh")
            .args(["-c", "echo \"$GREETING\"; echo oops >&2; exit 3"])
            .env("GREETING", "ola");

        let outcome = CommandRunner::run_with_streaming(&spec, &sink).await.unwrap();

        assert_eq!(outcome.code, Some(3));
        assert_eq!(outcome.exit_code(), 3);
        let lines = sink.0.lock().unwrap();
        assert!(lines.iter().any(|l| !l.is_stderr() && l.content == "ola"));
        assert!(lines.iter().any(|l| l.is_stderr() && l.content == "oops"));
    }

    #[tokio::test]
    async fn test_non_utf8_output_is_drained() {
        let sink = Collect(Mutex::new(Vec::new()));
        let spec = CommandSpec::new("sh").args([
            "-c",
            "printf 'Instala\\347\\343o\\n'; head -c 200000 /dev/zero | tr '\\0' a; echo; echo done",
        ]);

        let outcome = CommandRunner::run_with_streaming(&spec, &sink).await.unwrap();

        assert_eq!(outcome.code, Some(0));
        assert!(outcome.stdout.starts_with("Instala"));
        assert!(outcome.stdout.contains('\u{FFFD}'));
        assert!(outcome.stdout.len() > 200_000);
        let lines = sink.0.lock().unwrap();
        assert_eq!(lines.last().map(|l| l.content.as_str()), Some("done"));
    }

    #[tokio::test]
    async fn test_timeout() {
        let spec = CommandSpec::new("sleep")
            .arg("5")
            .timeout(Some(Duration::from_millis(100)));
        let result = CommandRunner::run_with_streaming(&spec, &NullSink).await;

        assert!(matches!(result, Err(CommandError::Timeout { .. })));
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("/var/www/agrotalhoes"), "/var/www/agrotalhoes");
        assert_eq!(shell_quote("my dir"), "'my dir'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn test_spec_display() {
        let spec = CommandSpec::new("git").args(["reset", "--hard", "origin/main"]);
        assert_eq!(spec.display(), "git reset --hard origin/main");
    }
}
