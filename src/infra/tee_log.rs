//! 双路日志（控制台 + 追加写入的日志文件）
//!
//! 每次运行创建一个带时间戳的日志文件，同一秒内的多次运行追加数字后缀，
//! 不会互相覆盖。

use chrono::{DateTime, Local};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

use crate::config::env::constants::{LOG_FILE_PREFIX, MAX_LOG_NAME_ATTEMPTS};
use crate::domain::deploy::LogLine;
use crate::infra::command::LineSink;

/// 双路日志
pub struct TeeLog {
    path: PathBuf,
    file: Mutex<File>,
    /// 是否同时输出到控制台
    console: bool,
}

impl TeeLog {
    /// 在 `log_dir` 下创建本次运行的日志文件
    pub fn create(log_dir: &Path, started_at: DateTime<Local>) -> io::Result<Self> {
        std::fs::create_dir_all(log_dir)?;
        let stamp = started_at.format("%Y%m%d_%H%M%S").to_string();

        for attempt in 0..MAX_LOG_NAME_ATTEMPTS {
            let name = log_file_name(&stamp, attempt);
            let path = log_dir.join(name);
            match OpenOptions::new().append(true).create_new(true).open(&path) {
                Ok(file) => {
                    return Ok(Self {
                        path,
                        file: Mutex::new(file),
                        console: true,
                    })
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e),
            }
        }

        Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("no free log file name for {}", stamp),
        ))
    }

    /// 关闭控制台输出（仅写文件）
    pub fn without_console(mut self) -> Self {
        self.console = false;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 写入一行状态信息
    pub fn info(&self, message: &str) {
        self.write(&LogLine::stdout(message));
    }

    /// 写入一行错误信息
    pub fn error(&self, message: &str) {
        self.write(&LogLine::stderr(message));
    }

    fn write(&self, line: &LogLine) {
        if self.console {
            if line.is_stderr() {
                eprintln!("{}", line.content);
            } else {
                println!("{}", line.content);
            }
        }

        let stamp = line.timestamp.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S");
        let mut file = match self.file.lock() {
            Ok(file) => file,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = writeln!(file, "[{}] {}", stamp, line.content) {
            warn!(path = %self.path.display(), error = %e, "Failed to write deploy log");
        }
    }
}

impl LineSink for TeeLog {
    fn line(&self, line: &LogLine) {
        self.write(line);
    }
}

fn log_file_name(stamp: &str, attempt: usize) -> String {
    if attempt == 0 {
        format!("{}_{}.log", LOG_FILE_PREFIX, stamp)
    } else {
        format!("{}_{}_{}.log", LOG_FILE_PREFIX, stamp, attempt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn fixed_time() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 5, 14, 7, 9).unwrap()
    }

    #[test]
    fn test_log_name_embeds_timestamp() {
        let dir = TempDir::new().unwrap();
        let log = TeeLog::create(dir.path(), fixed_time()).unwrap().without_console();

        assert_eq!(
            log.path().file_name().unwrap().to_str().unwrap(),
            "deploy_20240305_140709.log"
        );
    }

    #[test]
    fn test_same_second_runs_get_distinct_files() {
        let dir = TempDir::new().unwrap();
        let first = TeeLog::create(dir.path(), fixed_time()).unwrap().without_console();
        let second = TeeLog::create(dir.path(), fixed_time()).unwrap().without_console();

        first.info("first run done");
        second.info("second run done");

        assert_ne!(first.path(), second.path());
        assert!(second.path().to_str().unwrap().ends_with("_1.log"));
        let first_text = std::fs::read_to_string(first.path()).unwrap();
        assert!(first_text.contains("first run done"));
        assert!(!first_text.contains("second run done"));
    }

    #[test]
    fn test_lines_are_timestamped_and_appended() {
        let dir = TempDir::new().unwrap();
        let log = TeeLog::create(dir.path(), fixed_time()).unwrap().without_console();

        log.info("[1/7] Adjusting environment...");
        log.error("pip failed");
        log.line(&LogLine::stdout("Collecting Django"));

        let text = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with('['));
        assert!(lines[0].ends_with("] [1/7] Adjusting environment..."));
        assert!(lines[2].ends_with("Collecting Django"));
    }
}
