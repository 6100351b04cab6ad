//! 実行ログ
//!
//! Run Report に含める時系列ログです。各エントリは
//! `[YYYY-MM-DD HH:MM:SS] [LEVEL] message` 形式の文字列で、
//! 同じ内容を `tracing` のイベントとしても出力します。

use std::fmt;

use chrono::Local;
use tracing::{error, info, warn};

/// ログレベル
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
        };
        f.write_str(label)
    }
}

/// 1回の実行のログ
#[derive(Debug, Clone)]
pub struct RunLog {
    workflow: String,
    entries: Vec<String>,
}

impl RunLog {
    pub fn new(workflow: impl Into<String>) -> Self {
        Self {
            workflow: workflow.into(),
            entries: Vec::new(),
        }
    }

    pub fn info(&mut self, message: impl AsRef<str>) {
        self.push(LogLevel::Info, message.as_ref());
    }

    pub fn warning(&mut self, message: impl AsRef<str>) {
        self.push(LogLevel::Warning, message.as_ref());
    }

    pub fn error(&mut self, message: impl AsRef<str>) {
        self.push(LogLevel::Error, message.as_ref());
    }

    /// エントリを追加し、同じ内容を tracing にも流す
    pub fn push(&mut self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Info => info!(workflow = %self.workflow, "{}", message),
            LogLevel::Warning => warn!(workflow = %self.workflow, "{}", message),
            LogLevel::Error => error!(workflow = %self.workflow, "{}", message),
        }
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        self.entries.push(format!("[{}] [{}] {}", timestamp, level, message));
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_entries(self) -> Vec<String> {
        self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_format() {
        let mut log = RunLog::new("wf");
        log.info("[start] START");
        log.warning("[a] skipped");
        log.error("[b] failed");

        let entries = log.entries();
        assert_eq!(entries.len(), 3);

        // [2026-01-02 03:04:05] [INFO] [start] START
        let first = &entries[0];
        assert!(first.starts_with('['));
        assert_eq!(&first[20..], "] [INFO] [start] START");
        assert!(entries[1].ends_with("] [WARNING] [a] skipped"));
        assert!(entries[2].ends_with("] [ERROR] [b] failed"));
    }

    #[test]
    fn test_into_entries_keeps_order() {
        let mut log = RunLog::new("wf");
        for i in 0..5 {
            log.info(format!("entry {}", i));
        }

        let entries = log.into_entries();
        for (i, entry) in entries.iter().enumerate() {
            assert!(entry.ends_with(&format!("entry {}", i)));
        }
    }
}
