use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;

use crate::models::ProcessRecord;

/// `status` / `list` 输出的单条记录
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessStatus {
    pub name: String,
    pub pid: u32,
    pub running: bool,
    pub ports: Vec<u16>,
    /// 便捷字段：最小的端口
    pub port: Option<u16>,
    pub cwd: PathBuf,
    pub command: String,
    pub started_at: DateTime<Utc>,
    pub uptime: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kill_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub pid_reused: bool,
}

impl ProcessStatus {
    pub fn new(name: &str, record: &ProcessRecord, running: bool, ports: Vec<u16>) -> Self {
        let uptime = running.then(|| {
            let secs = (Utc::now() - record.started_at).num_seconds().max(0) as u64;
            format_uptime(secs)
        });
        Self {
            name: name.to_string(),
            pid: record.pid,
            running,
            port: ports.first().copied(),
            ports,
            cwd: record.cwd.clone(),
            command: record.command_line(),
            started_at: record.started_at,
            uptime,
            kill_at: record.kill_at,
            pid_reused: false,
        }
    }
}

/// `start` 的输出
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartReport {
    pub name: String,
    pub pid: u32,
    pub cwd: PathBuf,
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kill_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ports: Option<Vec<u16>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

/// `stop` 的输出
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StopReport {
    pub name: String,
    pub pid: u32,
    pub stopped: bool,
    pub was_running: bool,
    pub signal: Option<&'static str>,
}

/// `clean` 的输出
#[derive(Debug, Clone, Serialize)]
pub struct CleanReport {
    pub cleaned: Vec<String>,
    pub count: usize,
}

impl From<Vec<String>> for CleanReport {
    fn from(cleaned: Vec<String>) -> Self {
        let count = cleaned.len();
        Self { cleaned, count }
    }
}

/// 45s / 3m5s / 2h10m
pub fn format_uptime(seconds: u64) -> String {
    if seconds < 60 {
        return format!("{}s", seconds);
    }
    if seconds < 3600 {
        return format!("{}m{}s", seconds / 60, seconds % 60);
    }
    format!("{}h{}m", seconds / 3600, (seconds % 3600) / 60)
}
