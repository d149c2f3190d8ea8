use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::error::{BgprocError, Result};

pub const MAX_NAME_LEN: usize = 64;

/// 注册表：进程名 -> 进程记录
pub type Registry = BTreeMap<String, ProcessRecord>;

/// 进程记录（写入 registry.json）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessRecord {
    /// 启动时分配的 PID
    pub pid: u32,
    /// 完整 argv
    pub command: Vec<String>,
    /// 启动时的工作目录（绝对路径）
    pub cwd: PathBuf,
    pub started_at: DateTime<Utc>,
    /// 超时秒数
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    /// 仅用于展示，真正的超时由独立计时进程执行
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kill_at: Option<DateTime<Utc>>,
    /// 操作系统报告的进程启动时间（Unix 秒），用于识别 PID 复用
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid_start_time: Option<u64>,
}

impl ProcessRecord {
    pub fn new(pid: u32, command: Vec<String>, cwd: PathBuf, timeout: Option<u64>) -> Self {
        let started_at = Utc::now();
        let kill_at = timeout.map(|secs| started_at + chrono::Duration::seconds(secs as i64));
        Self {
            pid,
            command,
            cwd,
            started_at,
            timeout,
            kill_at,
            pid_start_time: None,
        }
    }

    pub fn command_line(&self) -> String {
        self.command.join(" ")
    }
}

/// 校验进程名：只允许字母、数字、`-`、`_`，长度不超过 64
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(BgprocError::Validation("Process name required".to_string()));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(BgprocError::Validation(
            "Process name must contain only alphanumeric characters, hyphens, and underscores"
                .to_string(),
        ));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(BgprocError::Validation(format!(
            "Process name must be {} characters or less",
            MAX_NAME_LEN
        )));
    }
    Ok(())
}
