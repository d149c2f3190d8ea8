//! 独立的超时计时进程
//!
//! 调用 bgproc 的命令会立即退出，所以超时不能靠本进程内的计时器。这里重新
//! 执行自身的隐藏子命令 `__expire`，在新会话中睡眠，到期后若目标仍存活则发送
//! SIGTERM。计时进程不修改注册表，下次 status/list/stop/clean 时才会发现进程已退出。

use nix::sys::signal::Signal;
use std::process::{Command, Stdio};
use std::time::Duration;

use crate::config::LogPaths;
use crate::error::Result;
use crate::services::process_checker::{is_running, pid_reused, signal_quietly};
use crate::services::supervisor::detach;

pub const EXPIRE_SUBCOMMAND: &str = "__expire";

/// 启动计时进程后立即放手，不等待、不跟踪
pub fn schedule(
    name: &str,
    pid: u32,
    seconds: u64,
    pid_start_time: Option<u64>,
    logs: &LogPaths,
) -> Result<()> {
    let exe = std::env::current_exe()?;
    // 计时进程的诊断输出写入目标进程的 stderr 日志
    let stderr = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&logs.stderr)?;

    let mut cmd = Command::new(exe);
    cmd.arg(EXPIRE_SUBCOMMAND)
        .args(["--pid", &pid.to_string()])
        .args(["--after", &seconds.to_string()])
        .args(["--name", name]);
    if let Some(started) = pid_start_time {
        cmd.args(["--started", &started.to_string()]);
    }
    cmd.stdin(Stdio::null()).stdout(Stdio::null()).stderr(stderr);
    detach(&mut cmd);

    let timer = cmd.spawn()?;
    log::debug!("Scheduled expiry of '{}' (PID {}) in {}s via PID {}", name, pid, seconds, timer.id());
    Ok(())
}

/// `__expire` 的主体
pub async fn run(name: &str, pid: u32, after: Duration, pid_start_time: Option<u64>) {
    tokio::time::sleep(after).await;

    if expire(pid, pid_start_time) {
        log::warn!("bgproc: {} killed after {}s timeout", name, after.as_secs());
    }
}

/// 目标仍是我们启动的那个进程时发送 SIGTERM
fn expire(pid: u32, pid_start_time: Option<u64>) -> bool {
    if !is_running(pid) {
        return false;
    }
    if pid_reused(pid, pid_start_time) {
        log::debug!("PID {} now belongs to another process, not signalling", pid);
        return false;
    }
    signal_quietly(pid, Signal::SIGTERM);
    true
}
