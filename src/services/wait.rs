//! 启动后阻塞等待端口
//!
//! 每个 tick 依次：进程已退出 → DiedBeforePort；超时 → TimedOut（默认先 SIGTERM）；
//! 检测到端口 → Ready。未指定超时时会一直等待。

use nix::sys::signal::Signal;
use std::path::PathBuf;
use std::process::Child;
use std::time::{Duration, Instant};

use crate::services::log_follower::LogFollower;
use crate::services::port_detector::detect_ports_with_fallback;
use crate::services::process_checker::{is_running, signal_quietly};

/// 端口轮询间隔
pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// 等待中被观察的进程
pub trait PortWatch {
    fn is_alive(&mut self) -> bool;
    fn ports(&mut self) -> Vec<u16>;
    fn terminate(&mut self);
    /// 可选：把新输出转发给调用者，不影响结果
    fn relay_output(&mut self) {}
}

/// 时钟与睡眠
#[allow(async_fn_in_trait)]
pub trait Ticker {
    fn elapsed(&self) -> Duration;
    async fn tick(&mut self);
}

#[derive(Debug, Clone, Copy)]
pub struct WaitPolicy {
    pub timeout: Option<Duration>,
    pub kill_on_timeout: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    /// 端口从小到大
    Ready(Vec<u16>),
    DiedBeforePort,
    TimedOut { killed: bool },
}

pub async fn wait_for_port<W: PortWatch, T: Ticker>(
    watch: &mut W,
    ticker: &mut T,
    policy: WaitPolicy,
) -> WaitOutcome {
    loop {
        watch.relay_output();

        if !watch.is_alive() {
            return WaitOutcome::DiedBeforePort;
        }

        if let Some(limit) = policy.timeout {
            if ticker.elapsed() >= limit {
                if policy.kill_on_timeout {
                    watch.terminate();
                }
                return WaitOutcome::TimedOut {
                    killed: policy.kill_on_timeout,
                };
            }
        }

        let mut ports = watch.ports();
        if !ports.is_empty() {
            ports.sort_unstable();
            ports.dedup();
            return WaitOutcome::Ready(ports);
        }

        ticker.tick().await;
    }
}

/// 基于 tokio 的真实时钟
pub struct IntervalTicker {
    started: Instant,
    interval: Duration,
}

impl IntervalTicker {
    pub fn new(interval: Duration) -> Self {
        Self {
            started: Instant::now(),
            interval,
        }
    }
}

impl Ticker for IntervalTicker {
    fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    async fn tick(&mut self) {
        tokio::time::sleep(self.interval).await;
    }
}

/// 观察本命令刚启动的子进程
pub struct ChildWatch<'a> {
    child: &'a mut Child,
    stdout_log: PathBuf,
    follower: LogFollower,
}

impl<'a> ChildWatch<'a> {
    pub fn new(child: &'a mut Child, stdout_log: PathBuf) -> Self {
        let follower = LogFollower::new(stdout_log.clone());
        Self {
            child,
            stdout_log,
            follower,
        }
    }

    fn pid(&self) -> u32 {
        self.child.id()
    }
}

impl PortWatch for ChildWatch<'_> {
    fn is_alive(&mut self) -> bool {
        // 先回收，避免把僵尸当成存活
        match self.child.try_wait() {
            Ok(Some(status)) => {
                log::debug!("PID {} exited with {}", self.pid(), status);
                false
            }
            _ => is_running(self.pid()),
        }
    }

    fn ports(&mut self) -> Vec<u16> {
        detect_ports_with_fallback(self.pid(), &self.stdout_log)
    }

    fn terminate(&mut self) {
        signal_quietly(self.pid(), Signal::SIGTERM);
    }

    fn relay_output(&mut self) {
        if let Err(e) = self.follower.drain_to(&mut std::io::stderr()) {
            log::debug!("Cannot relay {}: {}", self.follower.path().display(), e);
        }
    }
}
