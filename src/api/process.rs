use anyhow::Context;
use std::time::Duration;

use crate::api::{emit, required_name};
use crate::cli::{CleanArgs, StartArgs, StopArgs};
use crate::error::BgprocError;
use crate::models::{CleanReport, StartReport, StopReport};
use crate::services::supervisor::reap_within;
use crate::services::wait::{wait_for_port, ChildWatch, IntervalTicker, WaitOutcome, WaitPolicy, POLL_INTERVAL};
use crate::services::{CleanTarget, StartOptions, Supervisor};

/// 超时终止后回收子进程的上限
const REAP_GRACE: Duration = Duration::from_secs(2);

pub async fn start_process(supervisor: &Supervisor, args: StartArgs) -> anyhow::Result<()> {
    if args.keep && args.wait_for_port.is_none() {
        return Err(BgprocError::Validation("--keep requires --wait-for-port".to_string()).into());
    }

    let cwd = std::env::current_dir().context("cannot determine current directory")?;
    let options = StartOptions {
        timeout: args.timeout,
        force: args.force,
    };
    let mut started = supervisor.start(&args.name, args.command, cwd, options)?;
    let pid = started.record.pid;

    let mut report = StartReport {
        name: started.name.clone(),
        pid,
        cwd: started.record.cwd.clone(),
        command: started.record.command_line(),
        kill_at: started.record.kill_at,
        ports: None,
        port: None,
    };

    if let Some(limit) = args.wait_for_port {
        // -w 0 与不带值相同：不设超时
        let limit = limit.filter(|secs| *secs > 0);
        let policy = WaitPolicy {
            timeout: limit.map(Duration::from_secs),
            kill_on_timeout: !args.keep,
        };

        let outcome = {
            let mut watch = ChildWatch::new(&mut started.child, started.log_paths.stdout.clone());
            let mut ticker = IntervalTicker::new(POLL_INTERVAL);
            tokio::select! {
                outcome = wait_for_port(&mut watch, &mut ticker, policy) => outcome,
                _ = tokio::signal::ctrl_c() => {
                    return Err(BgprocError::Interrupted(pid).into());
                }
            }
        };

        match outcome {
            WaitOutcome::Ready(ports) => {
                report.port = ports.first().copied();
                report.ports = Some(ports);
            }
            WaitOutcome::DiedBeforePort => {
                return Err(BgprocError::DiedBeforePort {
                    name: started.name,
                    pid,
                }
                .into());
            }
            WaitOutcome::TimedOut { killed } => {
                if killed && !reap_within(&mut started.child, REAP_GRACE) {
                    log::warn!("PID {} did not exit within {:?} of SIGTERM", pid, REAP_GRACE);
                }
                return Err(BgprocError::TimedOut {
                    seconds: limit.unwrap_or(0),
                    pid,
                    killed,
                }
                .into());
            }
        }
    }

    emit(&report)?;
    Ok(())
}

pub fn stop_process(supervisor: &Supervisor, args: StopArgs) -> anyhow::Result<()> {
    let name = required_name(&args.target)?;
    let stopped = supervisor.stop(name, args.force)?;

    emit(&StopReport {
        name: name.to_string(),
        pid: stopped.pid,
        stopped: true,
        was_running: stopped.was_running,
        signal: stopped.signal.map(|s| s.as_str()),
    })?;
    Ok(())
}

pub fn clean_processes(supervisor: &Supervisor, args: CleanArgs) -> anyhow::Result<()> {
    let target = if args.all {
        CleanTarget::All
    } else if let Some(name) = args.target.name() {
        CleanTarget::Name(name.to_string())
    } else {
        return Err(BgprocError::Validation("Specify a process name or use --all".to_string()).into());
    };

    let cleaned = supervisor.clean(target)?;
    emit(&CleanReport::from(cleaned))?;
    Ok(())
}
