use anyhow::Context;
use std::path::PathBuf;

use crate::api::{emit, emit_pretty, required_name};
use crate::cli::{ListArgs, NameArgs};
use crate::config::Paths;
use crate::error::BgprocError;
use crate::models::{ProcessRecord, ProcessStatus};
use crate::services::process_checker::pid_reused;
use crate::services::{detect_ports_with_fallback, is_running, Supervisor};

/// 实时检查一条记录：存活状态、端口、PID 是否被复用
fn inspect(paths: &Paths, name: &str, record: &ProcessRecord) -> ProcessStatus {
    let running = is_running(record.pid);
    let ports = if running {
        detect_ports_with_fallback(record.pid, &paths.log_paths(name).stdout)
    } else {
        Vec::new()
    };

    let mut status = ProcessStatus::new(name, record, running, ports);
    status.pid_reused = running && pid_reused(record.pid, record.pid_start_time);
    status
}

pub fn process_status(supervisor: &Supervisor, args: NameArgs) -> anyhow::Result<()> {
    let name = required_name(&args)?;
    let record = supervisor
        .store()
        .get(name)
        .ok_or_else(|| BgprocError::NotFound(name.to_string()))?;

    emit(&inspect(supervisor.paths(), name, &record))?;
    Ok(())
}

pub fn list_processes(supervisor: &Supervisor, args: ListArgs) -> anyhow::Result<()> {
    let cwd_filter = match args.cwd {
        None => None,
        Some(dir) => Some(resolve_dir(dir)?),
    };

    let statuses: Vec<ProcessStatus> = supervisor
        .store()
        .read()
        .iter()
        .filter(|(_, record)| cwd_filter.as_ref().map_or(true, |dir| &record.cwd == dir))
        .map(|(name, record)| inspect(supervisor.paths(), name, record))
        .collect();

    emit_pretty(&statuses)?;
    Ok(())
}

/// 不带值 = 当前目录；相对路径按当前目录解析
fn resolve_dir(dir: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    let current = std::env::current_dir().context("cannot determine current directory")?;
    let dir = match dir {
        None => return Ok(current),
        Some(dir) if dir.is_absolute() => dir,
        Some(dir) => current.join(dir),
    };
    Ok(dir.canonicalize().unwrap_or(dir))
}
