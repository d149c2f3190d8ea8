//! 启动 / 停止 / 清理托管进程
//!
//! 子进程通过 `setsid()` 脱离调用者的会话和进程组，stdout/stderr 以追加方式
//! 写入 `<name>.stdout.log` / `<name>.stderr.log`。调用者退出后子进程继续运行。

use nix::sys::signal::Signal;
use std::fs::{File, OpenOptions};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use crate::config::{LogPaths, Paths};
use crate::error::{BgprocError, Result};
use crate::models::{validate_name, ProcessRecord};
use crate::registry::RegistryStore;
use crate::services::expiry;
use crate::services::process_checker::{
    is_running, pid_reused, process_start_time, send_signal, signal_quietly,
};

/// --force 时等待旧进程退出的上限
const EVICT_GRACE: Duration = Duration::from_secs(2);
const EVICT_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    /// 超时秒数，到期后由独立计时进程发送 SIGTERM
    pub timeout: Option<u64>,
    /// 同名进程仍在运行时先终止它
    pub force: bool,
}

/// 刚启动的进程；调用者持有 Child 以便在等待端口期间回收
pub struct Started {
    pub name: String,
    pub record: ProcessRecord,
    pub child: Child,
    pub log_paths: LogPaths,
}

pub enum CleanTarget {
    Name(String),
    All,
}

/// `stop` 的结果
#[derive(Debug)]
pub struct Stopped {
    pub pid: u32,
    pub was_running: bool,
    pub signal: Option<Signal>,
}

pub struct Supervisor {
    store: RegistryStore,
}

/// 记录中的 PID 仍然存活，且没有被其他进程复用
pub fn owns(record: &ProcessRecord) -> bool {
    is_running(record.pid) && !pid_reused(record.pid, record.pid_start_time)
}

impl Supervisor {
    pub fn new(paths: Paths) -> Self {
        Self {
            store: RegistryStore::new(paths),
        }
    }

    pub fn store(&self) -> &RegistryStore {
        &self.store
    }

    pub fn paths(&self) -> &Paths {
        self.store.paths()
    }

    pub fn start(
        &self,
        name: &str,
        command: Vec<String>,
        cwd: PathBuf,
        options: StartOptions,
    ) -> Result<Started> {
        validate_name(name)?;
        if command.is_empty() {
            return Err(BgprocError::NoCommand);
        }

        if options.force {
            self.evict(name)?;
        }
        self.reap_stale(name)?;

        let paths = self.paths();
        paths.ensure()?;
        let log_paths = paths.log_paths(name);
        let mut child = spawn_detached(&command, &cwd, &log_paths)?;
        let pid = child.id();
        log::debug!("Spawned '{}' as PID {}: {:?}", name, pid, command);

        let mut record = ProcessRecord::new(pid, command, cwd, options.timeout);
        record.pid_start_time = process_start_time(pid);

        if let Err(e) = self.store.add(name, record.clone()) {
            // 无法登记的进程不能留下
            signal_quietly(pid, Signal::SIGTERM);
            reap_within(&mut child, EVICT_GRACE);
            return Err(e);
        }

        if let Some(seconds) = options.timeout {
            if let Err(e) = expiry::schedule(name, pid, seconds, record.pid_start_time, &log_paths) {
                log::warn!("Failed to schedule timeout for '{}': {}", name, e);
            }
        }

        Ok(Started {
            name: name.to_string(),
            record,
            child,
            log_paths,
        })
    }

    /// 终止同名的旧进程并删除记录和旧日志（忽略信号错误）
    fn evict(&self, name: &str) -> Result<()> {
        let Some(existing) = self.store.get(name) else {
            return Ok(());
        };

        if owns(&existing) {
            log::debug!("Force restart: terminating PID {} ('{}')", existing.pid, name);
            signal_quietly(existing.pid, Signal::SIGTERM);
            wait_for_exit(existing.pid, EVICT_GRACE);
        }

        self.store.remove(name)?;
        self.paths().log_paths(name).remove();
        Ok(())
    }

    /// 同名记录仍存活时报 AlreadyRunning；已死亡时删除记录和日志
    ///
    /// 在打开新日志之前执行，这样 add 不会删掉新进程的日志
    fn reap_stale(&self, name: &str) -> Result<()> {
        let paths = self.paths().clone();
        self.store.update(|registry| {
            if let Some(existing) = registry.get(name) {
                if owns(existing) {
                    return Err(BgprocError::AlreadyRunning {
                        name: name.to_string(),
                        pid: existing.pid,
                    });
                }
                log::debug!("Dropping stale record '{}' (PID {})", name, existing.pid);
                registry.remove(name);
                paths.log_paths(name).remove();
            }
            Ok(())
        })
    }

    /// SIGTERM（默认）或 SIGKILL（force）；无论信号是否成功都删除记录
    ///
    /// 查找与删除在同一次加锁内完成，信号在释放锁之后发送
    pub fn stop(&self, name: &str, force: bool) -> Result<Stopped> {
        let (record, was_running) = self.store.update(|registry| {
            let record = registry
                .remove(name)
                .ok_or_else(|| BgprocError::NotFound(name.to_string()))?;
            let was_running = owns(&record);
            Ok((record, was_running))
        })?;

        let signal = was_running.then_some(if force { Signal::SIGKILL } else { Signal::SIGTERM });
        match signal {
            Some(sig) => send_signal(record.pid, sig)?,
            None => log::warn!("Process '{}' (PID {}) was already dead", name, record.pid),
        }

        Ok(Stopped {
            pid: record.pid,
            was_running,
            signal,
        })
    }

    /// 删除已死亡进程的记录和日志，返回被清理的名称
    pub fn clean(&self, target: CleanTarget) -> Result<Vec<String>> {
        let cleaned = match target {
            CleanTarget::Name(name) => {
                validate_name(&name)?;
                self.store.update(|registry| {
                    let record = registry
                        .get(&name)
                        .ok_or_else(|| BgprocError::NotFound(name.clone()))?;
                    if owns(record) {
                        return Err(BgprocError::StillRunning(name.clone()));
                    }
                    registry.remove(&name);
                    Ok(vec![name.clone()])
                })?
            }
            CleanTarget::All => self.store.update(|registry| {
                let dead: Vec<String> = registry
                    .iter()
                    .filter(|(_, record)| !owns(record))
                    .map(|(name, _)| name.clone())
                    .collect();
                for name in &dead {
                    registry.remove(name);
                }
                Ok(dead)
            })?,
        };

        for name in &cleaned {
            self.paths().log_paths(name).remove();
        }
        Ok(cleaned)
    }
}

fn open_append(path: &Path) -> Result<File> {
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}

/// 在新会话中启动进程，不受调用者进程组信号影响
fn spawn_detached(command: &[String], cwd: &Path, logs: &LogPaths) -> Result<Child> {
    let stdout = open_append(&logs.stdout)?;
    let stderr = open_append(&logs.stderr)?;

    let mut cmd = Command::new(&command[0]);
    cmd.args(&command[1..])
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(stdout)
        .stderr(stderr);
    detach(&mut cmd);

    Ok(cmd.spawn()?)
}

/// 子进程在 exec 前调用 setsid()
pub(crate) fn detach(cmd: &mut Command) {
    // SAFETY: setsid() 是 async-signal-safe 的，可以在 pre_exec 中调用
    unsafe {
        cmd.pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

/// 轮询直到 PID 消失或超时
fn wait_for_exit(pid: u32, limit: Duration) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if !is_running(pid) {
            return true;
        }
        std::thread::sleep(EVICT_POLL);
    }
    !is_running(pid)
}

/// 在限定时间内回收自己的子进程
pub fn reap_within(child: &mut Child, limit: Duration) -> bool {
    let deadline = Instant::now() + limit;
    loop {
        match child.try_wait() {
            Ok(Some(_)) => return true,
            Ok(None) if Instant::now() < deadline => std::thread::sleep(Duration::from_millis(50)),
            Ok(None) => return false,
            Err(e) => {
                log::debug!("try_wait on PID {} failed: {}", child.id(), e);
                return false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn supervisor() -> (tempfile::TempDir, Supervisor) {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = Supervisor::new(Paths::new(dir.path().join("data")));
        (dir, supervisor)
    }

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    fn cwd() -> PathBuf {
        std::env::current_dir().unwrap()
    }

    #[test]
    fn test_start_registers_running_process() {
        let (_dir, sup) = supervisor();
        let mut started = sup
            .start("napper", argv(&["sleep", "30"]), cwd(), StartOptions::default())
            .unwrap();

        let record = sup.store().get("napper").unwrap();
        assert_eq!(record.pid, started.child.id());
        assert!(is_running(record.pid));

        let stopped = sup.stop("napper", false).unwrap();
        assert!(stopped.was_running);
        assert_eq!(stopped.signal, Some(Signal::SIGTERM));
        assert!(reap_within(&mut started.child, Duration::from_secs(5)));
        assert!(sup.store().get("napper").is_none());
    }

    #[test]
    fn test_duplicate_start_is_rejected() {
        let (_dir, sup) = supervisor();
        let mut first = sup
            .start("dup", argv(&["sleep", "30"]), cwd(), StartOptions::default())
            .unwrap();

        let err = sup
            .start("dup", argv(&["sleep", "30"]), cwd(), StartOptions::default())
            .err()
            .unwrap();
        assert!(matches!(err, BgprocError::AlreadyRunning { .. }));
        assert!(is_running(first.child.id()));

        sup.stop("dup", true).unwrap();
        reap_within(&mut first.child, Duration::from_secs(5));
    }

    #[test]
    fn test_force_start_replaces_process() {
        let (_dir, sup) = supervisor();
        let mut first = sup
            .start("again", argv(&["sleep", "30"]), cwd(), StartOptions::default())
            .unwrap();
        // 旧进程是本测试的子进程，在后台回收以便 evict 看到它退出
        let old_pid = first.child.id();
        let reaper = std::thread::spawn(move || first.child.wait());

        let options = StartOptions { force: true, ..Default::default() };
        let mut second = sup
            .start("again", argv(&["sleep", "30"]), cwd(), options)
            .unwrap();
        reaper.join().unwrap().unwrap();

        assert_ne!(second.child.id(), old_pid);
        assert_eq!(sup.store().get("again").unwrap().pid, second.child.id());

        sup.stop("again", true).unwrap();
        reap_within(&mut second.child, Duration::from_secs(5));
    }

    #[test]
    fn test_start_rejects_bad_input() {
        let (_dir, sup) = supervisor();
        assert!(matches!(
            sup.start("../evil", argv(&["true"]), cwd(), StartOptions::default()),
            Err(BgprocError::Validation(_))
        ));
        assert!(matches!(
            sup.start("empty", Vec::new(), cwd(), StartOptions::default()),
            Err(BgprocError::NoCommand)
        ));
    }

    #[test]
    fn test_output_goes_to_logs() {
        let (_dir, sup) = supervisor();
        let mut started = sup
            .start("echoer", argv(&["sh", "-c", "echo out; echo err >&2"]), cwd(), StartOptions::default())
            .unwrap();
        assert!(reap_within(&mut started.child, Duration::from_secs(5)));

        let out = std::fs::read_to_string(&started.log_paths.stdout).unwrap();
        let err = std::fs::read_to_string(&started.log_paths.stderr).unwrap();
        assert_eq!(out.trim(), "out");
        assert_eq!(err.trim(), "err");
    }

    #[test]
    fn test_stop_dead_process_still_removes_entry() {
        let (_dir, sup) = supervisor();
        let mut started = sup
            .start("brief", argv(&["true"]), cwd(), StartOptions::default())
            .unwrap();
        reap_within(&mut started.child, Duration::from_secs(5));

        let stopped = sup.stop("brief", false).unwrap();
        assert!(!stopped.was_running);
        assert!(stopped.signal.is_none());
        assert!(sup.store().get("brief").is_none());
        assert!(matches!(sup.stop("brief", false), Err(BgprocError::NotFound(_))));
    }

    #[test]
    fn test_clean_named_and_all() {
        let (_dir, sup) = supervisor();
        let mut live = sup
            .start("live", argv(&["sleep", "30"]), cwd(), StartOptions::default())
            .unwrap();
        for name in ["dead1", "dead2"] {
            let mut started = sup
                .start(name, argv(&["true"]), cwd(), StartOptions::default())
                .unwrap();
            reap_within(&mut started.child, Duration::from_secs(5));
        }

        assert!(matches!(
            sup.clean(CleanTarget::Name("live".into())),
            Err(BgprocError::StillRunning(_))
        ));
        assert!(matches!(
            sup.clean(CleanTarget::Name("ghost".into())),
            Err(BgprocError::NotFound(_))
        ));

        let logs = sup.paths().log_paths("dead1");
        assert!(logs.stdout.exists());
        assert_eq!(sup.clean(CleanTarget::Name("dead1".into())).unwrap(), vec!["dead1"]);
        assert!(!logs.stdout.exists());

        assert_eq!(sup.clean(CleanTarget::All).unwrap(), vec!["dead2"]);
        let remaining: Vec<_> = sup.store().read().into_keys().collect();
        assert_eq!(remaining, vec!["live"]);

        sup.stop("live", true).unwrap();
        reap_within(&mut live.child, Duration::from_secs(5));
    }

    #[test]
    fn test_restart_after_death_starts_fresh_logs() {
        let (_dir, sup) = supervisor();
        let mut first = sup
            .start("cycle", argv(&["sh", "-c", "echo first"]), cwd(), StartOptions::default())
            .unwrap();
        reap_within(&mut first.child, Duration::from_secs(5));

        let mut second = sup
            .start("cycle", argv(&["sh", "-c", "echo second"]), cwd(), StartOptions::default())
            .unwrap();
        reap_within(&mut second.child, Duration::from_secs(5));

        let out = std::fs::read_to_string(&second.log_paths.stdout).unwrap();
        assert_eq!(out.trim(), "second");
    }

    #[test]
    fn test_stop_acts_on_record_seen_under_lock() {
        let (_dir, sup) = supervisor();
        let dead = |argv0: &str| {
            let mut child = Command::new(argv0).spawn().unwrap();
            let pid = child.id();
            child.wait().unwrap();
            pid
        };
        let old_pid = dead("true");
        let new_pid = dead("true");
        sup.store()
            .add("swap", ProcessRecord::new(old_pid, argv(&["old"]), cwd(), None))
            .unwrap();

        // 持锁期间另一个调用者替换了记录
        let held = crate::registry::lock_registry(sup.paths()).unwrap();
        let stopped = std::thread::scope(|scope| {
            let stopper = scope.spawn(|| sup.stop("swap", false));
            std::thread::sleep(Duration::from_millis(200));
            let mut registry = sup.store().read();
            registry.insert("swap".into(), ProcessRecord::new(new_pid, argv(&["new"]), cwd(), None));
            sup.store().write(&registry).unwrap();
            drop(held);
            stopper.join().unwrap()
        })
        .unwrap();

        assert_eq!(stopped.pid, new_pid);
        assert!(!stopped.was_running);
        assert!(sup.store().get("swap").is_none());
    }
}
