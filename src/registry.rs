//! 持久化的进程注册表
//!
//! 所有修改都是“加锁 → 读取 → 修改 → 原子替换 → 解锁”的完整周期。

use std::fs::{File, OpenOptions};
use std::io::Write;

use nix::fcntl::{Flock, FlockArg};

use crate::config::Paths;
use crate::error::{BgprocError, Result};
use crate::models::{ProcessRecord, Registry};
use crate::services::process_checker::is_running;

pub struct RegistryStore {
    paths: Paths,
}

/// 持有 registry.lock 上的排他 flock，drop 时释放
pub(crate) type RegistryLock = Flock<File>;

pub(crate) fn lock_registry(paths: &Paths) -> Result<RegistryLock> {
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(paths.lock_path())?;

    Flock::lock(file, FlockArg::LockExclusive).map_err(|(_, errno)| BgprocError::Io(errno.into()))
}

impl RegistryStore {
    pub fn new(paths: Paths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &Paths {
        &self.paths
    }

    /// 文件不存在或无法解析时返回空注册表
    pub fn read(&self) -> Registry {
        let path = self.paths.registry_path();
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(_) => return Registry::new(),
        };

        match serde_json::from_str(&content) {
            Ok(registry) => registry,
            Err(e) => {
                log::warn!("Ignoring unreadable registry {}: {}", path.display(), e);
                Registry::new()
            }
        }
    }

    /// 写入完整注册表（临时文件 + rename）
    pub fn write(&self, registry: &Registry) -> Result<()> {
        self.paths.ensure()?;

        let mut tmp = tempfile::NamedTempFile::new_in(self.paths.data_dir())?;
        serde_json::to_writer_pretty(&mut tmp, registry)?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.paths.registry_path())
            .map_err(|e| BgprocError::Io(e.error))?;
        Ok(())
    }

    /// 在锁内执行一次读-改-写；闭包返回错误时不写回
    pub fn update<T>(&self, f: impl FnOnce(&mut Registry) -> Result<T>) -> Result<T> {
        self.paths.ensure()?;
        let _lock = lock_registry(&self.paths)?;

        let mut registry = self.read();
        let out = f(&mut registry)?;
        self.write(&registry)?;
        Ok(out)
    }

    /// 注册进程；同名进程仍在运行时返回 AlreadyRunning
    ///
    /// 同名旧记录已死亡时，先删除它的日志
    pub fn add(&self, name: &str, record: ProcessRecord) -> Result<()> {
        self.update(|registry| {
            if let Some(existing) = registry.get(name) {
                if is_running(existing.pid) {
                    return Err(BgprocError::AlreadyRunning {
                        name: name.to_string(),
                        pid: existing.pid,
                    });
                }
                log::debug!("Replacing dead record '{}' (PID {})", name, existing.pid);
                self.paths.log_paths(name).remove();
            }

            log::debug!("Registering '{}' as PID {}", name, record.pid);
            registry.insert(name.to_string(), record);
            Ok(())
        })
    }

    /// 删除记录，不存在时不报错
    pub fn remove(&self, name: &str) -> Result<Option<ProcessRecord>> {
        self.update(|registry| Ok(registry.remove(name)))
    }

    pub fn get(&self, name: &str) -> Option<ProcessRecord> {
        self.read().remove(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::process::Command;

    fn store() -> (tempfile::TempDir, RegistryStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = RegistryStore::new(Paths::new(dir.path().join("data")));
        (dir, store)
    }

    fn record(pid: u32) -> ProcessRecord {
        ProcessRecord::new(pid, vec!["sleep".into(), "60".into()], PathBuf::from("/tmp"), Some(5))
    }

    fn dead_pid() -> u32 {
        let mut child = Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        pid
    }

    #[test]
    fn test_read_missing_is_empty() {
        let (_dir, store) = store();
        assert!(store.read().is_empty());
        assert!(store.get("nope").is_none());
    }

    #[test]
    fn test_read_corrupt_is_empty() {
        let (_dir, store) = store();
        store.paths().ensure().unwrap();
        std::fs::write(store.paths().registry_path(), "{ not json").unwrap();
        assert!(store.read().is_empty());
    }

    #[test]
    fn test_write_read_round_trip() {
        let (_dir, store) = store();
        let mut registry = Registry::new();
        let mut first = record(100);
        first.pid_start_time = Some(1_700_000_000);
        registry.insert("a".into(), first);
        registry.insert("b".into(), ProcessRecord::new(200, vec!["x".into()], PathBuf::from("/"), None));

        store.write(&registry).unwrap();
        assert_eq!(store.read(), registry);
    }

    #[test]
    fn test_add_rejects_live_duplicate() {
        let (_dir, store) = store();
        store.add("me", record(std::process::id())).unwrap();

        let err = store.add("me", record(std::process::id())).unwrap_err();
        assert!(matches!(err, BgprocError::AlreadyRunning { .. }));
    }

    #[test]
    fn test_add_over_dead_record_drops_old_logs() {
        let (_dir, store) = store();
        store.add("svc", record(dead_pid())).unwrap();

        let logs = store.paths().log_paths("svc");
        std::fs::write(&logs.stdout, "old output").unwrap();
        std::fs::write(&logs.stderr, "old errors").unwrap();

        store.add("svc", record(std::process::id())).unwrap();
        assert!(!logs.stdout.exists());
        assert!(!logs.stderr.exists());
        assert_eq!(store.get("svc").unwrap().pid, std::process::id());
    }

    #[test]
    fn test_remove_is_idempotent() {
        let (_dir, store) = store();
        store.add("gone", record(dead_pid())).unwrap();

        assert!(store.remove("gone").unwrap().is_some());
        assert!(store.remove("gone").unwrap().is_none());
        assert!(store.read().is_empty());
    }

    #[test]
    fn test_update_error_does_not_write() {
        let (_dir, store) = store();
        let result: Result<()> = store.update(|registry| {
            registry.insert("temp".into(), record(1));
            Err(BgprocError::NotFound("temp".into()))
        });
        assert!(result.is_err());
        assert!(store.read().is_empty());
    }

    #[test]
    fn test_concurrent_adds_keep_every_name() {
        let (_dir, store) = store();
        let store = std::sync::Arc::new(store);
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || store.add(&format!("p{}", i), record(1)).unwrap())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.read().len(), 8);
    }

    #[test]
    fn test_registry_lock_is_exclusive_until_dropped() {
        let (_dir, store) = store();
        store.paths().ensure().unwrap();
        let held = lock_registry(store.paths()).unwrap();

        let other = || std::fs::OpenOptions::new().write(true).open(store.paths().lock_path()).unwrap();
        assert!(Flock::lock(other(), FlockArg::LockExclusiveNonblock).is_err());

        drop(held);
        assert!(Flock::lock(other(), FlockArg::LockExclusiveNonblock).is_ok());
    }
}
