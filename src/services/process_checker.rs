use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid as NixPid;
use std::collections::{BTreeSet, HashMap, VecDeque};
use sysinfo::{Pid, ProcessStatus as OsStatus, ProcessesToUpdate, System};

use crate::error::{BgprocError, Result};

/// 进程树遍历的最大深度
const MAX_TREE_DEPTH: usize = 64;

/// PID 0 和超出 i32 的值都不能发信号（0 代表调用者所在的进程组）
fn to_nix_pid(pid: u32) -> Option<NixPid> {
    if pid == 0 || pid > i32::MAX as u32 {
        return None;
    }
    Some(NixPid::from_raw(pid as i32))
}

/// 检查 PID 是否存活且当前用户可以发信号
///
/// EPERM 和 ESRCH 都视为不在运行；僵尸进程同样视为不在运行
pub fn is_running(pid: u32) -> bool {
    let Some(target) = to_nix_pid(pid) else {
        return false;
    };

    match kill(target, None) {
        Ok(()) => !is_zombie(pid),
        Err(Errno::EPERM) | Err(Errno::ESRCH) => false,
        Err(e) => {
            log::debug!("Liveness probe for PID {} failed: {}", pid, e);
            false
        }
    }
}

fn is_zombie(pid: u32) -> bool {
    let mut sys = System::new();
    let target = Pid::from_u32(pid);
    sys.refresh_processes(ProcessesToUpdate::Some(&[target]), true);

    matches!(sys.process(target).map(|p| p.status()), Some(OsStatus::Zombie))
}

/// 发送信号
pub fn send_signal(pid: u32, signal: Signal) -> Result<()> {
    let target = to_nix_pid(pid).ok_or(BgprocError::Signal {
        pid,
        errno: Errno::EINVAL,
    })?;

    log::debug!("Sending {} to PID {}", signal, pid);
    kill(target, signal).map_err(|errno| BgprocError::Signal { pid, errno })
}

/// 尽力发送信号，忽略错误（进程可能已经退出）
pub fn signal_quietly(pid: u32, signal: Signal) {
    if let Err(e) = send_signal(pid, signal) {
        log::debug!("Ignoring signal failure: {}", e);
    }
}

/// 操作系统报告的进程启动时间（Unix 秒）
pub fn process_start_time(pid: u32) -> Option<u64> {
    let mut sys = System::new();
    let target = Pid::from_u32(pid);
    sys.refresh_processes(ProcessesToUpdate::Some(&[target]), true);

    sys.process(target).map(|p| p.start_time())
}

/// 记录的启动时间与当前 PID 的启动时间不一致时，说明 PID 已被复用
///
/// 启动时间是秒级精度，允许 1 秒误差
pub fn pid_reused(pid: u32, recorded_start: Option<u64>) -> bool {
    match (recorded_start, process_start_time(pid)) {
        (Some(recorded), Some(current)) => recorded.abs_diff(current) > 1,
        _ => false,
    }
}

/// 获取进程的所有后代 PID（子进程、孙进程……）
///
/// 尽力而为：进程可能在遍历期间退出，这时只返回找到的部分
pub fn descendants(pid: u32) -> BTreeSet<u32> {
    let mut sys = System::new();
    sys.refresh_processes(ProcessesToUpdate::All, true);

    let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
    for (child, process) in sys.processes() {
        // Linux 上线程也会出现在列表中，跳过
        if process.thread_kind().is_some() {
            continue;
        }
        if let Some(parent) = process.parent() {
            children
                .entry(parent.as_u32())
                .or_default()
                .push(child.as_u32());
        }
    }

    collect_descendants(pid, &children)
}

/// 基于父子关系表的迭代 BFS，深度受限
fn collect_descendants(root: u32, children: &HashMap<u32, Vec<u32>>) -> BTreeSet<u32> {
    let mut found = BTreeSet::new();
    let mut queue = VecDeque::from([(root, 0usize)]);

    while let Some((current, depth)) = queue.pop_front() {
        if depth >= MAX_TREE_DEPTH {
            log::debug!("Process tree under PID {} deeper than {}, truncating", root, MAX_TREE_DEPTH);
            continue;
        }
        let Some(kids) = children.get(&current) else {
            continue;
        };
        for &kid in kids {
            if kid != root && found.insert(kid) {
                queue.push_back((kid, depth + 1));
            }
        }
    }

    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::{self, Command};

    #[test]
    fn test_current_process_is_running() {
        assert!(is_running(process::id()));
    }

    #[test]
    fn test_pid_zero_is_never_running() {
        assert!(!is_running(0));
        assert!(!is_running(u32::MAX));
        assert!(send_signal(0, Signal::SIGTERM).is_err());
    }

    #[test]
    fn test_reaped_child_is_not_running() {
        let mut child = Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        assert!(!is_running(pid));
    }

    #[test]
    fn test_unreaped_exited_child_is_not_running() {
        let mut child = Command::new("true").spawn().unwrap();
        let pid = child.id();
        std::thread::sleep(std::time::Duration::from_millis(300));
        assert!(!is_running(pid));
        child.wait().unwrap();
    }

    #[test]
    fn test_descendants_include_spawned_child() {
        let mut child = Command::new("sleep").arg("5").spawn().unwrap();
        let found = descendants(process::id());
        let pid = child.id();
        child.kill().unwrap();
        child.wait().unwrap();

        assert!(found.contains(&pid));
        assert!(!found.contains(&process::id()));
    }

    #[test]
    fn test_collect_descendants_walks_grandchildren() {
        let mut tree = HashMap::new();
        tree.insert(1, vec![2, 3]);
        tree.insert(2, vec![4]);
        tree.insert(4, vec![5]);
        tree.insert(9, vec![10]);

        let found = collect_descendants(1, &tree);
        assert_eq!(found.into_iter().collect::<Vec<_>>(), vec![2, 3, 4, 5]);
    }

    #[test]
    fn test_collect_descendants_depth_cap() {
        let tree: HashMap<u32, Vec<u32>> = (1..200).map(|p| (p, vec![p + 1])).collect();
        let found = collect_descendants(1, &tree);
        assert_eq!(found.len(), MAX_TREE_DEPTH);
    }

    #[test]
    fn test_leaf_has_no_descendants() {
        assert!(collect_descendants(42, &HashMap::new()).is_empty());
    }

    #[test]
    fn test_own_start_time_matches() {
        let start = process_start_time(process::id());
        assert!(start.is_some());
        assert!(!pid_reused(process::id(), start));
        assert!(pid_reused(process::id(), start.map(|s| s.saturating_sub(100))));
    }
}
