use lazy_static::lazy_static;
use regex::Regex;
use std::collections::BTreeSet;
use std::path::Path;

use crate::services::process_checker::descendants;

lazy_static! {
    static ref ANSI_ESCAPE: Regex = Regex::new(r"\x1b\[[0-9;?]*[A-Za-z]").unwrap();

    /// 日志中常见的“正在监听端口”写法，按优先级排列
    static ref LOG_PORT_PATTERNS: Vec<Regex> = vec![
        // "listening on port 3000", "port: 8080", "PORT=5000", "ready on ports 3000"
        Regex::new(r"(?i)\bports?\b\s*[:=]?\s*(\d{1,5})\b").unwrap(),
        // "http://localhost:5173/", "https://0.0.0.0:8443", "http://[::1]:5173/"
        Regex::new(r"(?i)\b[a-z][a-z0-9+.-]*://(?:\[[^\]\s]*\]|[^\s/:]+):(\d{1,5})\b").unwrap(),
        // "Listening on 0.0.0.0:8080", "Server running at [::]:4000"
        Regex::new(r"(?i)\b(?:listening|listen|serving|running|started|bound)\b.*?:(\d{1,5})\b").unwrap(),
    ];
}

/// 检测进程及其所有后代正在监听的 TCP 端口
///
/// 空结果是正常情况（进程还没开始监听，或只用 UNIX socket）
pub fn detect_ports(pid: u32) -> Vec<u16> {
    let mut pids = descendants(pid);
    pids.insert(pid);

    let ports = listening_ports(&pids);
    log::debug!("PID {} (+{} descendants) listening on {:?}", pid, pids.len() - 1, ports);
    ports.into_iter().collect()
}

/// 直接检测为空时，退回到从 stdout 日志中解析端口
pub fn detect_ports_with_fallback(pid: u32, stdout_log: &Path) -> Vec<u16> {
    let ports = detect_ports(pid);
    if !ports.is_empty() {
        return ports;
    }
    detect_port_from_logs(stdout_log).into_iter().collect()
}

/// 从日志文本中找到第一个像“监听端口”的数字
pub fn detect_port_from_logs(log_path: &Path) -> Option<u16> {
    let bytes = std::fs::read(log_path).ok()?;
    let text = String::from_utf8_lossy(&bytes);
    parse_port_from_text(&text)
}

fn parse_port_from_text(text: &str) -> Option<u16> {
    let clean = ANSI_ESCAPE.replace_all(text, "");

    for line in clean.lines() {
        for pattern in LOG_PORT_PATTERNS.iter() {
            let found = pattern
                .captures_iter(line)
                .filter_map(|caps| caps.get(1)?.as_str().parse::<u32>().ok())
                .find(|port| (1..=65535).contains(port));
            if let Some(port) = found {
                return Some(port as u16);
            }
        }
    }
    None
}

#[cfg(target_os = "linux")]
fn listening_ports(pids: &BTreeSet<u32>) -> BTreeSet<u16> {
    linux::listening_ports(pids)
}

#[cfg(not(target_os = "linux"))]
fn listening_ports(pids: &BTreeSet<u32>) -> BTreeSet<u16> {
    lsof::listening_ports(pids)
}

/// Linux：通过 /proc/<pid>/fd 找到 socket inode，再到 /proc/net/tcp{,6} 中匹配 LISTEN 状态
#[cfg(target_os = "linux")]
mod linux {
    use std::collections::{BTreeSet, HashMap, HashSet};

    /// /proc/net/tcp 中的 TCP_LISTEN 状态码
    const TCP_LISTEN: &str = "0A";

    pub fn listening_ports(pids: &BTreeSet<u32>) -> BTreeSet<u16> {
        let inodes: HashSet<u64> = pids.iter().flat_map(|pid| socket_inodes(*pid)).collect();
        if inodes.is_empty() {
            return BTreeSet::new();
        }

        let mut table = HashMap::new();
        for path in ["/proc/net/tcp", "/proc/net/tcp6"] {
            if let Ok(content) = std::fs::read_to_string(path) {
                table.extend(parse_listen_table(&content));
            }
        }

        table
            .into_iter()
            .filter(|(inode, _)| inodes.contains(inode))
            .map(|(_, port)| port)
            .collect()
    }

    /// 读取不到（进程已退出、无权限）时返回空
    fn socket_inodes(pid: u32) -> Vec<u64> {
        let Ok(entries) = std::fs::read_dir(format!("/proc/{}/fd", pid)) else {
            return Vec::new();
        };

        entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| std::fs::read_link(entry.path()).ok())
            .filter_map(|target| {
                target
                    .to_str()?
                    .strip_prefix("socket:[")?
                    .strip_suffix(']')?
                    .parse()
                    .ok()
            })
            .collect()
    }

    /// 返回 LISTEN 状态 socket 的 (inode, port)
    ///
    /// 行格式: sl local_address rem_address st tx_queue:rx_queue tr:tm->when retrnsmt uid timeout inode ...
    pub(super) fn parse_listen_table(content: &str) -> Vec<(u64, u16)> {
        content
            .lines()
            .skip(1)
            .filter_map(|line| {
                let fields: Vec<&str> = line.split_whitespace().collect();
                if fields.len() < 10 || fields[3] != TCP_LISTEN {
                    return None;
                }
                let (_, port_hex) = fields[1].rsplit_once(':')?;
                let port = u16::from_str_radix(port_hex, 16).ok()?;
                let inode = fields[9].parse::<u64>().ok()?;
                (inode != 0).then_some((inode, port))
            })
            .collect()
    }
}

/// 其他 Unix：调用 lsof
#[cfg(not(target_os = "linux"))]
mod lsof {
    use lazy_static::lazy_static;
    use regex::Regex;
    use std::collections::BTreeSet;
    use std::process::{Command, Stdio};

    lazy_static! {
        static ref LSOF_LISTEN: Regex = Regex::new(r":(\d+)\s+\(LISTEN\)").unwrap();
    }

    pub fn listening_ports(pids: &BTreeSet<u32>) -> BTreeSet<u16> {
        let pid_list = pids
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(",");

        // -P 端口号不转服务名，-n 不做 DNS 解析
        let output = Command::new("lsof")
            .args(["-a", "-p", &pid_list, "-iTCP", "-sTCP:LISTEN", "-P", "-n"])
            .stderr(Stdio::null())
            .output();

        let Ok(output) = output else {
            return BTreeSet::new();
        };

        String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter_map(|line| LSOF_LISTEN.captures(line)?.get(1)?.as_str().parse().ok())
            .collect()
    }
}
