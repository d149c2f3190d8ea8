use anyhow::Context;
use std::io::Write;
use std::time::Duration;

use crate::api::required_name;
use crate::cli::LogsArgs;
use crate::error::BgprocError;
use crate::services::log_follower::{read_last_lines, LogFollower};
use crate::services::Supervisor;

const FOLLOW_INTERVAL: Duration = Duration::from_millis(250);

/// 输出纯文本日志（不是 JSON）
pub async fn show_logs(supervisor: &Supervisor, args: LogsArgs) -> anyhow::Result<()> {
    let name = required_name(&args.target)?;
    if supervisor.store().get(name).is_none() {
        return Err(BgprocError::NotFound(name.to_string()).into());
    }

    let paths = supervisor.paths().log_paths(name);
    let path = if args.errors { paths.stderr } else { paths.stdout };
    if !path.exists() {
        anyhow::bail!("No logs found for '{}'", name);
    }

    let mut stdout = std::io::stdout();

    if args.all {
        let content = std::fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
        stdout.write_all(&content)?;
        stdout.flush()?;
        return Ok(());
    }

    let lines = read_last_lines(&path, args.tail).with_context(|| format!("reading {}", path.display()))?;
    if !lines.is_empty() {
        writeln!(stdout, "{}", lines.join("\n"))?;
    }

    if args.follow {
        let mut follower = LogFollower::from_end(&path);
        let interrupted = tokio::signal::ctrl_c();
        tokio::pin!(interrupted);
        loop {
            tokio::select! {
                _ = &mut interrupted => break,
                _ = tokio::time::sleep(FOLLOW_INTERVAL) => {
                    follower.drain_to(&mut stdout)?;
                }
            }
        }
    }

    Ok(())
}
