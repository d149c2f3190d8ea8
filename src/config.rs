use std::path::{Path, PathBuf};

use crate::error::{BgprocError, Result};

/// 日志文件路径（stdout / stderr）
#[derive(Debug, Clone)]
pub struct LogPaths {
    pub stdout: PathBuf,
    pub stderr: PathBuf,
}

impl LogPaths {
    /// 删除两个日志文件，失败时忽略
    pub fn remove(&self) {
        for path in [&self.stdout, &self.stderr] {
            if let Err(e) = std::fs::remove_file(path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    log::debug!("Failed to remove log {}: {}", path.display(), e);
                }
            }
        }
    }
}

/// 数据目录布局
#[derive(Debug, Clone)]
pub struct Paths {
    data_dir: PathBuf,
}

impl Paths {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self { data_dir: data_dir.into() }
    }

    /// `--data-dir` / `BGPROC_DATA_DIR` 优先，否则使用 ~/.local/share/bgproc
    pub fn resolve(data_dir: Option<PathBuf>) -> Result<Self> {
        match data_dir {
            Some(dir) => Ok(Self::new(dir)),
            None => {
                let home = dirs::home_dir().ok_or(BgprocError::NoHomeDir)?;
                Ok(Self::new(home.join(".local").join("share").join("bgproc")))
            }
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn registry_path(&self) -> PathBuf {
        self.data_dir.join("registry.json")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.data_dir.join("registry.lock")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    /// 名称必须已经通过校验
    pub fn log_paths(&self, name: &str) -> LogPaths {
        let logs = self.logs_dir();
        LogPaths {
            stdout: logs.join(format!("{}.stdout.log", name)),
            stderr: logs.join(format!("{}.stderr.log", name)),
        }
    }

    pub fn ensure(&self) -> Result<()> {
        std::fs::create_dir_all(self.logs_dir())?;
        Ok(())
    }
}
