use thiserror::Error;

/// bgproc 的错误分类
#[derive(Error, Debug)]
pub enum BgprocError {
    #[error("{0}")]
    Validation(String),

    #[error("No command specified. Use: bgproc start -n <name> -- <command>")]
    NoCommand,

    #[error("Process '{0}' not found")]
    NotFound(String),

    #[error("Process '{name}' is already running (PID {pid}). Use --force to restart.")]
    AlreadyRunning { name: String, pid: u32 },

    #[error("Process '{0}' is still running. Use 'bgproc stop {0}' first.")]
    StillRunning(String),

    #[error("Process '{name}' (PID {pid}) exited before opening a port")]
    DiedBeforePort { name: String, pid: u32 },

    #[error("Timed out after {seconds}s waiting for a port, {tail}", tail = timed_out_tail(.pid, .killed))]
    TimedOut { seconds: u64, pid: u32, killed: bool },

    #[error("Interrupted while waiting for a port (PID {0} left running)")]
    Interrupted(u32),

    #[error("Failed to signal PID {pid}: {errno}")]
    Signal { pid: u32, errno: nix::errno::Errno },

    #[error("Cannot resolve home directory; set BGPROC_DATA_DIR")]
    NoHomeDir,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn timed_out_tail(pid: &u32, killed: &bool) -> String {
    if *killed {
        format!("process killed (PID {})", pid)
    } else {
        format!("process still running (PID {})", pid)
    }
}

pub type Result<T> = std::result::Result<T, BgprocError>;
