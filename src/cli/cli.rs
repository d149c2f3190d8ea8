use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// bgproc - 给 agent 用的后台进程管理器，所有命令都向 stdout 输出 JSON
///
/// 例: bgproc start -n myserver -- npm run dev
#[derive(Parser, Debug)]
#[command(name = "bgproc", author, version, about, long_about = None)]
pub struct CommandArgs {
    /// 数据目录（注册表与日志）
    #[arg(long, env = "BGPROC_DATA_DIR", global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 启动后台进程
    Start(StartArgs),
    /// 查询进程状态（PID、端口）
    Status(NameArgs),
    /// 查看进程日志
    Logs(LogsArgs),
    /// 停止进程
    Stop(StopArgs),
    /// 列出所有进程
    List(ListArgs),
    /// 清理已退出的进程及其日志
    Clean(CleanArgs),
    /// 内部使用：超时计时进程
    #[command(name = "__expire", hide = true)]
    Expire(ExpireArgs),
}

#[derive(Args, Debug)]
pub struct StartArgs {
    /// 进程名
    #[arg(short, long)]
    pub name: String,

    /// N 秒后终止
    #[arg(short, long, value_name = "SECONDS")]
    pub timeout: Option<u64>,

    /// 等待进程开始监听端口，可选超时秒数
    #[arg(short = 'w', long = "wait-for-port", value_name = "SECONDS")]
    pub wait_for_port: Option<Option<u64>>,

    /// 等待超时后保留进程（需要 --wait-for-port）
    #[arg(long)]
    pub keep: bool,

    /// 同名进程正在运行时先终止它
    #[arg(short, long)]
    pub force: bool,

    /// `--` 之后的命令
    #[arg(last = true, value_name = "COMMAND")]
    pub command: Vec<String>,
}

/// `-n <name>` 或位置参数
#[derive(Args, Debug)]
pub struct NameArgs {
    #[arg(value_name = "NAME")]
    pub positional: Option<String>,

    /// 进程名
    #[arg(short = 'n', long = "name")]
    pub flag: Option<String>,
}

impl NameArgs {
    pub fn name(&self) -> Option<&str> {
        self.flag.as_deref().or(self.positional.as_deref())
    }
}

#[derive(Args, Debug)]
pub struct LogsArgs {
    #[command(flatten)]
    pub target: NameArgs,

    /// 显示最后 N 行
    #[arg(short, long, default_value_t = 100)]
    pub tail: usize,

    /// 持续输出（类似 tail -f）
    #[arg(short, long)]
    pub follow: bool,

    /// 只看 stderr
    #[arg(short, long)]
    pub errors: bool,

    /// 输出全部日志
    #[arg(short, long)]
    pub all: bool,
}

#[derive(Args, Debug)]
pub struct StopArgs {
    #[command(flatten)]
    pub target: NameArgs,

    /// 使用 SIGKILL 而不是 SIGTERM
    #[arg(short, long)]
    pub force: bool,
}

#[derive(Args, Debug)]
pub struct ListArgs {
    /// 按工作目录过滤（不带值 = 当前目录）
    #[arg(short, long, value_name = "DIR")]
    pub cwd: Option<Option<PathBuf>>,
}

#[derive(Args, Debug)]
pub struct CleanArgs {
    #[command(flatten)]
    pub target: NameArgs,

    /// 清理所有已退出的进程
    #[arg(short, long)]
    pub all: bool,
}

#[derive(Args, Debug)]
pub struct ExpireArgs {
    #[arg(long)]
    pub pid: u32,

    /// 秒
    #[arg(long)]
    pub after: u64,

    #[arg(long)]
    pub name: String,

    /// 目标进程的启动时间（Unix 秒）
    #[arg(long)]
    pub started: Option<u64>,
}
