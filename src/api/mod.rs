pub mod logs;
pub mod process;
pub mod status;

pub use logs::show_logs;
pub use process::{clean_processes, start_process, stop_process};
pub use status::{list_processes, process_status};

use serde::Serialize;

use crate::cli::NameArgs;
use crate::error::{BgprocError, Result};
use crate::models::validate_name;

/// 成功路径只向 stdout 输出一条 JSON
pub(crate) fn emit<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

pub(crate) fn emit_pretty<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// 取出并校验进程名
pub(crate) fn required_name(target: &NameArgs) -> Result<&str> {
    let name = target
        .name()
        .ok_or_else(|| BgprocError::Validation("Process name required".to_string()))?;
    validate_name(name)?;
    Ok(name)
}
