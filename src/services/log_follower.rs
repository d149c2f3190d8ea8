use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// 增量读取追加写入的日志文件（类似 tail -f 的单步）
pub struct LogFollower {
    path: PathBuf,
    offset: u64,
}

impl LogFollower {
    /// 从文件开头读取
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), offset: 0 }
    }

    /// 从当前文件末尾开始读取
    pub fn from_end(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let offset = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        Self { path, offset }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 把上次之后新写入的字节输出到 out，返回字节数
    ///
    /// 文件不存在时返回 0；文件被截断时从头开始
    pub fn drain_to(&mut self, out: &mut impl Write) -> io::Result<usize> {
        let mut file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };

        let len = file.metadata()?.len();
        if len < self.offset {
            self.offset = 0;
        }
        if len == self.offset {
            return Ok(0);
        }

        file.seek(SeekFrom::Start(self.offset))?;
        let mut buf = Vec::with_capacity((len - self.offset) as usize);
        file.take(len - self.offset).read_to_end(&mut buf)?;
        out.write_all(&buf)?;
        out.flush()?;

        self.offset += buf.len() as u64;
        Ok(buf.len())
    }
}

/// 文件最后 n 行
pub fn read_last_lines(path: &Path, n: usize) -> io::Result<Vec<String>> {
    let bytes = std::fs::read(path)?;
    let text = String::from_utf8_lossy(&bytes);
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(n);
    Ok(lines[start..].iter().map(|l| l.to_string()).collect())
}
