//! # 文本归档
//!
//! 把一个文件夹内的所有文件串接为单个文本归档 `<文件夹名>.pack.txt`：
//!
//! ```text
//! # spikebatch pack: photos (2 files)
//! --- START FILE: a.txt ---
//! ...
//! --- END FILE: a.txt ---
//! ```
//!
//! 条目顺序取决于任务完成顺序；写入器由策略在互斥锁下串行调用。
//! 同名文件夹（如 `x/docs` 与 `y/docs`）依次得到 `docs.pack.txt`、`docs-1.pack.txt`。
//!
//! 源文件读取失败不会损坏归档：首块读取失败时不写任何内容；
//! 中途失败时写入错误标记并补齐 END 行。此类错误以 `FileReadError` 返回，
//! 只影响该文件；写入归档本身的错误以 `FileWriteError` 返回。
//!
//! ## 依赖关系
//! - 实现 `batch/strategy.rs` 的 `ArchiveFactory` / `ArchiveWriter`

use crate::batch::stats::ScanStats;
use crate::batch::strategy::{ArchiveFactory, ArchiveWriter};
use crate::error::{Result, SpikeError};

use std::collections::HashSet;
use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// 归档文件扩展名
pub const PACK_EXTENSION: &str = "pack.txt";

const HEAD_CHUNK: usize = 8 * 1024;

/// 在输出目录下为每个文件夹创建文本归档
#[derive(Debug)]
pub struct TextArchiveFactory {
    out_dir: PathBuf,
    /// 本次运行已分配的归档路径
    claimed: Mutex<HashSet<PathBuf>>,
}

impl TextArchiveFactory {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
            claimed: Mutex::new(HashSet::new()),
        }
    }

    /// 为文件夹分配一个本次运行内唯一的归档路径
    pub fn claim_path(&self, folder: &Path) -> PathBuf {
        let name = folder
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "root".to_string());

        let mut claimed = self.claimed.lock().unwrap_or_else(|e| e.into_inner());
        let mut candidate = self.out_dir.join(format!("{name}.{PACK_EXTENSION}"));
        let mut suffix = 1;
        while claimed.contains(&candidate) {
            candidate = self.out_dir.join(format!("{name}-{suffix}.{PACK_EXTENSION}"));
            suffix += 1;
        }
        claimed.insert(candidate.clone());
        candidate
    }
}

impl ArchiveFactory for TextArchiveFactory {
    fn open(&self, folder: &Path, stats: ScanStats) -> Result<Box<dyn ArchiveWriter>> {
        let path = self.claim_path(folder);
        let write_error = |source| SpikeError::FileWriteError {
            path: path.display().to_string(),
            source,
        };

        std::fs::create_dir_all(&self.out_dir).map_err(write_error)?;
        let mut out = BufWriter::new(File::create(&path).map_err(write_error)?);
        let name = folder.file_name().unwrap_or(folder.as_os_str());
        writeln!(
            out,
            "# spikebatch pack: {} ({} files)",
            name.to_string_lossy(),
            stats.num_files
        )
        .map_err(write_error)?;

        log::info!("Packing {} into {}", folder.display(), path.display());
        Ok(Box::new(TextArchiveWriter { path, out }))
    }
}

/// 记录源读取错误与最后一个字节的读取适配器
struct SourceReader<'a> {
    inner: &'a mut dyn Read,
    last: Option<u8>,
    failed: bool,
}

impl Read for SourceReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.inner.read(buf) {
            Ok(n) => {
                if n > 0 {
                    self.last = Some(buf[n - 1]);
                }
                Ok(n)
            }
            Err(e) => {
                if e.kind() != io::ErrorKind::Interrupted {
                    self.failed = true;
                }
                Err(e)
            }
        }
    }
}

/// 读取首块；遇到 `Interrupted` 时重试
fn read_head(data: &mut dyn Read, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match data.read(buf) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

fn read_error(key: &str, source: io::Error) -> SpikeError {
    SpikeError::FileReadError {
        path: key.to_string(),
        source,
    }
}

/// 单个文本归档的写入器
#[derive(Debug)]
pub struct TextArchiveWriter {
    path: PathBuf,
    out: BufWriter<File>,
}

impl TextArchiveWriter {
    fn write_error(&self, source: io::Error) -> SpikeError {
        SpikeError::FileWriteError {
            path: self.path.display().to_string(),
            source,
        }
    }

    fn write_entry(&mut self, key: &str, data: &mut dyn Read) -> Result<()> {
        let mut head = [0u8; HEAD_CHUNK];
        let n = read_head(data, &mut head).map_err(|e| read_error(key, e))?;

        writeln!(self.out, "--- START FILE: {key} ---").map_err(|e| self.write_error(e))?;
        self.out
            .write_all(&head[..n])
            .map_err(|e| self.write_error(e))?;

        let mut source = SourceReader {
            inner: data,
            last: head[..n].last().copied(),
            failed: false,
        };
        if n > 0 {
            if let Err(e) = io::copy(&mut source, &mut self.out) {
                if !source.failed {
                    return Err(self.write_error(e));
                }
                writeln!(self.out, "\n!!! ERROR READING FILE: {key} - {e} !!!")
                    .and_then(|()| writeln!(self.out, "--- END FILE: {key} ---\n"))
                    .map_err(|e| self.write_error(e))?;
                return Err(read_error(key, e));
            }
        }

        if source.last != Some(b'\n') {
            self.out.write_all(b"\n").map_err(|e| self.write_error(e))?;
        }
        writeln!(self.out, "--- END FILE: {key} ---\n").map_err(|e| self.write_error(e))
    }
}

impl ArchiveWriter for TextArchiveWriter {
    fn send_file(&mut self, key: &str, data: &mut dyn Read) -> Result<()> {
        self.write_entry(key, data)
    }

    fn finish(&mut self) -> Result<()> {
        self.out.flush().map_err(|e| self.write_error(e))?;
        log::debug!("Archive written: {}", self.path.display());
        Ok(())
    }
}
