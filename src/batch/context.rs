//! # 文件 I/O 上下文
//!
//! 每个文件任务获得一个 I/O 上下文：字节区间读取、顺序流、完整路径，
//! 以及在操作结束后恰好调用一次的 `finish`。
//!
//! ## 依赖关系
//! - 被 `batch/runner.rs` 创建，传给 `batch/strategy.rs` 的每文件钩子
//! - 被 `ops/` 读取

use crate::error::{Result, SpikeError};

use std::fmt;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// 统计结果的分组键（按文件完整路径）
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArchiveKey(String);

impl ArchiveKey {
    pub fn of(path: &Path) -> Self {
        ArchiveKey(path.to_string_lossy().into_owned())
    }
}

impl fmt::Display for ArchiveKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 单个文件的 I/O 上下文
pub trait IoContext: Send {
    /// 完整路径
    fn full_path(&self) -> &Path;

    /// 文件长度
    fn len(&mut self) -> Result<u64>;

    /// 读取 `[offset, offset + size)`，文件末尾处可能短读
    fn read_range(&mut self, offset: u64, size: usize) -> Result<Vec<u8>>;

    /// 从头开始的顺序读取流
    fn stream(&mut self) -> Result<&mut dyn Read>;

    /// 释放文件句柄与缓冲
    fn finish(&mut self);

    fn key(&self) -> ArchiveKey {
        ArchiveKey::of(self.full_path())
    }
}

/// I/O 上下文工厂
pub trait IoContextFactory: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn IoContext>>;
}

/// 只暴露字节区间读取的视图，供统计阶段使用
pub struct RangeReader<'a> {
    ctx: &'a mut dyn IoContext,
}

impl<'a> RangeReader<'a> {
    pub fn new(ctx: &'a mut dyn IoContext) -> Self {
        Self { ctx }
    }

    pub fn len(&mut self) -> Result<u64> {
        self.ctx.len()
    }

    pub fn read(&mut self, offset: u64, size: usize) -> Result<Vec<u8>> {
        self.ctx.read_range(offset, size)
    }
}

/// 本地文件系统上下文，首次读取时才打开文件
#[derive(Debug)]
pub struct FsIoContext {
    path: PathBuf,
    file: Option<File>,
    finished: bool,
}

impl FsIoContext {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            file: None,
            finished: false,
        }
    }

    fn read_error(&self, source: std::io::Error) -> SpikeError {
        SpikeError::FileReadError {
            path: self.path.display().to_string(),
            source,
        }
    }

    fn file(&mut self) -> Result<&mut File> {
        if self.file.is_none() {
            let file = File::open(&self.path).map_err(|e| self.read_error(e))?;
            self.file = Some(file);
        }
        self.file
            .as_mut()
            .ok_or_else(|| SpikeError::Other("file handle missing".to_string()))
    }
}

impl IoContext for FsIoContext {
    fn full_path(&self) -> &Path {
        &self.path
    }

    fn len(&mut self) -> Result<u64> {
        let meta = self.file()?.metadata();
        meta.map(|m| m.len()).map_err(|e| self.read_error(e))
    }

    fn read_range(&mut self, offset: u64, size: usize) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(size);
        let file = self.file()?;
        let res = file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| file.by_ref().take(size as u64).read_to_end(&mut buf));
        res.map_err(|e| self.read_error(e))?;
        Ok(buf)
    }

    fn stream(&mut self) -> Result<&mut dyn Read> {
        let path = self.path.display().to_string();
        let file = self.file()?;
        file.seek(SeekFrom::Start(0))
            .map_err(|source| SpikeError::FileReadError { path, source })?;
        Ok(file)
    }

    fn finish(&mut self) {
        self.file = None;
        self.finished = true;
    }
}

impl Drop for FsIoContext {
    fn drop(&mut self) {
        if !self.finished {
            log::debug!("I/O context dropped without finish: {}", self.path.display());
        }
    }
}

/// 本地文件系统工厂
#[derive(Debug, Default, Clone, Copy)]
pub struct FsContextFactory;

impl IoContextFactory for FsContextFactory {
    fn open(&self, path: &Path) -> Result<Box<dyn IoContext>> {
        if !path.is_file() {
            return Err(SpikeError::FileNotFound {
                path: path.display().to_string(),
            });
        }
        Ok(Box::new(FsIoContext::new(path.to_path_buf())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_reads_and_stream() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        std::fs::write(&path, b"0123456789").unwrap();

        let mut ctx = FsContextFactory.open(&path).unwrap();
        assert_eq!(ctx.len().unwrap(), 10);
        assert_eq!(ctx.read_range(2, 3).unwrap(), b"234");
        assert_eq!(ctx.read_range(8, 16).unwrap(), b"89");

        let mut all = Vec::new();
        ctx.stream().unwrap().read_to_end(&mut all).unwrap();
        assert_eq!(all, b"0123456789");

        let mut reader = RangeReader::new(ctx.as_mut());
        assert_eq!(reader.read(0, 1).unwrap(), b"0");
        ctx.finish();
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = FsContextFactory.open(&dir.path().join("gone")).err().unwrap();
        assert!(matches!(err, SpikeError::FileNotFound { .. }));
    }

    #[test]
    fn test_key_is_full_path() {
        let ctx = FsIoContext::new(PathBuf::from("/d/photos/a.jpg"));
        assert_eq!(ctx.key().to_string(), "/d/photos/a.jpg");
    }
}
