//! # SHA-256 校验和
//!
//! 以 64 KiB 为块读取文件并计算摘要，每读完一块回报一次进度。
//! 两阶段策略下，`stat` 以块数作为文件的条目数，
//! 因此第二阶段的总进度以块为单位推进；统计时读取首字节，
//! 不可读的文件在第一阶段即报告失败。
//!
//! ## 依赖关系
//! - 实现 `batch/strategy.rs` 的 `FileOperation`
//! - 使用 `sha2` 计算摘要

use crate::batch::context::{IoContext, RangeReader};
use crate::batch::strategy::FileOperation;
use crate::error::Result;

use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::Mutex;

/// 读取块大小
pub const CHUNK_SIZE: usize = 64 * 1024;

/// 文件的块数；空文件计 1 块
pub fn chunk_count(len: u64) -> u64 {
    len.div_ceil(CHUNK_SIZE as u64).max(1)
}

/// 校验和操作，结果在任务间共享收集
#[derive(Debug, Default)]
pub struct ChecksumOperation {
    digests: Mutex<Vec<(PathBuf, String)>>,
}

impl ChecksumOperation {
    pub fn new() -> Self {
        Self::default()
    }

    /// 取出全部结果，按路径排序
    pub fn take_sorted(&self) -> Vec<(PathBuf, String)> {
        let mut digests = std::mem::take(&mut *self.lock());
        digests.sort_by(|a, b| a.0.cmp(&b.0));
        digests
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(PathBuf, String)>> {
        self.digests.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl FileOperation for ChecksumOperation {
    fn process(&self, ctx: &mut dyn IoContext, progress: &dyn Fn(u64)) -> Result<()> {
        let len = ctx.len()?;
        let mut hasher = Sha256::new();
        let mut offset = 0u64;

        for _ in 0..chunk_count(len) {
            let chunk = ctx.read_range(offset, CHUNK_SIZE)?;
            hasher.update(&chunk);
            offset += chunk.len() as u64;
            progress(1);
        }

        let hex = format!("{:x}", hasher.finalize());
        log::debug!("{} -> {}", ctx.full_path().display(), hex);
        self.lock().push((ctx.full_path().to_path_buf(), hex));
        Ok(())
    }

    fn stat(&self, reader: &mut RangeReader<'_>) -> Result<Option<u64>> {
        reader.read(0, 1)?;
        Ok(Some(chunk_count(reader.len()?)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::context::FsIoContext;
    use std::cell::Cell;
    use std::fs;

    #[test]
    fn test_chunk_count() {
        assert_eq!(chunk_count(0), 1);
        assert_eq!(chunk_count(1), 1);
        assert_eq!(chunk_count(CHUNK_SIZE as u64), 1);
        assert_eq!(chunk_count(CHUNK_SIZE as u64 + 1), 2);
    }

    #[test]
    fn test_known_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("abc.txt");
        fs::write(&path, b"abc").unwrap();

        let op = ChecksumOperation::new();
        let mut ctx = FsIoContext::new(path.clone());
        let calls = Cell::new(0u64);
        op.process(&mut ctx, &|n: u64| calls.set(calls.get() + n)).unwrap();
        ctx.finish();

        assert_eq!(calls.get(), 1);
        let digests = op.take_sorted();
        assert_eq!(
            digests,
            vec![(
                path,
                "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad".to_string()
            )]
        );
        assert!(op.take_sorted().is_empty());
    }

    #[test]
    fn test_progress_matches_stat() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.bin");
        fs::write(&path, vec![7u8; CHUNK_SIZE * 2 + 10]).unwrap();

        let op = ChecksumOperation::new();
        let mut ctx = FsIoContext::new(path);
        let items = op.stat(&mut RangeReader::new(&mut ctx)).unwrap();
        assert_eq!(items, Some(3));

        let calls = Cell::new(0u64);
        op.process(&mut ctx, &|n: u64| calls.set(calls.get() + n)).unwrap();
        ctx.finish();
        assert_eq!(Some(calls.get()), items);
    }

    #[test]
    fn test_results_sorted_by_path() {
        let dir = tempfile::tempdir().unwrap();
        let op = ChecksumOperation::new();
        for name in ["c", "a", "b"] {
            let path = dir.path().join(name);
            fs::write(&path, name).unwrap();
            let mut ctx = FsIoContext::new(path);
            op.process(&mut ctx, &|_: u64| {}).unwrap();
            ctx.finish();
        }
        let digests = op.take_sorted();
        assert_eq!(digests.len(), 3);
        let names: Vec<_> = digests
            .into_iter()
            .map(|(p, _)| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }
}
