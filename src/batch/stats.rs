//! # 批处理统计
//!
//! - [`ScanStats`]：文件夹分发前计算，用于确定文件夹进度条大小
//! - [`ExtractStats`]：两阶段策略第一阶段在互斥锁下逐文件累积，
//!   完成后整体移交第二阶段，此后只读
//!
//! ## 不变量
//! `total_files == per_archive 之和 + loose_files`
//!
//! ## 依赖关系
//! - 被 `batch/runner.rs`, `batch/strategy.rs` 使用

use super::context::ArchiveKey;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

/// 文件夹扫描统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
    /// 文件数
    pub num_files: usize,
    /// 文件名总字节数（每个名字额外计 1 字节结束符）
    pub total_name_bytes: usize,
}

impl ScanStats {
    pub fn from_files(files: &[PathBuf]) -> Self {
        Self {
            num_files: files.len(),
            total_name_bytes: files
                .iter()
                .map(|f| f.as_os_str().len() + 1)
                .sum(),
        }
    }
}

/// 解包统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractStats {
    /// 每个归档的条目数
    pub per_archive: HashMap<ArchiveKey, u64>,
    /// 归档分组之外的文件数
    pub loose_files: u64,
    /// 总条目数
    pub total_files: u64,
}

impl ExtractStats {
    /// 某个归档的条目数；不属于任何分组时为 None
    pub fn items_for(&self, key: &ArchiveKey) -> Option<u64> {
        self.per_archive.get(key).copied()
    }

    fn push(&mut self, key: ArchiveKey, items: Option<u64>) {
        match items {
            Some(n) => {
                if let Some(old) = self.per_archive.insert(key, n) {
                    self.total_files -= old;
                }
                self.total_files += n;
            }
            None => {
                self.loose_files += 1;
                self.total_files += 1;
            }
        }
    }
}

/// 第一阶段并发累积器
#[derive(Debug, Default)]
pub struct ExtractStatsMaker {
    stats: Mutex<ExtractStats>,
}

impl ExtractStatsMaker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录一个文件的统计结果
    pub fn push(&self, key: ArchiveKey, items: Option<u64>) {
        let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        stats.push(key, items);
    }

    /// 当前结果的副本
    pub fn snapshot(&self) -> ExtractStats {
        self.stats.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// 取出结果，移交第二阶段
    pub fn into_stats(self) -> ExtractStats {
        self.stats.into_inner().unwrap_or_else(|e| e.into_inner())
    }
}
