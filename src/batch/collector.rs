//! # 文件收集器
//!
//! 扫描文件夹条目，产出匹配过滤器的文件列表。
//!
//! ## 功能
//! - [`Scanner`] 协作者接口：按文件夹重新扫描、查询已发现数量、清空
//! - glob 模式匹配（逗号分隔多模式）
//! - 可选递归
//!
//! ## 依赖关系
//! - 被 `batch/runner.rs` 调用
//! - 使用 `walkdir` 遍历目录，`glob` 匹配文件名

use crate::error::{Result, SpikeError};

use glob::Pattern;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// 扫描器协作者
pub trait Scanner: Send {
    /// 扫描文件夹，替换上一次的结果
    fn scan(&mut self, folder: &Path) -> Result<()>;

    /// 最近一次扫描得到的文件（完整路径）
    fn files(&self) -> &[PathBuf];

    /// 已发现的文件数
    fn approximate_count(&self) -> usize {
        self.files().len()
    }

    /// 释放扫描状态
    fn clear(&mut self);
}

/// 基于 walkdir 的文件收集器
#[derive(Debug, Clone)]
pub struct FileCollector {
    /// 匹配模式列表
    patterns: Vec<Pattern>,
    /// 是否递归
    recursive: bool,
    /// 最近一次扫描结果
    files: Vec<PathBuf>,
}

impl Default for FileCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl FileCollector {
    /// 创建新的文件收集器（匹配全部文件，递归）
    pub fn new() -> Self {
        Self {
            patterns: Vec::new(),
            recursive: true,
            files: Vec::new(),
        }
    }

    /// 设置匹配模式（逗号分隔的多模式）
    pub fn with_pattern(mut self, pattern: &str) -> Result<Self> {
        self.patterns = pattern
            .split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty() && *s != "*")
            .map(|s| {
                Pattern::new(s).map_err(|e| {
                    SpikeError::InvalidArgument(format!("Invalid pattern '{}': {}", s, e))
                })
            })
            .collect::<Result<_>>()?;
        Ok(self)
    }

    /// 设置是否递归搜索
    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// 检查文件名是否匹配任一模式；没有模式时全部匹配
    fn matches_patterns(&self, path: &Path) -> bool {
        if self.patterns.is_empty() {
            return true;
        }

        let filename = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name,
            None => return false,
        };

        self.patterns.iter().any(|p| p.matches(filename))
    }
}

impl Scanner for FileCollector {
    fn scan(&mut self, folder: &Path) -> Result<()> {
        self.files.clear();

        if !folder.is_dir() {
            return Err(SpikeError::ScanFailure {
                path: folder.display().to_string(),
                reason: "not a readable directory".to_string(),
            });
        }

        let max_depth = if self.recursive { usize::MAX } else { 1 };

        for entry in WalkDir::new(folder).max_depth(max_depth).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if e.depth() == 0 => {
                    return Err(SpikeError::ScanFailure {
                        path: folder.display().to_string(),
                        reason: e.to_string(),
                    });
                }
                Err(e) => {
                    log::warn!("Skipping unreadable entry under {}: {}", folder.display(), e);
                    continue;
                }
            };

            if entry.file_type().is_file() && self.matches_patterns(entry.path()) {
                self.files.push(entry.into_path());
            }
        }

        log::debug!("scanned {}: {} files", folder.display(), self.files.len());
        Ok(())
    }

    fn files(&self) -> &[PathBuf] {
        &self.files
    }

    fn clear(&mut self) {
        self.files = Vec::new();
    }
}
