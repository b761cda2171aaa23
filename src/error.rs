//! # 统一错误处理模块
//!
//! 定义 spikebatch 的所有错误类型，使用 `thiserror` 派生。
//!
//! ## 错误分级
//! - 任务级：`FileTaskFailure` / `StatCollectionFailure` / `TaskPanicked`，
//!   在任务边界捕获并记录，批处理继续
//! - 运行级：`ScanFailure` / `ArchiveFailure`，中止剩余条目，
//!   在已提交任务排空后以 `RunAborted` 交给调用方
//!
//! ## 依赖关系
//! - 被所有其他模块使用
//! - 无外部模块依赖

use thiserror::Error;

/// spikebatch 统一错误类型
#[derive(Error, Debug)]
pub enum SpikeError {
    // ─────────────────────────────────────────────────────────────
    // I/O 错误
    // ─────────────────────────────────────────────────────────────
    #[error("Failed to read file: {path}")]
    FileReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file: {path}")]
    FileWriteError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("File not found: {path}")]
    FileNotFound { path: String },

    // ─────────────────────────────────────────────────────────────
    // 批处理错误
    // ─────────────────────────────────────────────────────────────
    #[error("Failed to scan folder: {path}\nReason: {reason}")]
    ScanFailure { path: String, reason: String },

    #[error("File task failed: {path}\nReason: {reason}")]
    FileTaskFailure { path: String, reason: String },

    #[error("Failed to collect stats for: {path}\nReason: {reason}")]
    StatCollectionFailure { path: String, reason: String },

    #[error("Archive writer failed for: {path}\nReason: {reason}")]
    ArchiveFailure { path: String, reason: String },

    #[error("Skipped: {0}")]
    Skipped(String),

    #[error("Task panicked: {0}")]
    TaskPanicked(String),

    #[error("Run cancelled")]
    Cancelled,

    #[error("Run aborted at entry '{entry}'")]
    RunAborted {
        entry: String,
        #[source]
        source: Box<SpikeError>,
    },

    // ─────────────────────────────────────────────────────────────
    // 参数错误
    // ─────────────────────────────────────────────────────────────
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // ─────────────────────────────────────────────────────────────
    // CSV 错误
    // ─────────────────────────────────────────────────────────────
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    // ─────────────────────────────────────────────────────────────
    // 其他
    // ─────────────────────────────────────────────────────────────
    #[error("{0}")]
    Other(String),
}

impl SpikeError {
    /// 包装为运行级中止错误
    pub fn abort_at(self, entry: impl Into<String>) -> Self {
        SpikeError::RunAborted {
            entry: entry.into(),
            source: Box::new(self),
        }
    }
}

/// Result 类型别名
pub type Result<T> = std::result::Result<T, SpikeError>;
