//! # 批量处理模块
//!
//! 批处理分发与进度汇总引擎。
//!
//! ## 功能
//! - 有界工作线程池，屏障式等待
//! - 三种运行策略：直接处理 / 两阶段统计后处理 / 打包
//! - 扫描文件夹条目并逐文件提交任务
//! - 任务失败在边界捕获，运行级失败汇总返回
//!
//! ## 依赖关系
//! - 被 `commands/` 使用
//! - 使用 `rayon` 作为线程池
//! - 使用 `progress/` 发布进度

pub mod collector;
pub mod context;
pub mod pool;
pub mod runner;
pub mod stats;
pub mod strategy;

pub use collector::{FileCollector, Scanner};
pub use context::{FsContextFactory, IoContext, RangeReader};
pub use pool::WorkerPool;
pub use runner::{BatchResult, BatchRunner, CancelToken, QueueEntry, RunSummary};
pub use strategy::{ArchiveFactory, ArchiveWriter, FileOperation, Strategy};
