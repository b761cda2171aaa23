//! # 运行配置
//!
//! 由命令行参数构建一次运行所需的配置。
//!
//! ## 依赖关系
//! - 使用 `cli/batch.rs` 的参数
//! - 被 `commands/` 使用

use crate::batch::{FileCollector, QueueEntry, WorkerPool};
use crate::cli::batch::BatchArgs;
use crate::error::{Result, SpikeError};

use std::time::Duration;

/// 默认每线程排队任务数
pub const DEFAULT_QUEUE_FACTOR: usize = 50;

/// 一次运行的配置
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// 工作线程数；0 表示内联执行
    pub threads: usize,
    /// 每线程排队任务数
    pub queue_factor: usize,
    /// 运行结束后等待进度刷新的时间
    pub grace_delay: Duration,
    /// 渲染帧间隔
    pub frame_interval: Duration,
    /// 文件名过滤（逗号分隔）
    pub patterns: String,
    /// 是否递归扫描
    pub recursive: bool,
    /// 是否显示进度条
    pub show_progress: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            threads: num_cpus::get(),
            queue_factor: DEFAULT_QUEUE_FACTOR,
            grace_delay: Duration::from_millis(100),
            frame_interval: Duration::from_millis(50),
            patterns: "*".to_string(),
            recursive: true,
            show_progress: true,
        }
    }
}

impl RunConfig {
    /// 由命令行参数构建
    pub fn from_args(args: &BatchArgs) -> Result<Self> {
        if args.queue_factor == 0 {
            return Err(SpikeError::InvalidArgument(
                "--queue-factor must be at least 1".to_string(),
            ));
        }

        let threads = match (args.inline, args.jobs) {
            (true, _) => 0,
            (false, 0) => num_cpus::get(),
            (false, n) => n,
        };

        Ok(Self {
            threads,
            queue_factor: args.queue_factor,
            patterns: args.pattern.clone(),
            recursive: !args.no_recurse,
            show_progress: !args.no_progress,
            ..Self::default()
        })
    }

    /// 排队上限 = 线程数 × 系数
    pub fn queue_capacity(&self) -> usize {
        self.threads.max(1) * self.queue_factor
    }

    pub fn build_pool(&self) -> Result<WorkerPool> {
        WorkerPool::new(self.threads, self.queue_capacity())
    }

    pub fn build_scanner(&self) -> Result<FileCollector> {
        Ok(FileCollector::new()
            .with_pattern(&self.patterns)?
            .recursive(self.recursive))
    }
}

/// 把命令行输入转换为队列
pub fn build_queue(args: &BatchArgs) -> Result<Vec<QueueEntry>> {
    args.inputs.iter().map(|p| QueueEntry::from_path(p)).collect()
}
