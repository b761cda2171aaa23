//! # 批处理公共参数
//!
//! `checksum` 与 `pack` 共用的队列、过滤与线程池参数。
//!
//! ## 依赖关系
//! - 被 `cli/checksum.rs`, `cli/pack.rs` 展开
//! - 被 `config.rs` 转换为 `RunConfig`

use clap::Args;
use std::path::PathBuf;

/// 批处理公共参数
#[derive(Args, Debug, Clone)]
pub struct BatchArgs {
    /// Files or folders to queue, processed in order
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,

    /// File name patterns for folder scans (comma-separated, e.g. "*.jpg,*.png")
    #[arg(short, long, default_value = "*")]
    pub pattern: String,

    /// Only scan the top level of each folder
    #[arg(long, default_value_t = false)]
    pub no_recurse: bool,

    /// Worker threads (0 = number of CPUs)
    #[arg(short, long, default_value_t = 0, env = "SPIKE_JOBS")]
    pub jobs: usize,

    /// Run every task inline on the driver thread
    #[arg(long, default_value_t = false)]
    pub inline: bool,

    /// Queued tasks allowed per worker before submission blocks
    #[arg(long, default_value_t = 50)]
    pub queue_factor: usize,

    /// Hide live progress bars
    #[arg(long, default_value_t = false)]
    pub no_progress: bool,

    /// Write a per-file CSV report
    #[arg(long)]
    pub report: Option<PathBuf>,
}
