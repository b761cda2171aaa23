//! # checksum 子命令 CLI 定义
//!
//! 对队列中的文件计算 SHA-256。
//!
//! ## 依赖关系
//! - 被 `cli/mod.rs` 使用
//! - 参数传递给 `commands/checksum.rs`

use super::batch::BatchArgs;
use clap::Args;
use std::path::PathBuf;

/// checksum 子命令参数
#[derive(Args, Debug)]
pub struct ChecksumArgs {
    #[command(flatten)]
    pub batch: BatchArgs,

    /// Collect per-file chunk counts first so progress bars know their totals
    #[arg(long, default_value_t = false)]
    pub two_phase: bool,

    /// Write checksums to this file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}
