//! # CLI 模块
//!
//! 使用 `clap` 定义命令行参数和子命令。
//!
//! ## 命令结构
//! - `checksum`: 对队列中的文件计算 SHA-256（直接处理 / 两阶段）
//! - `pack`: 把每个文件夹条目打包为一个文本归档
//!
//! ## 依赖关系
//! - 被 `main.rs` 使用
//! - 子模块: batch, checksum, pack

pub mod batch;
pub mod checksum;
pub mod pack;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// spikebatch - 批量文件处理工具
#[derive(Parser)]
#[command(name = "spikebatch")]
#[command(author = "Changjiang Wu")]
#[command(version)]
#[command(about = "Batch-process files and folders on a bounded worker pool", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,

    /// Also write the log to this file
    #[arg(long, global = true, env = "SPIKE_LOG_FILE")]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// 可用的子命令
#[derive(Subcommand)]
pub enum Commands {
    /// Compute SHA-256 checksums for every queued file
    Checksum(checksum::ChecksumArgs),

    /// Pack every queued folder into a text archive
    Pack(pack::PackArgs),
}
