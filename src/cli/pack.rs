//! # pack 子命令 CLI 定义
//!
//! 把每个文件夹条目打包为一个文本归档。
//!
//! ## 依赖关系
//! - 被 `cli/mod.rs` 使用
//! - 参数传递给 `commands/pack.rs`

use super::batch::BatchArgs;
use clap::Args;
use std::path::PathBuf;

/// pack 子命令参数
#[derive(Args, Debug)]
pub struct PackArgs {
    #[command(flatten)]
    pub batch: BatchArgs,

    /// Directory receiving one `<folder>.pack.txt` per folder entry
    #[arg(long, default_value = ".")]
    pub out_dir: PathBuf,
}
