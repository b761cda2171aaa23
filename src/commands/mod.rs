//! # 命令执行模块
//!
//! 实现各子命令的业务逻辑。
//!
//! ## 依赖关系
//! - 被 `main.rs` 调用
//! - 使用 `cli/`, `batch/`, `ops/`, `utils/`
//! - 子模块: batch, checksum, pack

pub mod batch;
pub mod checksum;
pub mod pack;

use crate::batch::CancelToken;
use crate::cli::Commands;
use crate::error::Result;

/// 执行命令
pub fn run(cmd: Commands, cancel: &CancelToken) -> Result<()> {
    match cmd {
        Commands::Checksum(args) => checksum::execute(args, cancel),
        Commands::Pack(args) => pack::execute(args, cancel),
    }
}
