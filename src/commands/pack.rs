//! # pack 命令实现
//!
//! 把每个文件夹条目打包为 `<out-dir>/<folder>.pack.txt`。
//! 单文件条目不属于任何文件夹，记为跳过。
//!
//! ## 依赖关系
//! - 使用 `cli/pack.rs` 定义的参数
//! - 使用 `ops/packer.rs`
//! - 使用 `commands/batch.rs` 驱动运行

use super::batch::{execute_batch, print_summary};
use crate::batch::{CancelToken, Strategy};
use crate::cli::pack::PackArgs;
use crate::error::{Result, SpikeError};
use crate::ops::TextArchiveFactory;
use crate::utils::output;

use std::fs;
use std::sync::Arc;

/// 执行 pack 命令
pub fn execute(args: PackArgs, cancel: &CancelToken) -> Result<()> {
    output::print_header("Packing folders");

    fs::create_dir_all(&args.out_dir).map_err(|e| SpikeError::FileWriteError {
        path: args.out_dir.display().to_string(),
        source: e,
    })?;

    let loose = args.batch.inputs.iter().filter(|p| p.is_file()).count();
    if loose > 0 {
        output::print_warning(&format!(
            "{} single-file input(s) are not inside a folder and will be skipped",
            loose
        ));
    }

    let factory = Arc::new(TextArchiveFactory::new(&args.out_dir));
    let summary = execute_batch(&args.batch, Strategy::Pack(factory), cancel)?;

    output::print_done(&format!(
        "Packed {} file(s) from {} folder(s) into '{}'",
        summary.result.success,
        summary.entries - loose.min(summary.entries),
        args.out_dir.display()
    ));
    print_summary(&summary);
    Ok(())
}
