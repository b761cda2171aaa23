//! # checksum 命令实现
//!
//! 对队列中的每个文件计算 SHA-256。
//!
//! ## 功能
//! - 默认直接策略：单遍处理，总进度以文件计
//! - `--two-phase`：先统计每个文件的块数，再按块推进进度
//! - 输出 `<hex>  <path>`，按路径排序，写到 stdout 或 `-o`
//!
//! ## 依赖关系
//! - 使用 `cli/checksum.rs` 定义的参数
//! - 使用 `ops/checksum.rs`
//! - 使用 `commands/batch.rs` 驱动运行

use super::batch::{execute_batch, print_summary};
use crate::batch::{CancelToken, Strategy};
use crate::cli::checksum::ChecksumArgs;
use crate::error::{Result, SpikeError};
use crate::ops::ChecksumOperation;
use crate::utils::output;

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// 执行 checksum 命令
pub fn execute(args: ChecksumArgs, cancel: &CancelToken) -> Result<()> {
    let op = Arc::new(ChecksumOperation::new());
    let strategy = if args.two_phase {
        output::print_header("SHA-256 checksums (two-phase)");
        Strategy::TwoPhase(op.clone())
    } else {
        output::print_header("SHA-256 checksums");
        Strategy::Direct(op.clone())
    };

    let summary = execute_batch(&args.batch, strategy, cancel)?;
    let digests = op.take_sorted();

    match &args.output {
        Some(path) => {
            let file = File::create(path).map_err(|e| write_error(path, e))?;
            write_digests(BufWriter::new(file), &digests).map_err(|e| write_error(path, e))?;
            output::print_success(&format!(
                "{} checksum(s) written to '{}'",
                digests.len(),
                path.display()
            ));
        }
        None => {
            let stdout = io::stdout();
            write_digests(stdout.lock(), &digests)
                .map_err(|e| write_error(Path::new("<stdout>"), e))?;
        }
    }

    print_summary(&summary);
    Ok(())
}

fn write_error(path: &Path, source: io::Error) -> SpikeError {
    SpikeError::FileWriteError {
        path: path.display().to_string(),
        source,
    }
}

/// 每行 `<hex>  <path>`
fn write_digests<W: Write>(mut out: W, digests: &[(PathBuf, String)]) -> io::Result<()> {
    for (path, hex) in digests {
        writeln!(out, "{}  {}", hex, path.display())?;
    }
    out.flush()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_line_format() {
        let mut buf = Vec::new();
        let digests = vec![
            (PathBuf::from("a.txt"), "00ff".to_string()),
            (PathBuf::from("b/c.txt"), "abcd".to_string()),
        ];
        write_digests(&mut buf, &digests).unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "00ff  a.txt\nabcd  b/c.txt\n");
    }
}
